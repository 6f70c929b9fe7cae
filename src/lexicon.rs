use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use ordered_float::OrderedFloat;
use tracing::{debug, warn};

use crate::real;
use crate::rng::Rng;
use crate::text::{trim, PHRASE_SEPARATOR};

const EMPTY: u32 = u32::MAX;

/// Occupancy fraction that triggers an automatic rebuild with a higher
/// frequency floor.
const REBUILD_OCCUPANCY: f64 = 0.7;

/// A word, subword fragment, or phrase.
#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    pub text: String,
    pub freq: f64,
    /// Rows of this word's subword fragments. Empty for fragments and phrases.
    pub subwords: Vec<usize>,
}

/// Frequency-ranked symbol table: an open-addressing index over a row array.
///
/// `slots` maps hash buckets to rows (linear probing); `rows` holds the
/// symbols in row order, which after a [`rebuild`](Lexicon::rebuild) is
/// descending frequency.
pub struct Lexicon {
    capacity: usize,
    slots: Vec<u32>,
    rows: Vec<Symbol>,
    subngram: usize,
    /// Frequency floor for the automatic rebuild; raised by one each time the
    /// table fills up.
    min_reduce: i64,
    /// Sum of all row frequencies, refreshed by `rebuild` and
    /// `build_discard_table`.
    total_tokens: f64,
    sample: real,
    /// Per-row probability of keeping an occurrence.
    discard: Vec<real>,
}

/// Splits a word into the fragments used as its subword symbols.
///
/// The word is wrapped as `"<" + word + ">>"`; from every character start,
/// fragments of 1 to `n` characters are taken as long as another character
/// follows them. One-character fragments that are just a boundary marker are
/// skipped, as is the word itself.
pub fn subword_pieces(word: &str, n: usize) -> Vec<String> {
    let token = format!("<{word}>>");
    let bytes = token.as_bytes();
    let is_start = |b: u8| b & 0xC0 != 0x80;

    let mut pieces = vec![];
    for i in 0..bytes.len() {
        if !is_start(bytes[i]) {
            continue;
        }
        let mut chars = 1;
        let mut j = i;
        let mut started = false;
        while j < bytes.len() && chars <= n {
            if is_start(bytes[j]) && started {
                chars += 1;
                let inside = 0 < i && i < bytes.len() - 2;
                if (j > i + 1 || inside) && &token[i..j] != word {
                    pieces.push(token[i..j].to_string());
                }
            }
            started = true;
            j += 1;
        }
    }
    pieces
}

/// FNV-1 over the bytes, each sign-extended before mixing.
fn fnv(text: &str) -> u32 {
    let mut h: u32 = 2166136261;
    for &b in text.as_bytes() {
        h ^= b as i8 as i32 as u32;
        h = h.wrapping_mul(16777619);
    }
    h
}

impl Lexicon {
    pub fn new(capacity: usize, subngram: usize) -> Self {
        assert!(capacity > 0, "lexicon capacity must be positive");
        Lexicon {
            capacity,
            slots: vec![EMPTY; capacity],
            rows: vec![],
            subngram,
            min_reduce: 1,
            total_tokens: 0.0,
            sample: 0.0,
            discard: vec![],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Symbol] {
        &self.rows
    }

    /// Panics if `row` is out of range.
    pub fn symbol(&self, row: usize) -> &Symbol {
        &self.rows[row]
    }

    pub fn total_tokens(&self) -> f64 {
        self.total_tokens
    }

    pub fn min_reduce(&self) -> i64 {
        self.min_reduce
    }

    pub fn subngram(&self) -> usize {
        self.subngram
    }

    /// One slot always stays empty so probing terminates.
    fn is_full(&self) -> bool {
        self.rows.len() + 1 >= self.capacity
    }

    fn hash(&self, text: &str) -> usize {
        fnv(text) as usize % self.capacity
    }

    /// The slot holding `text`, or the empty slot where it would go.
    fn probe(&self, text: &str) -> usize {
        let mut h = self.hash(text);
        loop {
            let row = self.slots[h];
            if row == EMPTY || self.rows[row as usize].text == text {
                return h;
            }
            h = (h + 1) % self.capacity;
        }
    }

    pub fn lookup(&self, text: &str) -> Option<usize> {
        match self.slots[self.probe(text)] {
            EMPTY => None,
            row => Some(row as usize),
        }
    }

    pub fn contains(&self, text: &str) -> bool {
        self.lookup(text).is_some()
    }

    /// Frequency of `text`, or 0 when absent.
    pub fn freq(&self, text: &str) -> f64 {
        self.lookup(text).map_or(0.0, |row| self.rows[row].freq)
    }

    /// Rows of all known `words`, in order; unknown words are dropped.
    pub fn lookup_all(&self, words: &[&str]) -> Vec<usize> {
        words.iter().filter_map(|w| self.lookup(w)).collect()
    }

    /// One entry per word, `None` where the word is unknown.
    pub fn lookup_positional(&self, words: &[&str]) -> Vec<Option<usize>> {
        words.iter().map(|w| self.lookup(w)).collect()
    }

    /// Adds `freq` occurrences of `text`, with the automatic rebuild enabled.
    ///
    /// With `accumulate`, an existing symbol's frequency grows (and so do its
    /// subwords'); otherwise an existing symbol is left alone. With
    /// `decompose`, a new symbol is split into subwords which are inserted as
    /// needed and credited with `freq`.
    pub fn insert(&mut self, text: &str, freq: f64, accumulate: bool, decompose: bool) {
        self.insert_with(text, freq, accumulate, decompose, true);
    }

    /// Inserts every token once, accumulating.
    pub fn insert_tokens(&mut self, tokens: &[&str], decompose: bool) {
        for token in tokens {
            self.insert(token, 1.0, true, decompose);
        }
    }

    fn insert_with(
        &mut self,
        text: &str,
        freq: f64,
        accumulate: bool,
        decompose: bool,
        allow_rebuild: bool,
    ) {
        let text = trim(text);
        if text.is_empty() {
            return;
        }

        let slot = self.probe(text);
        let row = self.slots[slot];
        if row != EMPTY {
            if accumulate {
                let row = row as usize;
                self.rows[row].freq += freq;
                for i in 0..self.rows[row].subwords.len() {
                    let sub = self.rows[row].subwords[i];
                    self.rows[sub].freq += freq;
                }
            }
            return;
        }

        let subwords = if decompose && !self.is_full() {
            let subs = self.insert_subwords(text);
            for &sub in &subs {
                self.rows[sub].freq += freq;
            }
            subs
        } else {
            vec![]
        };
        if self.is_full() {
            warn!(text, capacity = self.capacity, "lexicon is full; symbol dropped");
            return;
        }

        // Inserting the subwords may have taken the slot found above.
        let slot = self.probe(text);
        self.slots[slot] = self.rows.len() as u32;
        self.rows.push(Symbol {
            text: text.to_string(),
            freq,
            subwords,
        });

        if allow_rebuild && self.rows.len() as f64 > REBUILD_OCCUPANCY * self.capacity as f64 {
            self.min_reduce += 1;
            debug!(
                rows = self.rows.len(),
                floor = self.min_reduce,
                "lexicon reached its occupancy limit; rebuilding"
            );
            self.rebuild(self.min_reduce);
        }
    }

    /// Decomposes `text`, inserting unknown fragments with zero frequency.
    fn insert_subwords(&mut self, text: &str) -> Vec<usize> {
        let mut subs = vec![];
        for piece in subword_pieces(text, self.subngram) {
            self.insert_with(&piece, 0.0, false, false, false);
            if let Some(row) = self.lookup(&piece) {
                subs.push(row);
            }
        }
        subs
    }

    /// Decomposes `text` against the fragments already present.
    fn resolve_subwords(&self, text: &str) -> Vec<usize> {
        subword_pieces(text, self.subngram)
            .iter()
            .filter_map(|piece| self.lookup(piece))
            .collect()
    }

    /// Drops rows below `min_freq` (no filtering when `min_freq <= 0`), sorts
    /// by descending frequency (stable), rebuilds the index and recomputes
    /// every word's subword rows.
    pub fn rebuild(&mut self, min_freq: i64) {
        if min_freq > 0 {
            self.rows.retain(|s| s.freq as i64 >= min_freq);
        }
        self.rows.sort_by_key(|s| Reverse(OrderedFloat(s.freq)));

        self.slots.fill(EMPTY);
        for row in 0..self.rows.len() {
            let slot = self.probe(&self.rows[row].text);
            self.slots[slot] = row as u32;
        }

        for row in 0..self.rows.len() {
            if !self.rows[row].subwords.is_empty() {
                self.rows[row].subwords = self.resolve_subwords(&self.rows[row].text);
            }
        }

        self.total_tokens = self.rows.iter().map(|s| s.freq).sum();
    }

    /// Precomputes the keep probability of every row for subsampling
    /// coefficient `sample`.
    pub fn build_discard_table(&mut self, sample: real) {
        self.sample = sample;
        self.total_tokens = self.rows.iter().map(|s| s.freq.trunc()).sum();
        if self.total_tokens <= 0.0 {
            self.discard.clear();
            return;
        }
        self.discard = self
            .rows
            .iter()
            .map(|s| keep_rate(s.freq, self.total_tokens, sample as f64))
            .collect();
    }

    /// Probability of keeping an occurrence of `row`. A `boost` away from 1
    /// scales the subsampling coefficient instead of using the stored table.
    pub fn keep_probability(&self, row: usize, boost: real) -> real {
        if row >= self.discard.len() {
            return 0.0;
        }
        if !(0.99..=1.01).contains(&boost) {
            if self.total_tokens <= 0.0 {
                return 1.0;
            }
            return keep_rate(
                self.rows[row].freq,
                self.total_tokens,
                (self.sample * boost) as f64,
            );
        }
        self.discard[row]
    }

    /// Randomly drops rows according to their keep probability.
    pub fn subsample(&self, rows: &mut Vec<usize>, boost: real, rng: &mut Rng) {
        if self.boost_without_totals(boost) {
            return;
        }
        rows.retain(|&row| rng.rand_real() <= self.keep_probability(row, boost));
    }

    /// Like [`subsample`](Lexicon::subsample) but marks dropped positions
    /// `None` so positions stay aligned with the tokens.
    pub fn subsample_positional(&self, rows: &mut [Option<usize>], boost: real, rng: &mut Rng) {
        if self.boost_without_totals(boost) {
            return;
        }
        for entry in rows.iter_mut() {
            if let Some(row) = *entry {
                if rng.rand_real() > self.keep_probability(row, boost) {
                    *entry = None;
                }
            }
        }
    }

    fn boost_without_totals(&self, boost: real) -> bool {
        !(0.99..=1.01).contains(&boost) && self.total_tokens <= 0.0
    }

    /// Prunes phrase candidates against the word lexicon `words`.
    ///
    /// A single-token entry survives when its frequency reaches
    /// `min_phrase_freq`. A phrase of `k` tokens survives when
    /// `(freq - min_phrase_freq) * total^(k-1) / Π max(1, freq(token))`
    /// reaches `threshold`.
    pub fn filter_phrases(&mut self, words: &Lexicon, min_phrase_freq: f64, threshold: f64) {
        let total = words.total_tokens;
        let before = self.rows.len();
        self.rows.retain(|s| {
            let parts: Vec<&str> = s.text.split(PHRASE_SEPARATOR).collect();
            if parts.len() == 1 {
                return s.freq >= min_phrase_freq;
            }
            let denom: f64 = parts.iter().map(|p| words.freq(p).max(1.0)).product();
            let rate = (s.freq - min_phrase_freq) * total.powi(parts.len() as i32 - 1) / denom;
            rate >= threshold
        });
        debug!(before, after = self.rows.len(), "filtered phrase candidates");
        self.rebuild(-1);
    }

    /// Adds every symbol of `other` with its frequency. Words keep their
    /// subword rows, re-resolved against this table.
    pub fn combine(&mut self, other: &Lexicon) {
        for symbol in &other.rows {
            self.insert(&symbol.text, symbol.freq, true, false);
        }
        for symbol in other.rows.iter().filter(|s| !s.subwords.is_empty()) {
            if let Some(row) = self.lookup(&symbol.text) {
                self.rows[row].subwords = self.resolve_subwords(&symbol.text);
            }
        }
    }

    /// Writes the capacity, row count and frequency floor, then one
    /// `text<TAB>freq<TAB>sub|sub|...` line per row.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{}", self.capacity)?;
        writeln!(out, "{}", self.rows.len())?;
        writeln!(out, "{}", self.min_reduce)?;
        for s in &self.rows {
            let subs = s
                .subwords
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join("|");
            writeln!(out, "{}\t{}\t{}", s.text, s.freq, subs)?;
        }
        out.flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Reads a table written by [`save`](Lexicon::save) and rebuilds its
    /// discard table with coefficient `sample`.
    pub fn load(path: &Path, subngram: usize, sample: real) -> Result<Lexicon> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let mut header = |what: &str| -> Result<i64> {
            let line = lines
                .next()
                .with_context(|| format!("{}: missing {what}", path.display()))??;
            trim(&line)
                .parse()
                .with_context(|| format!("{}: invalid {what} {line:?}", path.display()))
        };
        let capacity = header("capacity")?;
        let count = header("row count")?;
        let min_reduce = header("frequency floor")?;
        ensure!(
            capacity > 0 && count >= 0 && count < capacity,
            "{}: row count {count} does not fit capacity {capacity}",
            path.display()
        );

        let mut lexicon = Lexicon::new(capacity as usize, subngram);
        lexicon.min_reduce = min_reduce;
        for (i, line) in lines.enumerate() {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            let line_no = i + 4;
            if trim(&line).is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 2 {
                bail!("{}:{line_no}: expected text and frequency", path.display());
            }
            let freq: f64 = trim(parts[1])
                .parse()
                .with_context(|| format!("{}:{line_no}: invalid frequency", path.display()))?;
            let before = lexicon.len();
            lexicon.insert_with(parts[0], freq, true, false, false);
            ensure!(
                lexicon.len() == before + 1,
                "{}:{line_no}: duplicate or empty symbol {:?}",
                path.display(),
                parts[0]
            );
            if let Some(subs) = parts.get(2).map(|s| trim(s)).filter(|s| !s.is_empty()) {
                let subs = subs
                    .split('|')
                    .map(|r| r.parse::<usize>())
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("{}:{line_no}: invalid subword rows", path.display()))?;
                lexicon.rows[before].subwords = subs;
            }
        }
        ensure!(
            lexicon.len() as i64 == count,
            "{}: header says {count} rows, found {}",
            path.display(),
            lexicon.len()
        );
        let rows = lexicon.len();
        ensure!(
            lexicon.rows.iter().flat_map(|s| &s.subwords).all(|&r| r < rows),
            "{}: subword row out of range",
            path.display()
        );
        lexicon.build_discard_table(sample);
        Ok(lexicon)
    }
}

fn keep_rate(freq: f64, total: f64, sample: f64) -> real {
    let rate = freq / total;
    ((sample / rate).sqrt() + sample / rate) as real
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv_sign_extends_bytes() {
        // "\u{e6}" is C3 A6 in UTF-8; both bytes are negative as i8.
        let h = (2166136261u32 ^ 0xFFFF_FFC3).wrapping_mul(16777619);
        let h = (h ^ 0xFFFF_FFA6).wrapping_mul(16777619);
        assert_eq!(fnv("\u{e6}"), h);
        assert_eq!(fnv(""), 2166136261);
    }

    #[test]
    fn probe_wraps_around() {
        let mut lexicon = Lexicon::new(7, 2);
        for w in ["a", "b", "c", "d"] {
            lexicon.insert_with(w, 1.0, true, false, false);
        }
        for w in ["a", "b", "c", "d"] {
            assert!(lexicon.contains(w));
        }
        assert!(!lexicon.contains("e"));
    }
}
