use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::Config;
use crate::corpus::Example;
use crate::lexicon::Lexicon;
use crate::text::{phrase_candidates, tokens, trim};

pub const CLS_TAGS_FILE: &str = "cls_tag_map_.out";
pub const CLS_COUNTS_FILE: &str = "cls_tag_count_map_.out";
pub const PAIR_TAGS_FILE: &str = "pair_tag_map_.out";
pub const PAIR_COUNTS_FILE: &str = "pair_tag_count_map_.out";

/// What the corpus says about the supervised tasks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagStats {
    /// Classification tag -> largest label seen.
    pub cls_tags: BTreeMap<String, u32>,
    /// `"tag<TAB>label"` -> number of classification examples.
    pub cls_counts: BTreeMap<String, u32>,
    /// Pair tag -> largest label (always 1).
    pub pair_tags: BTreeMap<String, u32>,
    /// `"tag<TAB>label"` -> number of pair examples.
    pub pair_counts: BTreeMap<String, u32>,
}

impl TagStats {
    pub fn record(&mut self, example: &Example) {
        match *example {
            Example::Skip { .. } => {}
            Example::Cls { tag, label, .. } => {
                let max = self.cls_tags.entry(tag.to_string()).or_insert(0);
                *max = (*max).max(label as u32);
                *self.cls_counts.entry(format!("{tag}\t{label}")).or_insert(0) += 1;
            }
            Example::Pair { tag, label, .. } => {
                self.pair_tags.insert(tag.to_string(), 1);
                *self.pair_counts.entry(format!("{tag}\t{label}")).or_insert(0) += 1;
            }
        }
    }

    /// Number of output rows for a classification tag.
    pub fn cls_cardinality(&self, tag: &str) -> Option<usize> {
        self.cls_tags.get(tag).map(|&max| (max as usize + 1).max(2))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        save_map(&self.cls_tags, &dir.join(CLS_TAGS_FILE))?;
        save_map(&self.cls_counts, &dir.join(CLS_COUNTS_FILE))?;
        save_map(&self.pair_tags, &dir.join(PAIR_TAGS_FILE))?;
        save_map(&self.pair_counts, &dir.join(PAIR_COUNTS_FILE))?;
        Ok(())
    }

    /// Reads the four maps; a missing pair count map is treated as empty.
    pub fn load(dir: &Path) -> Result<TagStats> {
        let pair_counts_path = dir.join(PAIR_COUNTS_FILE);
        Ok(TagStats {
            cls_tags: load_map(&dir.join(CLS_TAGS_FILE))?,
            cls_counts: load_map(&dir.join(CLS_COUNTS_FILE))?,
            pair_tags: load_map(&dir.join(PAIR_TAGS_FILE))?,
            pair_counts: if pair_counts_path.exists() {
                load_map(&pair_counts_path)?
            } else {
                BTreeMap::new()
            },
        })
    }
}

fn save_map(map: &BTreeMap<String, u32>, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for (key, value) in map {
        writeln!(out, "{key}\t{value}")?;
    }
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// `key<TAB>value` lines; the key is everything before the last TAB.
fn load_map(path: &Path) -> Result<BTreeMap<String, u32>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut map = BTreeMap::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if trim(&line).is_empty() {
            continue;
        }
        let Some((key, value)) = line.rsplit_once('\t') else {
            bail!("{}:{}: expected key<TAB>value", path.display(), i + 1);
        };
        let value: u32 = trim(value)
            .parse()
            .with_context(|| format!("{}:{}: invalid value {value:?}", path.display(), i + 1))?;
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// Everything a corpus scan produces.
pub struct Vocabulary {
    pub lexicon: Lexicon,
    pub tags: TagStats,
    /// Lines in the corpus, counting blank and unusable ones.
    pub total_lines: u64,
}

/// Counts the words, subwords and phrase candidates of every usable example,
/// prunes them, and merges words and phrases into one lexicon.
pub fn build_vocabulary(config: &Config) -> Result<Vocabulary> {
    let Some(path) = &config.train_file else {
        bail!("trainfile is required to build a vocabulary");
    };
    info!(file = %path.display(), "building vocabulary");
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut words = Lexicon::new(config.max_vocab_size, config.subngram);
    let mut phrases = Lexicon::new(config.max_phrase_size, config.subngram);
    let mut tags = TagStats::default();
    let (mut line_count, mut word_count, mut phrase_count) = (0u64, 0u64, 0u64);

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {elapsed_precise} {msg}")
            .context("invalid progress template")?,
    );
    bar.enable_steady_tick(Duration::from_millis(200));
    let status = |lines: u64, words: u64, phrases: u64| {
        format!(
            "lines: {lines}  words(M): {:.3}  phrases(M): {:.3}",
            words as f64 / 1e6,
            phrases as f64 / 1e6
        )
    };

    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        line_count += 1;
        let line = String::from_utf8_lossy(&buf);
        let line = trim(&line).to_ascii_lowercase();
        let Some(example) = Example::parse(&line, config) else {
            continue;
        };
        tags.record(&example);

        let text = example.vocabulary_text();
        let toks = tokens(&text);
        if toks.is_empty() || !config.accepts_len(toks.len()) {
            continue;
        }
        word_count += toks.len() as u64;
        words.insert_tokens(&toks, true);
        let candidates = phrase_candidates(&toks, config.ngram);
        phrase_count += candidates.len() as u64;
        for phrase in &candidates {
            phrases.insert(phrase, 1.0, true, false);
        }

        if line_count % 1000 == 0 {
            bar.set_message(status(line_count, word_count, phrase_count));
        }
    }
    bar.finish_with_message(status(line_count, word_count, phrase_count));

    words.rebuild(config.min_word_freq as i64);
    phrases.rebuild(config.min_phrase_freq as i64);
    let candidates = phrases.len();
    phrases.filter_phrases(
        &words,
        config.min_phrase_freq as f64,
        config.phrase_freq_threshold,
    );

    let mut lexicon = Lexicon::new(
        config.max_vocab_size + config.max_phrase_size,
        config.subngram,
    );
    lexicon.combine(&words);
    lexicon.combine(&phrases);
    lexicon.rebuild(-1);
    lexicon.build_discard_table(config.freq_sample);

    info!(
        lines = line_count,
        words = words.len(),
        phrase_candidates = candidates,
        phrases = phrases.len(),
        symbols = lexicon.len(),
        "vocabulary built"
    );
    Ok(Vocabulary {
        lexicon,
        tags,
        total_lines: line_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_stats_track_max_label_and_counts() {
        let config = Config::default();
        let mut tags = TagStats::default();
        for line in ["cls\tt\t2\ta", "cls\tt\t0\tb", "cls\tt\t2\tc", "pair\tp\t0\ta\tb"] {
            tags.record(&Example::parse(line, &config).unwrap());
        }
        assert_eq!(tags.cls_tags["t"], 2);
        assert_eq!(tags.cls_counts["t\t2"], 2);
        assert_eq!(tags.cls_counts["t\t0"], 1);
        assert_eq!(tags.pair_tags["p"], 1);
        assert_eq!(tags.pair_counts["p\t0"], 1);
        assert_eq!(tags.cls_cardinality("t"), Some(3));
        assert_eq!(tags.cls_cardinality("missing"), None);
    }
}
