use anyhow::{ensure, Result};

use crate::config::Config;
use crate::layers::InputLayer;
use crate::lexicon::Lexicon;
use crate::matrix::Real;
use crate::real;
use crate::rng::Rng;
use crate::text::{phrase_candidates, tokens};

/// Subsampling boost used when resolving classification, pair and
/// evaluation texts. Large enough that almost nothing is dropped.
pub const DEFAULT_RESOLVE_BOOST: real = 10000.0;

/// State shared by every task and every training thread.
pub struct Network {
    pub config: Config,
    pub lexicon: Lexicon,
    pub input: InputLayer,
    /// Current learning rate, decayed during training.
    pub learning_rate: Real,
}

impl Network {
    /// A freshly initialized embedding matrix for `lexicon`.
    pub fn new(config: Config, lexicon: Lexicon) -> Result<Network> {
        ensure!(!lexicon.is_empty(), "the vocabulary is empty");
        let input = InputLayer::new(lexicon.len(), config.dim)?;
        Self::with_input(config, lexicon, input)
    }

    pub fn with_input(config: Config, lexicon: Lexicon, input: InputLayer) -> Result<Network> {
        ensure!(
            input.rows() == lexicon.len(),
            "embedding matrix has {} rows but the vocabulary has {} symbols",
            input.rows(),
            lexicon.len()
        );
        ensure!(
            input.cols() == config.dim,
            "embedding matrix has {} columns but dim is {}",
            input.cols(),
            config.dim
        );
        let learning_rate = Real::new(config.learn_rate);
        Ok(Network {
            config,
            lexicon,
            input,
            learning_rate,
        })
    }

    pub fn dim(&self) -> usize {
        self.config.dim
    }

    /// Resolves a text to the rows that represent it: the subsampled word
    /// rows, then every kept word's subword rows, then (with `use_phrase`)
    /// the subsampled phrase rows. Texts of unacceptable length resolve to
    /// nothing.
    pub fn resolve(&self, text: &str, boost: real, use_phrase: bool, rng: &mut Rng) -> Vec<usize> {
        let words = tokens(text);
        if !self.config.accepts_len(words.len()) {
            return vec![];
        }

        let mut rows = self.lexicon.lookup_all(&words);
        self.lexicon.subsample(&mut rows, boost, rng);
        let subwords: Vec<usize> = rows
            .iter()
            .flat_map(|&row| self.lexicon.symbol(row).subwords.iter().copied())
            .collect();
        rows.extend(subwords);

        if use_phrase && self.config.ngram > 1 {
            let mut phrases = self.phrase_rows(&words);
            self.lexicon.subsample(&mut phrases, boost, rng);
            rows.extend(phrases);
        }
        rows
    }

    /// Word and phrase rows of a text, no subsampling and no subwords.
    pub fn resolve_plain(&self, text: &str) -> Vec<usize> {
        let words = tokens(text);
        let mut rows = self.lexicon.lookup_all(&words);
        if self.config.ngram > 0 {
            rows.extend(self.phrase_rows(&words));
        }
        rows
    }

    /// Rows of the known n-grams of `2..=ngram` tokens, by starting
    /// position.
    fn phrase_rows(&self, words: &[&str]) -> Vec<usize> {
        phrase_candidates(words, self.config.ngram)
            .iter()
            .filter_map(|phrase| self.lexicon.lookup(phrase))
            .collect()
    }
}
