use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, ensure, Context, Result};

use crate::real;
use crate::text::trim;

/// What the program does with the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Process {
    /// Build the vocabulary, train, and save a model directory.
    Train,
    /// Interactive nearest-neighbour queries.
    Distance,
    /// Classification and pair scoring of stdin lines.
    Predict,
    /// Averaged embedding of each stdin line.
    SentenceVec,
}

impl FromStr for Process {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Process::Train),
            "distance" => Ok(Process::Distance),
            "predict" => Ok(Process::Predict),
            "sentence_vec" => Ok(Process::SentenceVec),
            _ => Err(anyhow!(
                "unknown process {s:?} (expected train, distance, predict or sentence_vec)"
            )),
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Process::Train => "train",
            Process::Distance => "distance",
            Process::Predict => "predict",
            Process::SentenceVec => "sentence_vec",
        })
    }
}

/// Run configuration, read from a file of `key = value` lines.
#[derive(Clone, Debug)]
pub struct Config {
    pub process: Process,
    pub model_dir: Option<PathBuf>,
    pub train_file: Option<PathBuf>,
    pub eval_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,

    /// Texts with fewer tokens are ignored.
    pub min_len: usize,
    /// Texts with more tokens are ignored.
    pub max_len: usize,
    pub max_vocab_size: usize,
    pub max_phrase_size: usize,
    pub min_word_freq: usize,
    pub min_phrase_freq: usize,
    pub phrase_freq_threshold: f64,

    /// Embedding vector length.
    pub dim: usize,
    /// Longest phrase, in tokens.
    pub ngram: usize,
    /// Longest subword fragment, in characters.
    pub subngram: usize,
    pub window_size: usize,
    pub threads: usize,
    pub get_loss_every: usize,
    pub eval_every: usize,
    pub epochs: usize,
    pub learn_rate: real,
    /// Subsampling coefficient for frequent symbols.
    pub freq_sample: real,
    pub dropout_keep_rate: real,
    pub neg_table_size: usize,
    /// Neighbours printed by `distance`.
    pub top_size: usize,

    pub use_skipgram: bool,
    pub use_cls: bool,
    pub use_pair: bool,

    /// Every key this struct doesn't know, lower-cased.
    params: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            process: Process::Train,
            model_dir: None,
            train_file: None,
            eval_file: None,
            output_dir: None,
            min_len: 3,
            max_len: 10000,
            max_vocab_size: 30_000_000,
            max_phrase_size: 30_000_000,
            min_word_freq: 10,
            min_phrase_freq: 10,
            phrase_freq_threshold: 3.0,
            dim: 64,
            ngram: 2,
            subngram: 2,
            window_size: 5,
            threads: 20,
            get_loss_every: 100,
            eval_every: 10000,
            epochs: 1,
            learn_rate: 0.05,
            freq_sample: 1e-4,
            dropout_keep_rate: 1.0,
            neg_table_size: 10_000_000,
            top_size: 20,
            use_skipgram: true,
            use_cls: true,
            use_pair: true,
            params: BTreeMap::new(),
        }
    }
}

fn parse_int(key: &str, value: &str, min: usize) -> Result<usize> {
    let n: i64 = value
        .parse()
        .with_context(|| format!("{key}: expected an integer, got {value:?}"))?;
    ensure!(n >= min as i64, "{key} must be at least {min}, got {n}");
    Ok(n as usize)
}

fn parse_real(key: &str, value: &str) -> Result<real> {
    value
        .parse()
        .with_context(|| format!("{key}: expected a number, got {value:?}"))
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn parse_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config = Config::default();
        config
            .apply(&text)
            .with_context(|| format!("in config file {}", path.display()))?;
        Ok(config)
    }

    /// Applies every `key = value` line of `text`. Comment lines (`#`) and
    /// lines of any other shape are skipped.
    pub fn apply(&mut self, text: &str) -> Result<()> {
        for line in text.lines() {
            let line = trim(line);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('=').collect();
            if parts.len() != 2 {
                continue;
            }
            let (key, value) = (trim(parts[0]), trim(parts[1]));
            if key.is_empty() || value.is_empty() {
                continue;
            }
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Sets one key. Values of typed keys that don't parse, or fall below the
    /// key's minimum, are errors.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "process" => self.process = value.parse()?,
            "modeldir" => self.model_dir = parse_path(value),
            "trainfile" => self.train_file = parse_path(value),
            "evalfile" => self.eval_file = parse_path(value),
            "outputdir" => self.output_dir = parse_path(value),
            "minlen" => self.min_len = parse_int(key, value, 1)?,
            "maxlen" => self.max_len = parse_int(key, value, 1)?,
            "maxvocabsize" => self.max_vocab_size = parse_int(key, value, 10000)?,
            "maxphrasesize" => self.max_phrase_size = parse_int(key, value, 10000)?,
            "minwordfreq" => self.min_word_freq = parse_int(key, value, 1)?,
            "minphrasefreq" => self.min_phrase_freq = parse_int(key, value, 1)?,
            "phrasefreqthreshold" => {
                self.phrase_freq_threshold = parse_real(key, value)? as f64
            }
            "dim" => self.dim = parse_int(key, value, 1)?,
            "ngram" => self.ngram = parse_int(key, value, 1)?,
            "subngram" => self.subngram = parse_int(key, value, 1)?,
            "windowsize" => self.window_size = parse_int(key, value, 1)?,
            "thread" => self.threads = parse_int(key, value, 1)?,
            "getlossevery" => self.get_loss_every = parse_int(key, value, 1)?,
            "evalevery" => self.eval_every = parse_int(key, value, 1)?,
            "epoch" => self.epochs = parse_int(key, value, 1)?,
            "learnrate" => self.learn_rate = parse_real(key, value)?,
            "freqsample" => self.freq_sample = parse_real(key, value)?,
            "dropoutkeeprate" => self.dropout_keep_rate = parse_real(key, value)?,
            "negtablesize" => self.neg_table_size = parse_int(key, value, 1)?,
            "topsize" => self.top_size = parse_int(key, value, 1)?,
            "useskipgram" => self.use_skipgram = parse_bool(value),
            "usecls" => self.use_cls = parse_bool(value),
            "usepair" => self.use_pair = parse_bool(value),
            _ => {
                self.params
                    .insert(key.to_ascii_lowercase(), value.to_ascii_lowercase());
            }
        }
        Ok(())
    }

    /// Cross-field validation, run once before any work starts.
    pub fn check(&self) -> Result<()> {
        ensure!(
            self.use_skipgram || self.use_cls || self.use_pair,
            "at least one of useskipgram, usecls, usepair must be true"
        );
        ensure!(
            self.min_len <= self.max_len,
            "minlen ({}) is greater than maxlen ({})",
            self.min_len,
            self.max_len
        );
        ensure!(
            self.learn_rate >= 0.0,
            "learnrate must not be negative"
        );
        ensure!(
            self.freq_sample >= 0.0,
            "freqsample must not be negative"
        );
        ensure!(
            self.dropout_keep_rate > 0.0 && self.dropout_keep_rate <= 1.0,
            "dropoutkeeprate must be in (0, 1], got {}",
            self.dropout_keep_rate
        );
        match self.process {
            Process::Train => {
                let Some(train_file) = &self.train_file else {
                    bail!("trainfile is required for training");
                };
                ensure!(
                    train_file.is_file(),
                    "training file {} does not exist",
                    train_file.display()
                );
                if let Some(eval_file) = &self.eval_file {
                    ensure!(
                        eval_file.is_file(),
                        "evaluation file {} does not exist",
                        eval_file.display()
                    );
                }
            }
            _ => {
                let Some(model_dir) = &self.model_dir else {
                    bail!("modeldir is required for {}", self.process);
                };
                ensure!(
                    model_dir.is_dir(),
                    "model directory {} does not exist",
                    model_dir.display()
                );
            }
        }
        Ok(())
    }

    /// Whether a text of `len` tokens is used at all.
    pub fn accepts_len(&self, len: usize) -> bool {
        len >= self.min_len && len <= self.max_len
    }

    /// An unrecognized key's value, lower-cased.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// An unrecognized key's value as a number; `None` if absent or not
    /// numeric.
    pub fn param_num(&self, key: &str) -> Option<real> {
        self.param_str(key).and_then(|v| v.parse().ok())
    }
}
