use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::eval::EvalSet;
use crate::layers::InputLayer;
use crate::lexicon::Lexicon;
use crate::network::{Network, DEFAULT_RESOLVE_BOOST};
use crate::real;
use crate::rng::Rng;
use crate::text::trim;
use crate::trainer::{TaskKind, Trainer};
use crate::vocab::{build_vocabulary, TagStats, Vocabulary};

pub const LEXICON_FILE: &str = "hashtable.out";
pub const INPUT_FILE: &str = "layer.input";

/// A model: shared embeddings plus one trainer per task.
pub struct Session {
    pub(crate) net: Network,
    pub(crate) skip: Option<Trainer>,
    pub(crate) cls: BTreeMap<String, Trainer>,
    pub(crate) pair: BTreeMap<String, Trainer>,
    pub(crate) tags: TagStats,
    pub(crate) eval: EvalSet,
    /// Lines in the training corpus; one epoch.
    pub(crate) total_lines: u64,
    /// Lines consumed by all training threads together.
    pub(crate) progress: AtomicU64,
}

impl Session {
    /// Scans the training corpus and sets up a fresh model for it.
    pub fn build(config: Config) -> Result<Session> {
        let Vocabulary {
            lexicon,
            tags,
            total_lines,
        } = build_vocabulary(&config)?;
        let net = Network::new(config, lexicon)?;
        let mut session = Session::with_network(net, tags, total_lines)?;
        session.eval = EvalSet::load(&session)?;
        Ok(session)
    }

    /// Loads the model saved in `config.model_dir`.
    pub fn load(mut config: Config) -> Result<Session> {
        let Some(dir) = config.model_dir.clone() else {
            bail!("modeldir is required to load a model");
        };
        info!(dir = %dir.display(), "loading model");
        let tags = TagStats::load(&dir)?;
        let lexicon = Lexicon::load(&dir.join(LEXICON_FILE), config.subngram, config.freq_sample)?;
        let input = InputLayer::load(&dir.join(INPUT_FILE))?;
        if input.cols() != config.dim {
            warn!(
                configured = config.dim,
                saved = input.cols(),
                "using the saved embedding dimension"
            );
            config.dim = input.cols();
        }
        let net = Network::with_input(config, lexicon, input)?;
        let mut session = Session::with_network(net, tags, 0)?;

        if let Some(skip) = &mut session.skip {
            skip.output_mut().load(&dir)?;
        }
        for trainer in session.cls.values_mut() {
            trainer.output_mut().load(&dir)?;
        }
        info!(
            symbols = session.net.lexicon.len(),
            cls_tasks = session.cls.len(),
            pair_tasks = session.pair.len(),
            "model loaded"
        );
        Ok(session)
    }

    /// Creates the enabled trainers with their negative tables.
    fn with_network(net: Network, tags: TagStats, total_lines: u64) -> Result<Session> {
        let config = &net.config;
        let skip = if config.use_skipgram {
            let mut skip = Trainer::new(config, TaskKind::Skip, "skip", net.lexicon.len())?;
            skip.init_word_negatives(&net.lexicon, config.neg_table_size);
            Some(skip)
        } else {
            None
        };

        let mut cls = BTreeMap::new();
        if config.use_cls {
            for tag in tags.cls_tags.keys() {
                let cardinality = tags.cls_cardinality(tag).unwrap_or(2);
                let mut trainer = Trainer::new(config, TaskKind::Cls, tag, cardinality)?;
                trainer.init_label_negatives(&tags.cls_counts, config.neg_table_size)?;
                cls.insert(tag.clone(), trainer);
            }
        }

        let mut pair = BTreeMap::new();
        if config.use_pair {
            for tag in tags.pair_tags.keys() {
                pair.insert(tag.clone(), Trainer::new(config, TaskKind::Pair, tag, 2)?);
            }
        }

        Ok(Session {
            net,
            skip,
            cls,
            pair,
            tags,
            eval: EvalSet::default(),
            total_lines,
            progress: AtomicU64::new(0),
        })
    }

    pub fn network(&self) -> &Network {
        &self.net
    }

    pub fn config(&self) -> &Config {
        &self.net.config
    }

    pub fn tags(&self) -> &TagStats {
        &self.tags
    }

    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    /// Lines consumed by training so far, across all threads.
    pub fn lines_trained(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn skip_trainer(&self) -> Option<&Trainer> {
        self.skip.as_ref()
    }

    pub fn cls_trainer(&self, tag: &str) -> Option<&Trainer> {
        self.cls.get(tag)
    }

    pub fn pair_trainer(&self, tag: &str) -> Option<&Trainer> {
        self.pair.get(tag)
    }

    /// All trainers, skip-gram first, then classification and pair tasks by
    /// tag.
    pub fn trainers(&self) -> impl Iterator<Item = &Trainer> {
        self.skip
            .iter()
            .chain(self.cls.values())
            .chain(self.pair.values())
    }

    /// The embedding of one symbol.
    pub fn word_vector(&self, word: &str) -> Option<Vec<real>> {
        let row = self.net.lexicon.lookup(trim(word))?;
        Some(self.net.input.row_vec(row))
    }

    /// Rows for a classification or pair text at inference time.
    pub(crate) fn resolve(&self, text: &str, rng: &mut Rng) -> Vec<usize> {
        self.net.resolve(text, DEFAULT_RESOLVE_BOOST, true, rng)
    }

    /// Most likely label for `text` under task `tag`.
    pub fn predict_class(&self, tag: &str, text: &str) -> Option<usize> {
        let trainer = self.cls.get(tag)?;
        let rows = self.resolve(text, &mut Rng(1));
        if rows.is_empty() {
            return None;
        }
        trainer.predict_class(&self.net, &rows)
    }

    /// Label probabilities for `text` under task `tag`, most likely first.
    pub fn predict_distribution(&self, tag: &str, text: &str) -> Vec<(usize, real)> {
        let Some(trainer) = self.cls.get(tag) else {
            return vec![];
        };
        let rows = self.resolve(text, &mut Rng(1));
        if rows.is_empty() {
            return vec![];
        }
        trainer.predict_distribution(&self.net, &rows)
    }

    /// Similarity of two texts under pair task `tag`.
    pub fn predict_pair(&self, tag: &str, a: &str, b: &str) -> Option<real> {
        let trainer = self.pair.get(tag)?;
        let mut rng = Rng(1);
        let rows_a = self.resolve(a, &mut rng);
        let rows_b = self.resolve(b, &mut rng);
        if rows_a.is_empty() || rows_b.is_empty() {
            return None;
        }
        Some(trainer.predict_pair(&self.net, &rows_a, &rows_b))
    }

    /// Writes the model to `outputdir`, or to the first free `model_NNNN`
    /// directory. Returns the directory used.
    pub fn save(&self) -> Result<PathBuf> {
        let dir = output_dir(self.net.config.output_dir.as_deref())?;
        info!(dir = %dir.display(), "saving model");
        self.tags.save(&dir)?;
        self.net.lexicon.save(&dir.join(LEXICON_FILE))?;
        self.net.input.save(&dir.join(INPUT_FILE))?;
        for trainer in self.trainers() {
            trainer.output().save(&dir)?;
        }
        Ok(dir)
    }
}

fn output_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        return Ok(dir.to_path_buf());
    }
    for i in 0..10000 {
        let dir = PathBuf::from(format!("model_{i:04}"));
        if !dir.exists() {
            fs::create_dir(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            return Ok(dir);
        }
    }
    bail!("model_0000 through model_9999 all exist; set outputdir")
}
