use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use tracing::info;

use crate::corpus::Example;
use crate::real;
use crate::rng::Rng;
use crate::session::Session;
use crate::text::trim;

struct ClsCase {
    tag: String,
    label: usize,
    rows: Vec<usize>,
}

struct PairCase {
    tag: String,
    label: usize,
    rows_a: Vec<usize>,
    rows_b: Vec<usize>,
}

/// Held-out examples, resolved to rows once before training.
#[derive(Default)]
pub struct EvalSet {
    cls: Vec<ClsCase>,
    pair: Vec<PairCase>,
}

impl EvalSet {
    /// Reads `evalfile`, if one is configured and a supervised task is on.
    /// Examples that don't parse or resolve to nothing are left out.
    pub fn load(session: &Session) -> Result<EvalSet> {
        let config = session.config();
        let mut set = EvalSet::default();
        let Some(path) = &config.eval_file else {
            return Ok(set);
        };
        if !config.use_cls && !config.use_pair {
            return Ok(set);
        }

        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut rng = Rng(1);
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            let line = trim(&line).to_ascii_lowercase();
            match Example::parse(&line, config) {
                Some(Example::Cls { tag, label, text }) => {
                    let rows = session.resolve(text, &mut rng);
                    if !rows.is_empty() {
                        set.cls.push(ClsCase {
                            tag: tag.to_string(),
                            label,
                            rows,
                        });
                    }
                }
                Some(Example::Pair { tag, label, a, b }) => {
                    let rows_a = session.resolve(a, &mut rng);
                    let rows_b = session.resolve(b, &mut rng);
                    if !rows_a.is_empty() && !rows_b.is_empty() {
                        set.pair.push(PairCase {
                            tag: tag.to_string(),
                            label,
                            rows_a,
                            rows_b,
                        });
                    }
                }
                _ => {}
            }
        }
        info!(
            file = %path.display(),
            cls = set.cls.len(),
            pair = set.pair.len(),
            "loaded evaluation examples"
        );
        Ok(set)
    }
}

/// Per-tag accuracy.
pub type Accuracy = BTreeMap<String, real>;

fn accuracy(tally: BTreeMap<String, (u32, u32)>) -> Accuracy {
    tally
        .into_iter()
        .map(|(tag, (wrong, right))| (tag, right as real / (wrong + right) as real))
        .collect()
}

impl Session {
    /// Classification accuracy per tag over the evaluation set.
    pub fn eval_cls(&self) -> Accuracy {
        let mut tally: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        for case in &self.eval.cls {
            let Some(trainer) = self.cls.get(&case.tag) else {
                continue;
            };
            let Some(predicted) = trainer.predict_class(&self.net, &case.rows) else {
                continue;
            };
            let entry = tally.entry(case.tag.clone()).or_default();
            if predicted == case.label {
                entry.1 += 1;
            } else {
                entry.0 += 1;
            }
        }
        accuracy(tally)
    }

    /// Pair accuracy per tag; a score above 0.5 predicts label 1.
    pub fn eval_pair(&self) -> Accuracy {
        let mut tally: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        for case in &self.eval.pair {
            let Some(trainer) = self.pair.get(&case.tag) else {
                continue;
            };
            let score = trainer.predict_pair(&self.net, &case.rows_a, &case.rows_b);
            let predicted = usize::from(score > 0.5);
            let entry = tally.entry(case.tag.clone()).or_default();
            if predicted == case.label {
                entry.1 += 1;
            } else {
                entry.0 += 1;
            }
        }
        accuracy(tally)
    }
}
