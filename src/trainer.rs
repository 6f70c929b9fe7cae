use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, ensure, Result};
use ordered_float::OrderedFloat;
use tracing::info;

use crate::config::Config;
use crate::layers::TaskMatrix;
use crate::lexicon::Lexicon;
use crate::matrix::RealF64;
use crate::network::{Network, DEFAULT_RESOLVE_BOOST};
use crate::real;
use crate::rng::Rng;
use crate::tables::{LogTable, NegativeTable, SigmoidTable};
use crate::text::{join_ngram, tokens};
use crate::vecmath::{dot, softmax};

/// The family a task belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskKind {
    Skip,
    Cls,
    Pair,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            TaskKind::Skip => "skip",
            TaskKind::Cls => "cls",
            TaskKind::Pair => "pair",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    /// One positive against sampled negatives.
    Sampled,
    /// Full softmax over every output row.
    Softmax,
}

/// Per-task hyperparameters.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskParams {
    /// Multiplies the learning rate.
    pub boost: real,
    /// Negative samples per positive.
    pub neg_sample: usize,
    /// Multiplies the subsampling coefficient when resolving text.
    pub boost_freq_sample: real,
    /// Train skip-gram on this task's texts too.
    pub use_as_skip_example: bool,
    pub loss: LossKind,
}

impl TaskParams {
    /// Reads `skipgram_*`, `cls_<tag>_*` or `pair_<tag>_*` keys.
    pub fn from_config(config: &Config, kind: TaskKind, tag: &str) -> TaskParams {
        let prefix = match kind {
            TaskKind::Skip => "skipgram_".to_string(),
            TaskKind::Cls => format!("cls_{tag}_"),
            TaskKind::Pair => format!("pair_{tag}_"),
        };
        let num = |name: &str| config.param_num(&format!("{prefix}{name}"));
        let text = |name: &str| config.param_str(&format!("{prefix}{name}"));

        let default_subsample = match kind {
            TaskKind::Skip => 1.0,
            TaskKind::Cls | TaskKind::Pair => DEFAULT_RESOLVE_BOOST,
        };
        TaskParams {
            boost: num("boost").filter(|&b| b >= 0.0).unwrap_or(1.0),
            neg_sample: num("neg_sample")
                .filter(|&n| n >= 0.0)
                .map_or(5, |n| n as usize),
            boost_freq_sample: num("boost_freq_sample").unwrap_or(default_subsample),
            use_as_skip_example: kind != TaskKind::Skip && text("use_as_skip_example") == Some("true"),
            loss: if kind == TaskKind::Cls && text("loss") == Some("softmax") {
                LossKind::Softmax
            } else {
                LossKind::Sampled
            },
        }
    }
}

/// Scratch space owned by one training thread.
pub struct Worker {
    pub rng: Rng,
    hidden: Vec<real>,
    other: Vec<real>,
    grad: Vec<real>,
    mask: Vec<real>,
    input: Vec<usize>,
}

impl Worker {
    pub fn new(dim: usize, seed: u64) -> Worker {
        Worker {
            rng: Rng(seed),
            hidden: vec![0.0; dim],
            other: vec![0.0; dim],
            grad: vec![0.0; dim],
            mask: vec![0.0; dim],
            input: vec![],
        }
    }
}

/// Dropout: each element is `1/keep` with probability `keep`, else 0.
fn random_mask(mask: &mut [real], keep: real, rng: &mut Rng) {
    for m in mask {
        *m = if rng.rand_real() < keep { 1.0 / keep } else { 0.0 };
    }
}

/// One task: its output matrix, negative table and running loss.
pub struct Trainer {
    params: TaskParams,
    output: TaskMatrix,
    negatives: NegativeTable,
    sigmoid: SigmoidTable,
    log: LogTable,
    loss_sum: RealF64,
    loss_count: AtomicU64,
}

impl Trainer {
    /// A trainer with a zeroed `cardinality x dim` output matrix and an empty
    /// negative table.
    pub fn new(config: &Config, kind: TaskKind, tag: &str, cardinality: usize) -> Result<Trainer> {
        ensure!(
            cardinality > 1,
            "{kind} task {tag:?} needs at least 2 outputs, got {cardinality}"
        );
        let params = TaskParams::from_config(config, kind, tag);
        info!(
            task = %kind,
            tag,
            loss = ?params.loss,
            outputs = cardinality,
            boost = params.boost,
            boost_freq_sample = params.boost_freq_sample,
            neg_sample = params.neg_sample,
            use_as_skip_example = params.use_as_skip_example,
            "task parameters"
        );
        Ok(Trainer {
            params,
            output: TaskMatrix::new(kind, tag, cardinality, config.dim)?,
            negatives: NegativeTable::empty(),
            sigmoid: SigmoidTable::new(),
            log: LogTable::new(),
            loss_sum: RealF64::default(),
            loss_count: AtomicU64::new(0),
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.output.kind()
    }

    pub fn tag(&self) -> &str {
        self.output.tag()
    }

    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    pub fn output(&self) -> &TaskMatrix {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut TaskMatrix {
        &mut self.output
    }

    pub fn negatives(&self) -> &NegativeTable {
        &self.negatives
    }

    fn table_seed(&self) -> u64 {
        self.kind() as u64 + self.output.rows() as u64
    }

    /// Negative table over the lexicon's words (rows that carry subwords),
    /// weighted by frequency.
    pub fn init_word_negatives(&mut self, lexicon: &Lexicon, size: usize) {
        let words = lexicon
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.subwords.is_empty())
            .map(|(row, s)| (row, s.freq));
        self.negatives = NegativeTable::new(words, size, self.table_seed());
    }

    /// Negative table over this task's labels, weighted by their counts in
    /// a `"tag<TAB>label" -> count` map.
    pub fn init_label_negatives(&mut self, counts: &BTreeMap<String, u32>, size: usize) -> Result<()> {
        let labels: Vec<(usize, f64)> = counts
            .iter()
            .filter_map(|(key, &count)| {
                let (tag, label) = key.split_once('\t')?;
                let label: usize = label.parse().ok()?;
                (tag == self.tag()).then_some((label, count as f64))
            })
            .collect();
        if labels.iter().all(|&(_, c)| c <= 0.0) {
            bail!("no label counts for {} task {:?}", self.kind(), self.tag());
        }
        for &(label, _) in &labels {
            ensure!(
                label < self.output.rows(),
                "{} task {:?} has a count for label {label} but only {} outputs",
                self.kind(),
                self.tag(),
                self.output.rows()
            );
        }
        self.negatives = NegativeTable::new(labels, size, self.table_seed());
        Ok(())
    }

    /// Mean loss per positive example, or -1 before there are two.
    pub fn loss(&self) -> real {
        let count = self.loss_count.load(Ordering::Relaxed);
        if count <= 1 {
            -1.0
        } else {
            (self.loss_sum.get() / count as f64) as real
        }
    }

    pub fn loss_count(&self) -> u64 {
        self.loss_count.load(Ordering::Relaxed)
    }

    fn record(&self, loss: real) {
        self.loss_sum.add(loss as f64);
    }

    /// Logistic step on one output row; `grad` collects the gradient for the
    /// hidden vector.
    fn update_batch(
        &self,
        learning_rate: real,
        hidden: &[real],
        mask: &[real],
        grad: &mut [real],
        output: usize,
        label: bool,
    ) {
        let out = self.output.matrix();
        let score = self.sigmoid.get(out.dot_masked(output, hidden, mask));
        let target = if label { 1.0 } else { 0.0 };
        self.record(if label {
            -self.log.get(score)
        } else {
            -self.log.get(1.0 - score)
        });
        let alpha = self.params.boost * learning_rate * (target - score);
        out.add_row_to_masked(output, grad, alpha, mask);
        out.add_to_row_masked(output, hidden, alpha, mask);
    }

    /// Positive step on `output`, then `neg_sample` negative steps on labels
    /// drawn from the table while avoiding `positives`. Counts as one loss
    /// sample.
    fn update_neg(
        &self,
        learning_rate: real,
        hidden: &[real],
        mask: &[real],
        grad: &mut [real],
        output: usize,
        positives: &[usize],
    ) {
        self.update_batch(learning_rate, hidden, mask, grad, output, true);
        for _ in 0..self.params.neg_sample {
            if let Some(neg) = self.negatives.sample_excluding(positives) {
                self.update_batch(learning_rate, hidden, mask, grad, neg, false);
            }
        }
        self.loss_count.fetch_add(1, Ordering::Relaxed);
    }

    fn update_softmax(
        &self,
        learning_rate: real,
        hidden: &[real],
        mask: &[real],
        grad: &mut [real],
        target: usize,
    ) {
        let out = self.output.matrix();
        let mut probs: Vec<real> = (0..out.rows())
            .map(|row| out.dot_masked(row, hidden, mask))
            .collect();
        softmax(&mut probs);
        for (row, &p) in probs.iter().enumerate() {
            let label = if row == target { 1.0 } else { 0.0 };
            let alpha = self.params.boost * learning_rate * (label - p);
            out.add_row_to_masked(row, grad, alpha, mask);
            out.add_to_row_masked(row, hidden, alpha, mask);
        }
        self.record(-self.log.get(probs[target]));
        self.loss_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Skip-gram over one text: every resolvable n-gram predicts its
    /// neighbours within a random radius.
    pub fn update_skip(&self, net: &Network, worker: &mut Worker, text: &str) {
        let words = tokens(text);
        if !net.config.accepts_len(words.len()) {
            return;
        }
        let Worker {
            rng,
            hidden,
            grad,
            mask,
            input,
            ..
        } = worker;

        let mut rows = net.lexicon.lookup_positional(&words);
        net.lexicon
            .subsample_positional(&mut rows, self.params.boost_freq_sample, rng);

        let learning_rate = net.learning_rate.get();
        for i in 0..words.len() {
            for n in 1..=net.config.ngram {
                let end = i + n - 1;
                if end >= words.len() || rows[i..=end].iter().any(Option::is_none) {
                    break;
                }
                let center = if n == 1 {
                    rows[i]
                } else {
                    net.lexicon.lookup(&join_ngram(&words[i..=end]))
                };
                let Some(center) = center else {
                    break;
                };

                input.clear();
                input.push(center);
                if n == 1 {
                    input.extend_from_slice(&net.lexicon.symbol(center).subwords);
                }
                hidden.fill(0.0);
                net.input.read_averaged(input, hidden);
                grad.fill(0.0);
                random_mask(mask, net.config.dropout_keep_rate, rng);

                let positives = [center];
                let radius = rng.rand_range(1, net.config.window_size);

                // Left context; every skipped neighbour widens the window.
                let mut bound = radius;
                let mut j = i;
                while j > 0 && i - (j - 1) <= bound {
                    j -= 1;
                    match rows[j] {
                        Some(context) => {
                            self.update_neg(learning_rate, hidden, mask, grad, context, &positives)
                        }
                        None => bound += 1,
                    }
                }

                // Right context.
                let mut bound = radius;
                let mut j = end + 1;
                while j < words.len() && j - end <= bound {
                    match rows[j] {
                        Some(context) => {
                            self.update_neg(learning_rate, hidden, mask, grad, context, &positives)
                        }
                        None => bound += 1,
                    }
                    j += 1;
                }

                net.input.accumulate_all(input, grad, 1.0);
            }
        }
    }

    /// One classification example. Out-of-vocabulary text and labels beyond
    /// the output matrix are ignored.
    pub fn update_cls(&self, net: &Network, worker: &mut Worker, text: &str, label: usize) {
        let Worker {
            rng,
            hidden,
            grad,
            mask,
            ..
        } = worker;
        let rows = net.resolve(text, self.params.boost_freq_sample, true, rng);
        if rows.is_empty() || self.params.boost <= 1e-6 || label >= self.output.rows() {
            return;
        }
        hidden.fill(0.0);
        net.input.read_averaged(&rows, hidden);
        grad.fill(0.0);
        random_mask(mask, net.config.dropout_keep_rate, rng);

        let learning_rate = net.learning_rate.get();
        match self.params.loss {
            LossKind::Softmax => self.update_softmax(learning_rate, hidden, mask, grad, label),
            LossKind::Sampled => self.update_neg(learning_rate, hidden, mask, grad, label, &[label]),
        }
        net.input.accumulate_all(&rows, grad, 1.0);
    }

    /// One pair example: each side's rows move along the other side's hidden
    /// vector. The two sides get different updates unless their hidden
    /// vectors happen to be equal.
    pub fn update_pair(&self, net: &Network, worker: &mut Worker, a: &str, b: &str, label: usize) {
        let Worker {
            rng, hidden, other, ..
        } = worker;
        let rows_a = net.resolve(a, self.params.boost_freq_sample, true, rng);
        let rows_b = net.resolve(b, self.params.boost_freq_sample, true, rng);
        if rows_a.is_empty() || rows_b.is_empty() || self.params.boost <= 1e-6 || label > 1 {
            return;
        }
        hidden.fill(0.0);
        other.fill(0.0);
        net.input.read_averaged(&rows_a, hidden);
        net.input.read_averaged(&rows_b, other);

        let score = self.sigmoid.get(dot(hidden, other));
        let target = label as real;
        self.record(if label == 1 {
            -self.log.get(score)
        } else {
            -self.log.get(1.0 - score)
        });
        self.loss_count.fetch_add(1, Ordering::Relaxed);

        let alpha = self.params.boost * net.learning_rate.get() * (target - score);
        net.input.accumulate_all(&rows_a, other, alpha);
        net.input.accumulate_all(&rows_b, hidden, alpha);
    }

    fn hidden_of(&self, net: &Network, rows: &[usize]) -> Vec<real> {
        let mut hidden = vec![0.0; net.dim()];
        net.input.read_averaged(rows, &mut hidden);
        hidden
    }

    /// Similarity probability of two resolved texts.
    pub fn predict_pair(&self, net: &Network, rows_a: &[usize], rows_b: &[usize]) -> real {
        let a = self.hidden_of(net, rows_a);
        let b = self.hidden_of(net, rows_b);
        self.sigmoid.get(dot(&a, &b))
    }

    fn scores(&self, net: &Network, rows: &[usize]) -> Vec<real> {
        let hidden = self.hidden_of(net, rows);
        let out = self.output.matrix();
        (0..out.rows()).map(|row| out.dot(row, &hidden)).collect()
    }

    /// Highest-scoring label; the first one wins ties.
    pub fn predict_class(&self, net: &Network, rows: &[usize]) -> Option<usize> {
        let mut best: Option<(usize, real)> = None;
        for (label, score) in self.scores(net, rows).into_iter().enumerate() {
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((label, score));
            }
        }
        best.map(|(label, _)| label)
    }

    /// Every label with its softmax probability, most probable first.
    pub fn predict_distribution(&self, net: &Network, rows: &[usize]) -> Vec<(usize, real)> {
        let mut probs = self.scores(net, rows);
        softmax(&mut probs);
        let mut out: Vec<(usize, real)> = probs.into_iter().enumerate().collect();
        out.sort_by_key(|&(_, p)| Reverse(OrderedFloat(p)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_read_prefixed_keys() {
        let mut config = Config::default();
        config
            .apply(
                "cls_topic_boost = 2\ncls_topic_neg_sample = 3\ncls_topic_loss = softmax\n\
                 cls_topic_use_as_skip_example = true\npair_sim_boost = -1\n",
            )
            .unwrap();
        let cls = TaskParams::from_config(&config, TaskKind::Cls, "topic");
        assert_eq!(cls.boost, 2.0);
        assert_eq!(cls.neg_sample, 3);
        assert_eq!(cls.loss, LossKind::Softmax);
        assert!(cls.use_as_skip_example);
        assert_eq!(cls.boost_freq_sample, DEFAULT_RESOLVE_BOOST);

        let pair = TaskParams::from_config(&config, TaskKind::Pair, "sim");
        assert_eq!(pair.boost, 1.0);
        assert_eq!(pair.loss, LossKind::Sampled);

        let skip = TaskParams::from_config(&config, TaskKind::Skip, "skip");
        assert_eq!(skip.neg_sample, 5);
        assert_eq!(skip.boost_freq_sample, 1.0);
    }

    #[test]
    fn label_negatives_stay_within_the_outputs() {
        let config = Config::default();
        let mut counts = BTreeMap::new();
        counts.insert("t\t0".to_string(), 4);
        counts.insert("t\t1".to_string(), 1);
        counts.insert("other\t7".to_string(), 3);

        let mut trainer = Trainer::new(&config, TaskKind::Cls, "t", 2).unwrap();
        trainer.init_label_negatives(&counts, 30).unwrap();
        assert!(trainer.negatives().len() >= 30);

        counts.insert("t\t5".to_string(), 2);
        let err = trainer.init_label_negatives(&counts, 30).unwrap_err();
        assert!(err.to_string().contains("label 5"), "{err}");
    }

    #[test]
    fn full_keep_rate_masks_nothing() {
        let mut mask = vec![0.0; 16];
        random_mask(&mut mask, 1.0, &mut Rng(3));
        assert!(mask.iter().all(|&m| m == 1.0));
        random_mask(&mut mask, 0.5, &mut Rng(3));
        assert!(mask.iter().all(|&m| m == 0.0 || m == 2.0));
    }
}
