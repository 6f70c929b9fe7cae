use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;

use crate::real;
use crate::rng::Rng;

const SIGMOID_TABLE_SIZE: usize = 512;
const MAX_SIGMOID: real = 8.0;
const LOG_TABLE_SIZE: usize = 512;

/// Draws per negative sample before giving up on avoiding the positives.
pub const MAX_NEGATIVE_TRIES: usize = 50;

/// Approximates the logistic function, 1 / (1 + e^-x), by table lookup.
pub struct SigmoidTable {
    table: Vec<real>,
}

impl SigmoidTable {
    pub fn new() -> Self {
        let table = (0..=SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as real * 2.0 * MAX_SIGMOID) / SIGMOID_TABLE_SIZE as real - MAX_SIGMOID;
                1.0 / (1.0 + (-x).exp())
            })
            .collect();
        SigmoidTable { table }
    }

    pub fn get(&self, x: real) -> real {
        if x < -MAX_SIGMOID {
            0.0
        } else if x > MAX_SIGMOID {
            1.0
        } else {
            let i = ((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as real / MAX_SIGMOID / 2.0) as usize;
            self.table[i]
        }
    }
}

impl Default for SigmoidTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Natural log over `(0, 1]` by table lookup.
pub struct LogTable {
    table: Vec<real>,
}

impl LogTable {
    pub fn new() -> Self {
        let table = (0..=LOG_TABLE_SIZE)
            .map(|i| ((i as real + 1e-5) / LOG_TABLE_SIZE as real).ln())
            .collect();
        LogTable { table }
    }

    pub fn get(&self, x: real) -> real {
        if x >= 1.0 {
            return 0.0;
        }
        self.table[(x.max(0.0) * LOG_TABLE_SIZE as real) as usize]
    }
}

impl Default for LogTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Labels laid out proportionally to `count^0.5`, shuffled once, and read
/// cyclically through a cursor shared by all threads.
pub struct NegativeTable {
    labels: Vec<usize>,
    cursor: AtomicUsize,
}

impl NegativeTable {
    pub fn new(counts: impl IntoIterator<Item = (usize, f64)>, size: usize, seed: u64) -> Self {
        let weights: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(label, count)| (label, count.max(0.0).powf(0.5)))
            .collect();
        let total: f64 = weights.iter().map(|&(_, w)| w).sum();

        let mut labels = vec![];
        if total > 0.0 {
            for &(label, w) in &weights {
                let copies = (w * size as f64 / total).ceil() as usize;
                labels.extend(std::iter::repeat(label).take(copies));
            }
        }
        labels.shuffle(&mut Rng(seed));
        NegativeTable {
            labels,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        NegativeTable {
            labels: vec![],
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Next label in the table; `None` if the table is empty.
    pub fn next(&self) -> Option<usize> {
        if self.labels.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.labels[i % self.labels.len()])
    }

    /// Draws until a label outside `positives` comes up, at most
    /// [`MAX_NEGATIVE_TRIES`] times; the last draw is returned either way.
    pub fn sample_excluding(&self, positives: &[usize]) -> Option<usize> {
        let mut label = self.next()?;
        for _ in 1..MAX_NEGATIVE_TRIES {
            if !positives.contains(&label) {
                break;
            }
            label = self.next()?;
        }
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_matches_logistic() {
        let s = SigmoidTable::new();
        assert_eq!(s.get(0.0), 0.5);
        assert_eq!(s.get(-9.0), 0.0);
        assert_eq!(s.get(9.0), 1.0);
        for x in [-6.0, -1.5, 0.3, 2.0, 7.9] {
            let exact = 1.0 / (1.0 + (-x as real).exp());
            assert!((s.get(x) - exact).abs() < 0.01, "sigmoid({x})");
        }
        // The top edge of the range lands on the last entry.
        assert!(s.get(8.0) > 0.999);
    }

    #[test]
    fn log_matches_ln() {
        let l = LogTable::new();
        assert_eq!(l.get(1.0), 0.0);
        assert_eq!(l.get(3.0), 0.0);
        assert!((l.get(0.5) - 0.5f32.ln()).abs() < 1e-4);
        assert!(l.get(0.0) < -10.0);
        assert!(l.get(-1.0) < -10.0);
    }

    #[test]
    fn negative_table_is_proportional_to_sqrt_counts() {
        let table = NegativeTable::new([(0, 1.0), (1, 4.0)], 300, 3);
        assert_eq!(table.len(), 300);
        let ones = table.labels.iter().filter(|&&l| l == 1).count();
        assert_eq!(ones, 200);
    }

    #[test]
    fn exclusion_skips_positives() {
        let table = NegativeTable::new([(0, 1.0), (1, 1.0), (2, 1.0)], 30, 5);
        for _ in 0..100 {
            let label = table.sample_excluding(&[1]).unwrap();
            assert_ne!(label, 1);
        }
    }

    #[test]
    fn exclusion_gives_up_on_single_label_tables() {
        let table = NegativeTable::new([(4, 2.0)], 10, 1);
        assert_eq!(table.sample_excluding(&[4]), Some(4));
        assert_eq!(NegativeTable::empty().next(), None);
    }
}
