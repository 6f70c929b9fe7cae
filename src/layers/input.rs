use std::collections::BinaryHeap;
use std::path::Path;

use anyhow::Result;
use ordered_float::OrderedFloat;

use crate::lexicon::Lexicon;
use crate::matrix::Matrix;
use crate::real;
use crate::rng::Rng;
use crate::text::PHRASE_SEPARATOR;
use crate::vecmath::{dot, safe_norm};

/// Which rows a nearest-neighbour query ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Catalog {
    All,
    /// Rows without a phrase separator.
    Words,
    /// Rows with a phrase separator.
    Phrases,
}

impl Catalog {
    /// Parses the `_all`, `_word` and `_phrase` commands of the distance loop.
    pub fn from_command(s: &str) -> Option<Catalog> {
        match s {
            "_all" => Some(Catalog::All),
            "_word" => Some(Catalog::Words),
            "_phrase" => Some(Catalog::Phrases),
            _ => None,
        }
    }

    fn admits(self, text: &str) -> bool {
        match self {
            Catalog::All => true,
            Catalog::Words => !text.contains(PHRASE_SEPARATOR),
            Catalog::Phrases => text.contains(PHRASE_SEPARATOR),
        }
    }
}

/// The embedding matrix: one row per lexicon symbol.
pub struct InputLayer {
    matrix: Matrix,
}

impl InputLayer {
    /// Random initialization, uniform in `[-1/cols, 1/cols)`.
    pub fn new(rows: usize, cols: usize) -> Result<InputLayer> {
        let matrix = Matrix::zeros(rows, cols)?;
        let mut rng = Rng(1);
        for r in 0..rows {
            for w in matrix.row(r) {
                w.set((rng.rand_real() * 2.0 - 1.0) / cols as real);
            }
        }
        Ok(InputLayer { matrix })
    }

    pub fn from_matrix(matrix: Matrix) -> InputLayer {
        InputLayer { matrix }
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn rows(&self) -> usize {
        self.matrix.rows()
    }

    pub fn cols(&self) -> usize {
        self.matrix.cols()
    }

    pub fn row_vec(&self, row: usize) -> Vec<real> {
        self.matrix.row_vec(row)
    }

    /// `out += scale * row`
    pub fn read_row(&self, row: usize, out: &mut [real], scale: real) {
        self.matrix.add_row_to(row, out, scale);
    }

    /// Adds the mean of `rows` to `out`. Out-of-range rows are skipped; a
    /// single contributing row is added as is.
    pub fn read_averaged(&self, rows: &[usize], out: &mut [real]) {
        self.average_where(rows, out, |_| true);
    }

    /// Like [`read_averaged`](InputLayer::read_averaged), but each row is
    /// first kept or dropped by the lexicon's subsampling.
    pub fn read_averaged_subsampled(
        &self,
        rows: &[usize],
        out: &mut [real],
        lexicon: &Lexicon,
        boost: real,
        rng: &mut Rng,
    ) {
        self.average_where(rows, out, |row| {
            rng.rand_real() <= lexicon.keep_probability(row, boost)
        });
    }

    fn average_where(&self, rows: &[usize], out: &mut [real], mut keep: impl FnMut(usize) -> bool) {
        let mut used = 0;
        for &row in rows {
            if row >= self.rows() || !keep(row) {
                continue;
            }
            self.read_row(row, out, 1.0);
            used += 1;
        }
        if used > 1 {
            for e in out {
                *e /= used as real;
            }
        }
    }

    /// `row += rate * delta`
    pub fn accumulate(&self, row: usize, delta: &[real], rate: real) {
        if row < self.rows() {
            self.matrix.add_to_row(row, delta, rate);
        }
    }

    /// Applies `delta` to every row, splitting `rate` evenly among them.
    pub fn accumulate_all(&self, rows: &[usize], delta: &[real], rate: real) {
        if rows.is_empty() {
            return;
        }
        let rate = rate / rows.len() as real;
        for &row in rows {
            self.accumulate(row, delta, rate);
        }
    }

    /// Cosine similarity of every admitted row to the sum of `query` rows,
    /// as a max-heap of `(similarity, row)`.
    pub fn nearest(
        &self,
        query: &[usize],
        lexicon: &Lexicon,
        catalog: Catalog,
    ) -> BinaryHeap<(OrderedFloat<real>, usize)> {
        let mut heap = BinaryHeap::new();
        let mut q = vec![0.0; self.cols()];
        let mut any = false;
        for &row in query {
            if row < self.rows() {
                self.read_row(row, &mut q, 1.0);
                any = true;
            }
        }
        if !any {
            return heap;
        }
        let qn = safe_norm(&q);

        let mut v = vec![0.0; self.cols()];
        for row in 0..self.rows().min(lexicon.len()) {
            if !catalog.admits(&lexicon.symbol(row).text) {
                continue;
            }
            v.fill(0.0);
            self.read_row(row, &mut v, 1.0);
            let sim = dot(&q, &v) / qn / safe_norm(&v);
            heap.push((OrderedFloat(sim), row));
        }
        heap
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.matrix.save(path)
    }

    pub fn load(path: &Path) -> Result<InputLayer> {
        Ok(InputLayer {
            matrix: Matrix::load(path)?,
        })
    }
}
