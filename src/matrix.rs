use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use aligned_box::AlignedBox;
use anyhow::{anyhow, bail, ensure, Context, Result};

use crate::real;
use crate::text::trim;

/// A float shared between training threads.
///
/// Loads and stores are relaxed atomics and `add` is a plain read-modify-write,
/// so concurrent adds to one element can lose updates. Training tolerates that.
#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn new(value: real) -> Self {
        Real {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// Double-precision counterpart of [`Real`], used for loss sums.
#[derive(Default)]
pub struct RealF64 {
    bits: AtomicU64,
}

impl RealF64 {
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: f64) {
        let a = self.get();
        self.set(a + x);
    }
}

/// Row-major matrix of shared floats.
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: AlignedBox<[Real]>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Result<Matrix> {
        ensure!(
            rows > 0 && cols > 0,
            "matrix dimensions must be positive, got {rows}x{cols}"
        );
        let data = AlignedBox::slice_from_default(128, rows * cols)
            .map_err(|err| anyhow!("failed to allocate {rows}x{cols} matrix: {err:?}"))?;
        Ok(Matrix { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Panics if `row` is out of range.
    pub fn row(&self, row: usize) -> &[Real] {
        &self.data[row * self.cols..][..self.cols]
    }

    pub fn row_vec(&self, row: usize) -> Vec<real> {
        self.row(row).iter().map(Real::get).collect()
    }

    pub fn dot(&self, row: usize, v: &[real]) -> real {
        self.row(row).iter().zip(v).map(|(w, &x)| w.get() * x).sum()
    }

    /// Dot product of the row with `v ⊙ mask`.
    pub fn dot_masked(&self, row: usize, v: &[real], mask: &[real]) -> real {
        self.row(row)
            .iter()
            .zip(v)
            .zip(mask)
            .map(|((w, &x), &m)| w.get() * x * m)
            .sum()
    }

    /// `out += scale * row`
    pub fn add_row_to(&self, row: usize, out: &mut [real], scale: real) {
        for (o, w) in out.iter_mut().zip(self.row(row)) {
            *o += scale * w.get();
        }
    }

    /// `out += scale * (row ⊙ mask)`
    pub fn add_row_to_masked(&self, row: usize, out: &mut [real], scale: real, mask: &[real]) {
        for ((o, w), &m) in out.iter_mut().zip(self.row(row)).zip(mask) {
            *o += scale * w.get() * m;
        }
    }

    /// `row += scale * v`
    pub fn add_to_row(&self, row: usize, v: &[real], scale: real) {
        for (w, &x) in self.row(row).iter().zip(v) {
            w.add(scale * x);
        }
    }

    /// `row += scale * (v ⊙ mask)`
    pub fn add_to_row_masked(&self, row: usize, v: &[real], scale: real, mask: &[real]) {
        for ((w, &x), &m) in self.row(row).iter().zip(v).zip(mask) {
            w.add(scale * x * m);
        }
    }

    pub fn set_row(&self, row: usize, v: &[real]) {
        for (w, &x) in self.row(row).iter().zip(v) {
            w.set(x);
        }
    }

    /// Writes the row count, the column count, then one TAB-separated line
    /// per row.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{}", self.rows)?;
        writeln!(out, "{}", self.cols)?;
        for r in 0..self.rows {
            let line = self
                .row(r)
                .iter()
                .map(|w| w.get().to_string())
                .collect::<Vec<_>>()
                .join("\t");
            writeln!(out, "{line}")?;
        }
        out.flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Matrix> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let mut header = |what: &str| -> Result<usize> {
            let line = lines
                .next()
                .with_context(|| format!("{}: missing {what}", path.display()))??;
            trim(&line)
                .parse()
                .with_context(|| format!("{}: invalid {what} {line:?}", path.display()))
        };
        let rows = header("row count")?;
        let cols = header("column count")?;
        let matrix = Matrix::zeros(rows, cols).with_context(|| path.display().to_string())?;

        let mut row = 0;
        let mut values = Vec::with_capacity(cols);
        for (i, line) in lines.enumerate() {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            let line_no = i + 3;
            if trim(&line).is_empty() {
                continue;
            }
            if row == rows {
                bail!("{}:{line_no}: more than {rows} rows", path.display());
            }
            values.clear();
            for field in line.split('\t') {
                let x: real = trim(field).parse().with_context(|| {
                    format!("{}:{line_no}: invalid value {field:?}", path.display())
                })?;
                values.push(x);
            }
            ensure!(
                values.len() == cols,
                "{}:{line_no}: expected {cols} columns, found {}",
                path.display(),
                values.len()
            );
            matrix.set_row(row, &values);
            row += 1;
        }
        ensure!(
            row == rows,
            "{}: expected {rows} rows, found {row}",
            path.display()
        );
        Ok(matrix)
    }
}
