use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};

use crate::matrix::Matrix;
use crate::trainer::TaskKind;

/// A task's output weights: one zero-initialized row per label (or per
/// context symbol, for skip-gram).
pub struct TaskMatrix {
    kind: TaskKind,
    tag: String,
    matrix: Matrix,
}

impl TaskMatrix {
    pub fn new(kind: TaskKind, tag: &str, rows: usize, cols: usize) -> Result<TaskMatrix> {
        Ok(TaskMatrix {
            kind,
            tag: tag.to_string(),
            matrix: Matrix::zeros(rows, cols)?,
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn rows(&self) -> usize {
        self.matrix.rows()
    }

    /// `layer.output.<kind>.<tag>`
    pub fn file_name(kind: TaskKind, tag: &str) -> String {
        format!("layer.output.{kind}.{tag}")
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(Self::file_name(self.kind, &self.tag))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        self.matrix.save(&self.path_in(dir))
    }

    /// Replaces the weights with the ones saved in `dir`, which must have the
    /// same shape.
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        let path = self.path_in(dir);
        let matrix = Matrix::load(&path)?;
        ensure!(
            matrix.rows() == self.matrix.rows() && matrix.cols() == self.matrix.cols(),
            "{}: expected a {}x{} matrix, found {}x{}",
            path.display(),
            self.matrix.rows(),
            self.matrix.cols(),
            matrix.rows(),
            matrix.cols()
        );
        self.matrix = matrix;
        Ok(())
    }
}
