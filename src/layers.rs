//! The two kinds of weight matrix: the shared input embeddings and one
//! output matrix per task.

mod input;
mod output;

pub use input::{Catalog, InputLayer};
pub use output::TaskMatrix;
