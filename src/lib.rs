//! Multi-task embedding trainer: words, subwords and phrases learned jointly
//! by skip-gram, with classification and pairwise tasks sharing the same
//! input embeddings.

mod config;
mod corpus;
mod eval;
mod inference;
mod layers;
mod lexicon;
mod matrix;
mod network;
mod rng;
mod session;
mod tables;
mod text;
mod train;
mod trainer;
mod vecmath;
mod vocab;

#[allow(non_camel_case_types)]
pub type real = f32;

pub use config::{Config, Process};
pub use corpus::Example;
pub use layers::{Catalog, InputLayer, TaskMatrix};
pub use lexicon::{subword_pieces, Lexicon, Symbol};
pub use matrix::{Matrix, Real, RealF64};
pub use network::{Network, DEFAULT_RESOLVE_BOOST};
pub use rng::Rng;
pub use session::Session;
pub use tables::{LogTable, NegativeTable, SigmoidTable};
pub use text::{join_ngram, tokens, trim, PHRASE_SEPARATOR};
pub use trainer::{LossKind, TaskKind, TaskParams, Trainer, Worker};
pub use vecmath::{dot, norm};
pub use vocab::{build_vocabulary, TagStats, Vocabulary};
