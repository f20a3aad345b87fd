//! Core traits for magpie collaborators.

mod embedder;
mod graph_store;
mod validator;

pub use embedder::*;
pub use graph_store::*;
pub use validator::*;
