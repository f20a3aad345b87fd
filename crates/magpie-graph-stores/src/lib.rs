//! magpie-graph-stores - Graph store implementations for magpie.
//!
//! This crate provides persistent `GraphStore` backends for the resolved
//! entity graph.
//!
//! # Supported Backends
//!
//! - **Embedded** (feature: `embedded`, default) - SQLite history with an
//!   in-memory petgraph view

#[cfg(feature = "embedded")]
pub mod embedded;

#[cfg(feature = "embedded")]
pub use embedded::EmbeddedGraphStore;

// Re-export core types
pub use magpie_core::traits::GraphStore;
