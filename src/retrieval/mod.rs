//! Retrieval over the persisted graph and context assembly.

pub mod context;
pub mod engine;

pub use context::{assemble, render, ContextBlock};
pub use engine::RetrievalEngine;
