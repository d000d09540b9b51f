//! Transcript knowledge graph library
//!
//! This library turns meeting transcripts, chat exports and plain documents
//! into a provenance-preserving knowledge graph:
//! - Segment sources into classified, importance-scored chunks
//! - Extract and link entities, decisions and action items
//! - Load everything idempotently into Neo4j and a MySQL mirror
//! - Answer entity, full-text, expansion, outcome and timeline queries
//! - Assemble ranked context blocks for a downstream reasoning layer

pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod ingest;
pub mod integrations;
pub mod metrics;
pub mod prompts;
pub mod retrieval;
pub mod segmentation;

// Re-export common types
pub use config::Config;
pub use document::{ChunkType, Document, SourceCategory};
pub use error::{Error, Result};
pub use graph::{GraphLoader, LoadReport, MemoryGraph, MySqlSink, Neo4jGraph};
pub use ingest::{IngestPipeline, IngestionState, Poller, RunGuard, SourceInput};
pub use integrations::OpenAIClient;
pub use prompts::{load_prompt, Prompt};
pub use retrieval::{ContextBlock, RetrievalEngine};
pub use segmentation::Segmenter;
