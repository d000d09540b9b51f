//! [`RetrievalEngine`]: timed, validated queries over a [`GraphReader`].

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::context::{assemble, ContextBlock};
use crate::config::RetrievalConfig;
use crate::document::ChunkType;
use crate::error::{Error, Result};
use crate::extraction::KeywordExtractor;
use crate::graph::{ChunkHit, GraphReader, OutcomeHit, VectorIndex};
use crate::metrics;

/// Read-only query operations over the persisted graph.
pub struct RetrievalEngine {
    reader: Arc<dyn GraphReader>,
    vectors: Option<Arc<dyn VectorIndex>>,
    config: RetrievalConfig,
    keywords: KeywordExtractor,
}

impl RetrievalEngine {
    pub fn new(reader: Arc<dyn GraphReader>, config: RetrievalConfig) -> Self {
        Self {
            reader,
            vectors: None,
            config,
            keywords: KeywordExtractor::new(),
        }
    }

    pub fn with_vectors(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        metrics::record_query(operation, started.elapsed());
        result.map_err(|err| {
            warn!(operation, error = %err, "Query failed");
            match err {
                Error::QueryFailure(_) => err,
                other => Error::QueryFailure(format!("{}: {}", operation, other)),
            }
        })
    }

    /// Chunks mentioning an entity whose name contains `name`.
    pub async fn entity_chunks(&self, name: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        self.timed("entity", self.reader.chunks_mentioning(name, limit))
            .await
    }

    pub async fn full_text(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        self.timed("full_text", self.reader.full_text(query, limit))
            .await
    }

    /// The chunk and its neighbours along the ordering chain.
    pub async fn expand(&self, chunk_id: &str, before: usize, after: usize) -> Result<Vec<ChunkHit>> {
        self.timed("expand", self.reader.chunk_context(chunk_id, before, after))
            .await
    }

    pub async fn outcomes(&self, keyword: &str, limit: usize) -> Result<Vec<OutcomeHit>> {
        self.timed("outcomes", self.reader.outcomes(keyword, limit))
            .await
    }

    /// Chronological mentions of an entity, bounded by `timeline_limit`.
    pub async fn evolution(
        &self,
        entity: &str,
        chunk_type: Option<ChunkType>,
    ) -> Result<Vec<ChunkHit>> {
        self.timed(
            "evolution",
            self.reader
                .entity_timeline(entity, chunk_type, self.config.timeline_limit),
        )
        .await
    }

    pub async fn similar(&self, vector: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        let Some(index) = &self.vectors else {
            return Err(Error::QueryFailure("no vector index configured".into()));
        };
        self.timed("similar", index.similar_chunks(vector, limit))
            .await
    }

    /// Entity-anchored plus full-text retrieval merged into one block.
    ///
    /// Seeds are `entities` when given, otherwise names picked out of the
    /// query. `max_chunks` defaults to `context_max_chunks`.
    pub async fn context(
        &self,
        query: &str,
        entities: &[String],
        max_chunks: Option<usize>,
    ) -> Result<ContextBlock> {
        if query.trim().is_empty() {
            return Err(Error::QueryFailure("context query must not be empty".into()));
        }
        let max_chunks = max_chunks.unwrap_or(self.config.context_max_chunks).max(1);

        let seeds: Vec<String> = if entities.is_empty() {
            self.keywords.extract(query)
        } else {
            entities
                .iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect()
        };

        let mut candidates = Vec::new();
        for seed in &seeds {
            candidates.extend(self.entity_chunks(seed, max_chunks).await?);
        }
        candidates.extend(self.full_text(query, max_chunks).await?);

        let block = assemble(query, candidates, max_chunks);
        debug!(
            seeds = ?seeds,
            chunks = block.len(),
            "Context assembled"
        );
        Ok(block)
    }
}
