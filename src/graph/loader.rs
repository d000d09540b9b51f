//! Dual-sink loader.
//!
//! Sinks are written one after another and independently: a sink that fails
//! a batch does not stop the other sinks, and nothing is rolled back. Each
//! batch is retried a bounded number of times before it is skipped and
//! recorded in the [`LoadReport`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use super::{plan_batches, BatchKind, GraphSink, SinkStats, WriteBatch};
use crate::config::LoaderConfig;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::metrics;

/// A batch the loader gave up on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub sink: String,
    pub batch: usize,
    pub kind: BatchKind,
    pub error: String,
}

impl BatchFailure {
    pub fn to_error(&self) -> Error {
        Error::LoadFailure {
            sink: self.sink.clone(),
            batch: self.batch,
            reason: format!("{} batch: {}", self.kind, self.error),
        }
    }
}

/// Outcome of loading one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub source_id: String,
    pub batches: usize,
    /// Batch writes that succeeded, summed over sinks.
    pub written: usize,
    pub failures: Vec<BatchFailure>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Sinks with at least one skipped batch.
    pub fn failed_sinks(&self) -> Vec<&str> {
        let mut sinks: Vec<&str> = self.failures.iter().map(|f| f.sink.as_str()).collect();
        sinks.dedup();
        sinks
    }
}

pub struct GraphLoader {
    sinks: Vec<Arc<dyn GraphSink>>,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl GraphLoader {
    pub fn new(sinks: Vec<Arc<dyn GraphSink>>, config: &LoaderConfig) -> Self {
        Self {
            sinks,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn sinks(&self) -> &[Arc<dyn GraphSink>] {
        &self.sinks
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Create schema on every sink. All sinks are attempted; the first
    /// failure is returned afterwards.
    pub async fn create_schema(&self) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            match sink.create_schema().await {
                Ok(()) => info!(sink = sink.name(), "Schema ready"),
                Err(err) => {
                    error!(sink = sink.name(), error = %err, "Schema creation failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Load one document into every sink.
    ///
    /// Only an invalid document is an error. Batch failures are retried,
    /// then skipped and reported; earlier batches stay committed.
    pub async fn load(&self, doc: &Document) -> Result<LoadReport> {
        doc.validate()?;
        let batches = plan_batches(doc, self.batch_size);
        let mut report = LoadReport {
            source_id: doc.source.id.clone(),
            batches: batches.len(),
            ..Default::default()
        };

        for sink in &self.sinks {
            let mut skipped = 0;
            for (index, batch) in batches.iter().enumerate() {
                match self.write_with_retry(sink.as_ref(), index, batch).await {
                    Ok(()) => report.written += 1,
                    Err(err) => {
                        skipped += 1;
                        metrics::record_batch_failure(sink.name());
                        error!(
                            source_id = %doc.source.id,
                            sink = sink.name(),
                            batch = index,
                            kind = %batch.kind(),
                            rows = batch.len(),
                            error = %err,
                            "Batch skipped after retries"
                        );
                        report.failures.push(BatchFailure {
                            sink: sink.name().to_string(),
                            batch: index,
                            kind: batch.kind(),
                            error: err.to_string(),
                        });
                    }
                }
            }

            if skipped > 0 {
                warn!(
                    source_id = %doc.source.id,
                    sink = sink.name(),
                    skipped,
                    total = batches.len(),
                    "Sink partially written; rerun ingestion to reconcile"
                );
            } else {
                info!(
                    source_id = %doc.source.id,
                    sink = sink.name(),
                    batches = batches.len(),
                    "Document loaded"
                );
            }
        }

        Ok(report)
    }

    async fn write_with_retry(
        &self,
        sink: &dyn GraphSink,
        index: usize,
        batch: &WriteBatch,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match sink.write(batch).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        sink = sink.name(),
                        batch = index,
                        kind = %batch.kind(),
                        attempt,
                        error = %err,
                        "Batch write failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Counts from every sink. A sink that cannot report is logged and left out.
    pub async fn stats(&self) -> Vec<SinkStats> {
        let mut all = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            match sink.stats().await {
                Ok(stats) => all.push(stats),
                Err(err) => warn!(sink = sink.name(), error = %err, "Stats unavailable"),
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{
        chunk_id, ChunkEntityLink, ChunkRecord, ChunkType, DecisionRecord, SourceCategory,
        SourceRecord,
    };
    use crate::extraction::{entity_id, EntityKind, EntityRecord};
    use crate::graph::{
        GraphReader, MemoryGraph, LABEL_CHUNK, REL_MENTIONS, REL_NEXT, REL_RESULTED_IN,
    };

    fn doc(n: usize) -> Document {
        Document {
            source: SourceRecord {
                id: "src".into(),
                title: "Sync".into(),
                date: None,
                end_date: None,
                category: SourceCategory::Meeting,
                participants: vec![],
            },
            chunks: (0..n)
                .map(|seq| ChunkRecord {
                    id: chunk_id("src", seq),
                    text: format!("chunk {}", seq),
                    sequence_number: seq,
                    speakers: vec!["Anna".into()],
                    chunk_type: ChunkType::Discussion,
                    importance_score: 0.5,
                    start_time: None,
                    embedding: None,
                })
                .collect(),
            entities: vec![],
            chunk_entity_links: vec![],
            decisions: vec![],
            actions: vec![],
        }
    }

    fn config(max_retries: u32) -> LoaderConfig {
        LoaderConfig {
            batch_size: 2,
            max_retries,
            retry_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn retries_transient_batch_failures() {
        let graph = Arc::new(MemoryGraph::new());
        graph.fail_writes(2);
        let loader = GraphLoader::new(vec![graph.clone()], &config(3));

        let report = loader.load(&doc(3)).await.unwrap();
        assert!(report.is_complete());
        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.node_count(LABEL_CHUNK), 3);
        assert_eq!(stats.relationship_count(REL_NEXT), 2);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_other() {
        let broken = Arc::new(MemoryGraph::new());
        broken.fail_writes(usize::MAX);
        let healthy = Arc::new(MemoryGraph::new());
        let loader = GraphLoader::new(vec![broken.clone(), healthy.clone()], &config(1));

        let report = loader.load(&doc(3)).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), report.batches);
        assert_eq!(report.failed_sinks(), vec!["memory"]);
        assert_eq!(report.failures[0].kind, BatchKind::Sources);
        assert!(matches!(
            report.failures[0].to_error(),
            Error::LoadFailure { batch: 0, .. }
        ));

        let stats = healthy.stats().await.unwrap();
        assert_eq!(stats.node_count(LABEL_CHUNK), 3);
    }

    #[tokio::test]
    async fn skipped_batch_does_not_stop_later_batches() {
        let graph = Arc::new(MemoryGraph::new());
        let loader = GraphLoader::new(vec![graph.clone()], &config(0));
        graph.fail_writes(1);

        let report = loader.load(&doc(2)).await.unwrap();
        let kinds: Vec<BatchKind> = report.failures.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![BatchKind::Sources, BatchKind::Chunks]);
        assert_eq!(report.written, report.batches - 2);
        assert!(graph.source("src").is_none());
        assert!(graph.chunk("src_c0001").is_none());
        assert!(graph.has_edge("src_c0000", REL_NEXT, "src_c0001"));
    }

    #[tokio::test]
    async fn links_follow_chunk_ids_that_are_not_derived() {
        let graph = Arc::new(MemoryGraph::new());
        let loader = GraphLoader::new(vec![graph.clone()], &config(0));
        let mut d = doc(1);
        d.chunks[0].id = "chunk-a".into();
        d.entities = vec![EntityRecord {
            id: entity_id("Germany"),
            name: "Germany".into(),
            kind: EntityKind::topic(),
        }];
        d.chunk_entity_links = vec![ChunkEntityLink {
            chunk_sequence: 0,
            entity_id: entity_id("Germany"),
        }];
        d.decisions = vec![DecisionRecord {
            id: "src_d0".into(),
            description: "Deprioritize Germany".into(),
            rationale: None,
            source_chunk_sequences: vec![0],
        }];

        let report = loader.load(&d).await.unwrap();
        assert!(report.is_complete());
        assert!(graph.has_edge("chunk-a", REL_MENTIONS, &entity_id("Germany")));
        assert!(graph.has_edge("chunk-a", REL_RESULTED_IN, "src_d0"));
        assert!(!graph.has_edge("src_c0000", REL_MENTIONS, &entity_id("Germany")));

        let hits = graph.outcomes("germany", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunks.len(), 1);
        assert_eq!(hits[0].chunks[0].chunk_id, "chunk-a");
    }

    #[tokio::test]
    async fn invalid_document_is_rejected() {
        let graph = Arc::new(MemoryGraph::new());
        let loader = GraphLoader::new(vec![graph], &config(0));
        let mut bad = doc(2);
        bad.chunks[1].sequence_number = 5;
        assert!(loader.load(&bad).await.is_err());
    }

    #[tokio::test]
    async fn reloading_is_idempotent() {
        let graph = Arc::new(MemoryGraph::new());
        let loader = GraphLoader::new(vec![graph.clone()], &config(0));
        loader.load(&doc(4)).await.unwrap();
        let once = loader.stats().await;
        loader.load(&doc(4)).await.unwrap();
        assert_eq!(once, loader.stats().await);
        assert!(loader.create_schema().await.is_ok());
    }
}
