use std::path::Path;

use serde::Serialize;
use tracing::{error, info, warn};

use super::sources::{discover, load_source, parse_source, SourceInput};
use super::state::IngestionState;
use crate::document::Document;
use crate::embeddings::EmbedBackend;
use crate::error::Result;
use crate::extraction::Extractor;
use crate::graph::{GraphLoader, LoadReport};
use crate::metrics;
use crate::segmentation::Segmenter;

/// A source that could not be ingested in this run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    /// Source id when the content could be read, otherwise the path.
    pub source: String,
    pub title: String,
    pub error: String,
}

/// What one batch run did, per source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub ingested: Vec<String>,
    pub skipped: Vec<String>,
    /// Loaded with at least one skipped batch; retried on the next run.
    pub incomplete: Vec<String>,
    pub failed: Vec<SourceFailure>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.ingested.len() + self.skipped.len() + self.incomplete.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.incomplete.is_empty() && self.failed.is_empty()
    }
}

/// Segmentation, extraction and loading for one source at a time.
pub struct IngestPipeline {
    segmenter: Segmenter,
    extractor: Extractor,
    loader: GraphLoader,
    embedder: Option<EmbedBackend>,
}

impl IngestPipeline {
    pub fn new(segmenter: Segmenter, extractor: Extractor, loader: GraphLoader) -> Self {
        Self {
            segmenter,
            extractor,
            loader,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: EmbedBackend) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn loader(&self) -> &GraphLoader {
        &self.loader
    }

    /// Build the intermediate document for one source without loading it.
    pub async fn build_document(&self, input: &SourceInput) -> Result<Document> {
        let parsed = parse_source(input, &self.segmenter)?;
        let source_id = parsed.record.id.clone();
        let mut chunks = parsed.segmentation.into_chunks(&source_id);

        if let Some(embedder) = &self.embedder {
            if let Err(err) = embedder.embed_chunks(&mut chunks).await {
                warn!(source_id = %source_id, error = %err, "Embedding failed, loading without vectors");
                for chunk in chunks.iter_mut() {
                    chunk.embedding = None;
                }
            }
        }

        let extraction = self
            .extractor
            .extract(&source_id, &parsed.text, &chunks, &parsed.record.participants)
            .await;

        Ok(Document {
            source: parsed.record,
            chunks,
            entities: extraction.entities,
            chunk_entity_links: extraction.links,
            decisions: extraction.decisions,
            actions: extraction.actions,
        })
    }

    /// Build and load one source.
    pub async fn ingest(&self, input: &SourceInput) -> Result<LoadReport> {
        let doc = self.build_document(input).await?;
        info!(
            source_id = %doc.source.id,
            title = %doc.source.title,
            category = %doc.source.category,
            chunks = doc.chunks.len(),
            entities = doc.entities.len(),
            "Loading source"
        );
        self.loader.load(&doc).await
    }

    /// Ingest `inputs` in order. Sources already in `state` are skipped
    /// unless `force` is set; a failing source never stops the run.
    pub async fn run_batch(
        &self,
        inputs: &[SourceInput],
        state: &mut IngestionState,
        force: bool,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for input in inputs {
            let source_id = input.id();
            if !force && state.is_processed(&source_id) {
                metrics::record_source("skipped");
                summary.skipped.push(source_id);
                continue;
            }

            match self.ingest(input).await {
                Ok(report) if report.is_complete() => {
                    metrics::record_source("ingested");
                    state.mark_processed(source_id.clone());
                    summary.ingested.push(source_id);
                }
                Ok(report) => {
                    metrics::record_source("failed");
                    warn!(
                        source_id = %source_id,
                        failed_sinks = ?report.failed_sinks(),
                        failures = report.failures.len(),
                        "Source partially loaded, left unprocessed"
                    );
                    summary.incomplete.push(source_id);
                }
                Err(err) => {
                    metrics::record_source("failed");
                    error!(
                        source_id = %source_id,
                        path = %input.path.display(),
                        error = %err,
                        "Source failed"
                    );
                    summary.failed.push(SourceFailure {
                        source: source_id,
                        title: input.title.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        summary
    }

    /// Discover sources under `dir`, run them against the state file and
    /// persist the updated state.
    pub async fn run_dir(&self, dir: &Path, state_file: &Path, force: bool) -> Result<RunSummary> {
        let mut state = IngestionState::load(state_file);
        let mut inputs = Vec::new();
        let mut unreadable = Vec::new();

        for path in discover(dir)? {
            match load_source(&path) {
                Ok(input) => inputs.push(input),
                Err(err) => {
                    metrics::record_source("failed");
                    error!(path = %path.display(), error = %err, "Cannot read source");
                    unreadable.push(SourceFailure {
                        source: path.display().to_string(),
                        title: path.display().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            dir = %dir.display(),
            sources = inputs.len(),
            already_processed = state.len(),
            force,
            "Starting ingestion run"
        );

        let mut summary = self.run_batch(&inputs, &mut state, force).await;
        summary.failed.extend(unreadable);
        state.save(state_file)?;

        info!(
            ingested = summary.ingested.len(),
            skipped = summary.skipped.len(),
            incomplete = summary.incomplete.len(),
            failed = summary.failed.len(),
            "Ingestion run finished"
        );
        Ok(summary)
    }
}
