//! Extraction provider seam.
//!
//! A provider reads a whole source text and reports candidate entities,
//! decisions and actions. Deduplication, linking and provenance happen
//! afterwards and do not depend on which provider produced the candidates.

use async_trait::async_trait;

use super::entity::EntityCandidate;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCandidate {
    pub description: String,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCandidate {
    pub task: String,
    pub owner: Option<String>,
}

/// What a provider found in one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResponse {
    pub entities: Vec<EntityCandidate>,
    pub decisions: Vec<DecisionCandidate>,
    pub actions: Vec<ActionCandidate>,
}

impl ExtractionResponse {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.decisions.is_empty() && self.actions.is_empty()
    }
}

/// Input handed to a provider.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub source_id: &'a str,
    pub text: &'a str,
    pub chunks: &'a [crate::document::ChunkRecord],
}

#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Short name used in logs and circuit-breaker errors.
    fn name(&self) -> &str;

    async fn extract(&self, input: ExtractionInput<'_>) -> Result<ExtractionResponse>;
}

#[async_trait]
impl<P: ExtractionProvider + ?Sized> ExtractionProvider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn extract(&self, input: ExtractionInput<'_>) -> Result<ExtractionResponse> {
        (**self).extract(input).await
    }
}
