//! Entity extraction, linking and outcome derivation.
//!
//! The [`Extractor`] asks a provider for candidates, deduplicates entities
//! through an [`EntityStore`], links chunks to entities by name containment
//! and attaches provenance chunks to every decision and action.

pub mod entity;
pub mod entity_store;
pub mod heuristic;
pub mod linker;
pub mod llm;
pub mod provider;
pub mod resilience;

pub use entity::{canonical_name, entity_id, EntityCandidate, EntityKind, EntityRecord};
pub use entity_store::{EntityStore, InMemoryEntityStore};
pub use heuristic::{HeuristicProvider, KeywordExtractor};
pub use linker::{build_outcomes, link_mentions, provenance};
pub use llm::OpenAiExtractionProvider;
pub use provider::{
    ActionCandidate, DecisionCandidate, ExtractionInput, ExtractionProvider, ExtractionResponse,
};
pub use resilience::{CircuitBreaker, CircuitState, ResilientProvider, RetryPolicy};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::document::{ActionRecord, ChunkEntityLink, ChunkRecord, DecisionRecord};
use crate::error::Result;

/// Everything extraction adds to a source's chunks.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<EntityRecord>,
    pub links: Vec<ChunkEntityLink>,
    pub decisions: Vec<DecisionRecord>,
    pub actions: Vec<ActionRecord>,
    /// Provider error, if the provider failed and the source continued without it.
    pub failure: Option<String>,
}

pub struct Extractor {
    provider: Arc<dyn ExtractionProvider>,
    store: Arc<dyn EntityStore>,
    outcome_top_n: usize,
}

impl Extractor {
    pub fn new(
        provider: Arc<dyn ExtractionProvider>,
        store: Arc<dyn EntityStore>,
        outcome_top_n: usize,
    ) -> Self {
        Self {
            provider,
            store,
            outcome_top_n,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Extract from one source. Never fails: a provider error is logged and
    /// the source keeps its parser-supplied participants only.
    pub async fn extract(
        &self,
        source_id: &str,
        text: &str,
        chunks: &[ChunkRecord],
        participants: &[String],
    ) -> Extraction {
        let input = ExtractionInput {
            source_id,
            text,
            chunks,
        };
        let (response, failure) = match self.provider.extract(input).await {
            Ok(response) => (response, None),
            Err(err) => {
                warn!(
                    source_id,
                    provider = self.provider.name(),
                    error = %err,
                    "Extraction failed, continuing without entities"
                );
                (ExtractionResponse::default(), Some(err.to_string()))
            }
        };

        let candidates = participants
            .iter()
            .map(|p| EntityCandidate::new(p.clone(), EntityKind::person()))
            .chain(response.entities);

        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for candidate in candidates {
            if candidate.canonical().is_empty() {
                continue;
            }
            let record = self.store.get_or_create(&candidate);
            if seen.insert(record.id.clone()) {
                entities.push(record);
            } else if let Some(existing) = entities.iter_mut().find(|e| e.id == record.id) {
                // keep attributes merged by the store in sync
                *existing = record;
            }
        }

        let links = link_mentions(chunks, &entities);
        let (decisions, actions) = build_outcomes(
            source_id,
            &response.decisions,
            &response.actions,
            chunks,
            self.outcome_top_n,
        );

        debug!(
            source_id,
            entities = entities.len(),
            links = links.len(),
            decisions = decisions.len(),
            actions = actions.len(),
            "Extraction complete"
        );

        Extraction {
            entities,
            links,
            decisions,
            actions,
            failure,
        }
    }
}

/// Build the configured provider, wrapped in retry and circuit-breaker
/// policies.
pub fn provider_from_config(config: &ExtractionConfig) -> Result<Arc<dyn ExtractionProvider>> {
    let retry = RetryPolicy::from_config(&config.retry);
    let provider: Arc<dyn ExtractionProvider> = match config.provider.as_str() {
        "openai" => {
            let inner = OpenAiExtractionProvider::from_env(config)?;
            let breaker = CircuitBreaker::from_config("openai", &config.circuit);
            Arc::new(ResilientProvider::new(inner, retry, breaker))
        }
        _ => Arc::new(HeuristicProvider::new()),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{chunk_id, ChunkType};
    use crate::error::Error;
    use async_trait::async_trait;

    struct Failing;

    #[async_trait]
    impl ExtractionProvider for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn extract(&self, _input: ExtractionInput<'_>) -> Result<ExtractionResponse> {
            Err(Error::CircuitOpen("failing".into()))
        }
    }

    fn chunk(seq: usize, speakers: &[&str], text: &str, chunk_type: ChunkType) -> ChunkRecord {
        ChunkRecord {
            id: chunk_id("src", seq),
            text: text.to_string(),
            sequence_number: seq,
            speakers: speakers.iter().map(|s| s.to_string()).collect(),
            chunk_type,
            importance_score: 0.5,
            start_time: None,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn extracts_links_and_outcomes_with_heuristics() {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
        let extractor = Extractor::new(Arc::new(HeuristicProvider::new()), store.clone(), 2);
        let chunks = vec![
            chunk(0, &["Anna"], "Anna: Germany looks weak this quarter.", ChunkType::Assessment),
            chunk(
                1,
                &["Luis"],
                "Luis: We decided to deprioritize Germany.",
                ChunkType::Decision,
            ),
        ];

        let extraction = extractor.extract("src", "", &chunks, &[]).await;
        assert!(extraction.failure.is_none());

        let germany = entity_id("Germany");
        assert!(extraction.entities.iter().any(|e| e.id == germany));
        let germany_links: Vec<usize> = extraction
            .links
            .iter()
            .filter(|l| l.entity_id == germany)
            .map(|l| l.chunk_sequence)
            .collect();
        assert_eq!(germany_links, vec![0, 1]);

        assert_eq!(extraction.decisions.len(), 1);
        assert_eq!(extraction.decisions[0].id, "src_d0");
        assert!(extraction.decisions[0].source_chunk_sequences.contains(&1));
        assert!(store.get(&germany).is_some());
    }

    #[tokio::test]
    async fn provider_failure_keeps_participants() {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
        let extractor = Extractor::new(Arc::new(Failing), store, 2);
        let chunks = vec![chunk(0, &["Anna"], "Anna: hello", ChunkType::Discussion)];

        let extraction = extractor
            .extract("src", "", &chunks, &["Anna".to_string()])
            .await;
        assert!(extraction.failure.is_some());
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.entities[0].kind.label(), "Person");
        assert_eq!(extraction.links.len(), 1);
        assert!(extraction.decisions.is_empty());
    }

    #[tokio::test]
    async fn entity_ids_converge_across_documents() {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
        let extractor = Extractor::new(Arc::new(HeuristicProvider::new()), store.clone(), 2);

        let a = extractor
            .extract("a", "", &[chunk(0, &["X"], "X: Brazil first.", ChunkType::Discussion)], &[])
            .await;
        let b = extractor
            .extract("b", "", &[chunk(0, &["Y"], "Y: BRAZIL later.", ChunkType::Discussion)], &[])
            .await;

        let id_a = a.entities.iter().find(|e| e.name == "Brazil").map(|e| e.id.clone());
        let id_b = b
            .entities
            .iter()
            .find(|e| canonical_name(&e.name) == "brazil")
            .map(|e| e.id.clone());
        assert_eq!(id_a, id_b);
        assert_eq!(id_a, Some(entity_id("brazil")));
    }

    #[test]
    fn heuristic_provider_is_default() {
        let provider = provider_from_config(&ExtractionConfig::default()).unwrap();
        assert_eq!(provider.name(), "heuristic");
    }
}
