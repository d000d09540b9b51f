//! In-process graph used for tests and offline runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{
    missing_source, outcome_cmp, rank_cmp, score_cmp, timeline_cmp, ChunkHit, GraphReader,
    GraphSink, OutcomeHit, OutcomeKind, OutcomeRecord, SinkStats, VectorIndex, WriteBatch,
    LABEL_ACTION,
    LABEL_CHUNK, LABEL_DECISION, LABEL_ENTITY, LABEL_SOURCE, REL_MENTIONS, REL_NEXT,
    REL_PARTICIPATES_IN, REL_PART_OF, REL_PRODUCED, REL_RESULTED_IN,
};
use crate::document::{ChunkRecord, ChunkType, SourceRecord};
use crate::embeddings::cosine_similarity;
use crate::error::{Error, Result};
use crate::extraction::EntityRecord;

type Edge = (String, &'static str, String);

#[derive(Debug, Default)]
struct Store {
    sources: BTreeMap<String, SourceRecord>,
    /// chunk id -> (source id, chunk)
    chunks: BTreeMap<String, (String, ChunkRecord)>,
    entities: BTreeMap<String, EntityRecord>,
    /// outcome id -> (source id, outcome)
    outcomes: BTreeMap<String, (String, OutcomeRecord)>,
    edges: BTreeSet<Edge>,
}

impl Store {
    fn hit(&self, chunk_id: &str) -> Option<ChunkHit> {
        let (source_id, chunk) = self.chunks.get(chunk_id)?;
        let source = self.sources.get(source_id);
        Some(ChunkHit {
            chunk_id: chunk.id.clone(),
            text: chunk.text.clone(),
            sequence_number: chunk.sequence_number,
            speakers: chunk.speakers.clone(),
            chunk_type: chunk.chunk_type,
            importance_score: chunk.importance_score,
            source_id: source_id.clone(),
            source_title: source.map(|s| s.title.clone()).unwrap_or_default(),
            source_date: source.and_then(|s| s.date.clone()),
            score: None,
        })
    }

    fn edges_of<'a>(&'a self, rel: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |(_, r, _)| *r == rel)
    }

    fn matching_entities(&self, pattern: &str) -> BTreeSet<&str> {
        let needle = pattern.to_lowercase();
        self.entities
            .values()
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .map(|e| e.id.as_str())
            .collect()
    }

    fn mentioning(&self, pattern: &str) -> Vec<ChunkHit> {
        let entities = self.matching_entities(pattern);
        let chunk_ids: BTreeSet<&str> = self
            .edges_of(REL_MENTIONS)
            .filter(|(_, _, to)| entities.contains(to.as_str()))
            .map(|(from, _, _)| from.as_str())
            .collect();
        chunk_ids.into_iter().filter_map(|id| self.hit(id)).collect()
    }

    fn neighbour(&self, chunk_id: &str, forward: bool) -> Option<&str> {
        self.edges_of(REL_NEXT).find_map(|(from, _, to)| {
            if forward && from == chunk_id {
                Some(to.as_str())
            } else if !forward && to == chunk_id {
                Some(from.as_str())
            } else {
                None
            }
        })
    }
}

/// A graph held in memory. Implements the sink, reader and vector traits.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    store: RwLock<Store>,
    failures_left: AtomicUsize,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with a transient error.
    pub fn fail_writes(&self, n: usize) {
        self.failures_left.store(n, AtomicOrdering::SeqCst);
    }

    pub fn source(&self, id: &str) -> Option<SourceRecord> {
        self.read().sources.get(id).cloned()
    }

    pub fn entity(&self, id: &str) -> Option<EntityRecord> {
        self.read().entities.get(id).cloned()
    }

    pub fn chunk(&self, id: &str) -> Option<ChunkRecord> {
        self.read().chunks.get(id).map(|(_, c)| c.clone())
    }

    pub fn has_edge(&self, from: &str, rel_type: &str, to: &str) -> bool {
        self.read()
            .edges
            .iter()
            .any(|(f, r, t)| f == from && *r == rel_type && t == to)
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_left
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
    }
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::QueryFailure(format!("{} must not be empty", what)));
    }
    Ok(())
}

#[async_trait]
impl GraphSink for MemoryGraph {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn write(&self, batch: &WriteBatch) -> Result<()> {
        if self.take_injected_failure() {
            return Err(Error::GraphError(format!(
                "injected failure on {} batch",
                batch.kind()
            )));
        }

        let mut store = self.write_lock();
        if let Some(source_id) = batch.anchor_source() {
            if !store.sources.contains_key(source_id) {
                return Err(missing_source(source_id));
            }
        }
        match batch {
            WriteBatch::Sources(rows) => {
                for source in rows {
                    store.sources.insert(source.id.clone(), source.clone());
                }
            }
            WriteBatch::Entities(rows) => {
                for entity in rows {
                    store
                        .entities
                        .entry(entity.id.clone())
                        .and_modify(|existing| existing.kind.merge_missing(&entity.kind))
                        .or_insert_with(|| entity.clone());
                }
            }
            WriteBatch::Chunks { source_id, rows } => {
                for chunk in rows {
                    store
                        .chunks
                        .insert(chunk.id.clone(), (source_id.clone(), chunk.clone()));
                    store
                        .edges
                        .insert((chunk.id.clone(), REL_PART_OF, source_id.clone()));
                }
            }
            WriteBatch::Next(pairs) => {
                for (from, to) in pairs {
                    store.edges.insert((from.clone(), REL_NEXT, to.clone()));
                }
            }
            WriteBatch::Mentions(pairs) => {
                for (chunk, entity) in pairs {
                    store
                        .edges
                        .insert((chunk.clone(), REL_MENTIONS, entity.clone()));
                }
            }
            WriteBatch::Outcomes { source_id, rows } => {
                for outcome in rows {
                    let id = outcome.id().to_string();
                    store
                        .outcomes
                        .insert(id.clone(), (source_id.clone(), outcome.clone()));
                    store.edges.insert((source_id.clone(), REL_PRODUCED, id));
                }
            }
            WriteBatch::ResultedIn(pairs) => {
                for (chunk, outcome) in pairs {
                    store
                        .edges
                        .insert((chunk.clone(), REL_RESULTED_IN, outcome.clone()));
                }
            }
            WriteBatch::Participates {
                source_id,
                entity_ids,
            } => {
                for entity in entity_ids {
                    store
                        .edges
                        .insert((entity.clone(), REL_PARTICIPATES_IN, source_id.clone()));
                }
            }
        }
        debug!(kind = %batch.kind(), rows = batch.len(), "Applied batch to memory graph");
        Ok(())
    }

    async fn stats(&self) -> Result<SinkStats> {
        let store = self.read();
        let mut stats = SinkStats::new(self.name());

        let decisions = store
            .outcomes
            .values()
            .filter(|(_, o)| matches!(o, OutcomeRecord::Decision(_)))
            .count();
        for (label, count) in [
            (LABEL_SOURCE, store.sources.len()),
            (LABEL_CHUNK, store.chunks.len()),
            (LABEL_ENTITY, store.entities.len()),
            (LABEL_DECISION, decisions),
            (LABEL_ACTION, store.outcomes.len() - decisions),
        ] {
            stats.nodes.insert(label.to_string(), count as u64);
        }
        for (_, rel, _) in &store.edges {
            *stats.relationships.entry(rel.to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl GraphReader for MemoryGraph {
    async fn chunks_mentioning(&self, pattern: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        require(pattern, "entity pattern")?;
        let mut hits = self.read().mentioning(pattern);
        hits.sort_by(rank_cmp);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn full_text(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| {
                t.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Err(Error::QueryFailure("full-text query must not be empty".into()));
        }

        let store = self.read();
        let mut hits: Vec<ChunkHit> = store
            .chunks
            .keys()
            .filter_map(|id| {
                let mut hit = store.hit(id)?;
                let text = hit.text.to_lowercase();
                let score: usize = terms.iter().map(|t| text.matches(t.as_str()).count()).sum();
                if score == 0 {
                    return None;
                }
                hit.score = Some(score as f64);
                Some(hit)
            })
            .collect();
        hits.sort_by(score_cmp);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn chunk_context(
        &self,
        chunk_id: &str,
        before: usize,
        after: usize,
    ) -> Result<Vec<ChunkHit>> {
        let store = self.read();
        let Some(center) = store.hit(chunk_id) else {
            return Ok(Vec::new());
        };

        let mut preceding = Vec::new();
        let mut cursor = chunk_id.to_string();
        for _ in 0..before {
            match store.neighbour(&cursor, false).and_then(|id| store.hit(id)) {
                Some(hit) => {
                    cursor = hit.chunk_id.clone();
                    preceding.push(hit);
                }
                None => break,
            }
        }
        preceding.reverse();

        let mut following = Vec::new();
        let mut cursor = chunk_id.to_string();
        for _ in 0..after {
            match store.neighbour(&cursor, true).and_then(|id| store.hit(id)) {
                Some(hit) => {
                    cursor = hit.chunk_id.clone();
                    following.push(hit);
                }
                None => break,
            }
        }

        let mut window = preceding;
        window.push(center);
        window.extend(following);
        Ok(window)
    }

    async fn outcomes(&self, keyword: &str, limit: usize) -> Result<Vec<OutcomeHit>> {
        require(keyword, "outcome keyword")?;
        let needle = keyword.to_lowercase();
        let contains = |s: &str| s.to_lowercase().contains(&needle);

        let store = self.read();
        let mut hits: Vec<OutcomeHit> = store
            .outcomes
            .iter()
            .filter_map(|(id, (source_id, outcome))| {
                let (kind, text, rationale, owner) = match outcome {
                    OutcomeRecord::Decision(d) => (
                        OutcomeKind::Decision,
                        d.description.clone(),
                        d.rationale.clone(),
                        None,
                    ),
                    OutcomeRecord::Action(a) => {
                        (OutcomeKind::Action, a.task.clone(), None, a.owner.clone())
                    }
                };
                let matched = contains(&text)
                    || rationale.as_deref().is_some_and(contains)
                    || owner.as_deref().is_some_and(contains);
                if !matched {
                    return None;
                }

                let mut chunks: Vec<ChunkHit> = store
                    .edges_of(REL_RESULTED_IN)
                    .filter(|(_, _, to)| to == id)
                    .filter_map(|(from, _, _)| store.hit(from))
                    .collect();
                chunks.sort_by_key(|c| c.sequence_number);

                let source = store.sources.get(source_id);
                Some(OutcomeHit {
                    id: id.clone(),
                    kind,
                    text,
                    rationale,
                    owner,
                    source_id: source_id.clone(),
                    source_title: source.map(|s| s.title.clone()).unwrap_or_default(),
                    source_date: source.and_then(|s| s.date.clone()),
                    chunks,
                })
            })
            .collect();
        hits.sort_by(outcome_cmp);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn entity_timeline(
        &self,
        pattern: &str,
        chunk_type: Option<ChunkType>,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        require(pattern, "entity pattern")?;
        let mut hits: Vec<ChunkHit> = self
            .read()
            .mentioning(pattern)
            .into_iter()
            .filter(|h| chunk_type.map_or(true, |t| h.chunk_type == t))
            .collect();
        hits.sort_by(timeline_cmp);
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl VectorIndex for MemoryGraph {
    async fn similar_chunks(&self, vector: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        if vector.is_empty() {
            return Err(Error::QueryFailure("query vector must not be empty".into()));
        }
        let store = self.read();
        let mut hits: Vec<ChunkHit> = store
            .chunks
            .iter()
            .filter_map(|(id, (_, chunk))| {
                let embedding = chunk.embedding.as_ref()?;
                let mut hit = store.hit(id)?;
                hit.score = Some(cosine_similarity(vector, embedding) as f64);
                Some(hit)
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .total_cmp(&a.score.unwrap_or(0.0))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
