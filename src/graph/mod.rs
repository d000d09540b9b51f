//! Persistence of documents as a property graph, and read access to it.
//!
//! A [`Document`] is flattened into typed [`WriteBatch`]es by
//! [`plan_batches`]. Every [`GraphSink`] applies batches with merge-by-id
//! semantics, so writing the same batches twice leaves counts unchanged.
//! [`GraphReader`] exposes the read side used by retrieval.

pub mod loader;
pub mod memory;
pub mod mysql;
pub mod neo4j;

pub use loader::{BatchFailure, GraphLoader, LoadReport};
pub use memory::MemoryGraph;
pub use mysql::MySqlSink;
pub use neo4j::Neo4jGraph;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{
    ActionRecord, ChunkRecord, ChunkType, DecisionRecord, Document, SourceRecord,
};
use crate::error::{Error, Result};
use crate::extraction::{EntityKind, EntityRecord};

pub const LABEL_SOURCE: &str = "Source";
pub const LABEL_CHUNK: &str = "Chunk";
pub const LABEL_ENTITY: &str = "Entity";
pub const LABEL_DECISION: &str = "Decision";
pub const LABEL_ACTION: &str = "Action";

pub const REL_PART_OF: &str = "PART_OF";
pub const REL_NEXT: &str = "NEXT";
pub const REL_MENTIONS: &str = "MENTIONS";
pub const REL_RESULTED_IN: &str = "RESULTED_IN";
pub const REL_PRODUCED: &str = "PRODUCED";
pub const REL_PARTICIPATES_IN: &str = "PARTICIPATES_IN";

/// A Decision or Action, as written to a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeRecord {
    Decision(DecisionRecord),
    Action(ActionRecord),
}

impl OutcomeRecord {
    pub fn id(&self) -> &str {
        match self {
            OutcomeRecord::Decision(d) => &d.id,
            OutcomeRecord::Action(a) => &a.id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutcomeRecord::Decision(_) => LABEL_DECISION,
            OutcomeRecord::Action(_) => LABEL_ACTION,
        }
    }

    pub fn source_chunk_sequences(&self) -> &[usize] {
        match self {
            OutcomeRecord::Decision(d) => &d.source_chunk_sequences,
            OutcomeRecord::Action(a) => &a.source_chunk_sequences,
        }
    }
}

/// Kind of a [`WriteBatch`], in write order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Sources,
    Entities,
    Chunks,
    Next,
    Mentions,
    Outcomes,
    ResultedIn,
    Participates,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchKind::Sources => "sources",
            BatchKind::Entities => "entities",
            BatchKind::Chunks => "chunks",
            BatchKind::Next => "next",
            BatchKind::Mentions => "mentions",
            BatchKind::Outcomes => "outcomes",
            BatchKind::ResultedIn => "resulted_in",
            BatchKind::Participates => "participates",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bounded unit of writes. Sinks apply a batch atomically where they can.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteBatch {
    Sources(Vec<SourceRecord>),
    Entities(Vec<EntityRecord>),
    /// Chunk nodes plus their PART_OF edge to `source_id`.
    Chunks {
        source_id: String,
        rows: Vec<ChunkRecord>,
    },
    /// NEXT edges as (from chunk id, to chunk id).
    Next(Vec<(String, String)>),
    /// MENTIONS edges as (chunk id, entity id).
    Mentions(Vec<(String, String)>),
    /// Outcome nodes plus their PRODUCED edge from `source_id`.
    Outcomes {
        source_id: String,
        rows: Vec<OutcomeRecord>,
    },
    /// RESULTED_IN edges as (chunk id, outcome id).
    ResultedIn(Vec<(String, String)>),
    /// PARTICIPATES_IN edges from each entity to `source_id`.
    Participates {
        source_id: String,
        entity_ids: Vec<String>,
    },
}

impl WriteBatch {
    pub fn kind(&self) -> BatchKind {
        match self {
            WriteBatch::Sources(_) => BatchKind::Sources,
            WriteBatch::Entities(_) => BatchKind::Entities,
            WriteBatch::Chunks { .. } => BatchKind::Chunks,
            WriteBatch::Next(_) => BatchKind::Next,
            WriteBatch::Mentions(_) => BatchKind::Mentions,
            WriteBatch::Outcomes { .. } => BatchKind::Outcomes,
            WriteBatch::ResultedIn(_) => BatchKind::ResultedIn,
            WriteBatch::Participates { .. } => BatchKind::Participates,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WriteBatch::Sources(rows) => rows.len(),
            WriteBatch::Entities(rows) => rows.len(),
            WriteBatch::Chunks { rows, .. } => rows.len(),
            WriteBatch::Next(rows) | WriteBatch::Mentions(rows) | WriteBatch::ResultedIn(rows) => {
                rows.len()
            }
            WriteBatch::Outcomes { rows, .. } => rows.len(),
            WriteBatch::Participates { entity_ids, .. } => entity_ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source node the batch attaches to. Sinks reject the batch while that
    /// source is absent.
    pub fn anchor_source(&self) -> Option<&str> {
        match self {
            WriteBatch::Chunks { source_id, .. }
            | WriteBatch::Outcomes { source_id, .. }
            | WriteBatch::Participates { source_id, .. } => Some(source_id),
            _ => None,
        }
    }
}

pub(crate) fn missing_source(source_id: &str) -> Error {
    Error::GraphError(format!("source {} is not loaded on this sink", source_id))
}

fn split<T: Clone>(
    rows: &[T],
    batch_size: usize,
    make: impl FnMut(Vec<T>) -> WriteBatch,
) -> Vec<WriteBatch> {
    rows.chunks(batch_size.max(1))
        .map(<[T]>::to_vec)
        .map(make)
        .collect()
}

/// Flatten a document into ordered batches of at most `batch_size` rows.
pub fn plan_batches(doc: &Document, batch_size: usize) -> Vec<WriteBatch> {
    let source_id = doc.source.id.as_str();
    let mut batches = vec![WriteBatch::Sources(vec![doc.source.clone()])];

    batches.extend(split(&doc.entities, batch_size, WriteBatch::Entities));
    batches.extend(split(&doc.chunks, batch_size, |rows| WriteBatch::Chunks {
        source_id: source_id.to_string(),
        rows,
    }));

    let next: Vec<(String, String)> = doc
        .chunks
        .windows(2)
        .map(|pair| (pair[0].id.clone(), pair[1].id.clone()))
        .collect();
    batches.extend(split(&next, batch_size, WriteBatch::Next));

    let mentions: Vec<(String, String)> = doc
        .chunk_entity_links
        .iter()
        .filter_map(|l| {
            doc.chunk(l.chunk_sequence)
                .map(|c| (c.id.clone(), l.entity_id.clone()))
        })
        .collect();
    batches.extend(split(&mentions, batch_size, WriteBatch::Mentions));

    let outcomes: Vec<OutcomeRecord> = doc
        .decisions
        .iter()
        .cloned()
        .map(OutcomeRecord::Decision)
        .chain(doc.actions.iter().cloned().map(OutcomeRecord::Action))
        .collect();
    batches.extend(split(&outcomes, batch_size, |rows| WriteBatch::Outcomes {
        source_id: source_id.to_string(),
        rows,
    }));

    let resulted_in: Vec<(String, String)> = outcomes
        .iter()
        .flat_map(|o| {
            o.source_chunk_sequences()
                .iter()
                .filter_map(move |&seq| doc.chunk(seq))
                .map(move |c| (c.id.clone(), o.id().to_string()))
        })
        .collect();
    batches.extend(split(&resulted_in, batch_size, WriteBatch::ResultedIn));

    let participants: Vec<String> = doc
        .entities
        .iter()
        .filter(|e| {
            doc.source
                .participants
                .iter()
                .any(|p| crate::extraction::entity_id(p) == e.id)
        })
        .map(|e| e.id.clone())
        .collect();
    batches.extend(split(&participants, batch_size, |entity_ids| {
        WriteBatch::Participates {
            source_id: source_id.to_string(),
            entity_ids,
        }
    }));

    batches
}

/// Type-specific entity attributes as flat, nullable columns.
pub(crate) fn entity_attributes(kind: &EntityKind) -> [(&'static str, Option<String>); 4] {
    let (role, organization, org_type, status) = match kind {
        EntityKind::Person { role, organization } => {
            (role.clone(), organization.clone(), None, None)
        }
        EntityKind::Organization { org_type } => (None, None, org_type.clone(), None),
        EntityKind::Country { status } => (None, None, None, status.clone()),
        EntityKind::Topic {} => (None, None, None, None),
    };
    [
        ("role", role),
        ("organization", organization),
        ("org_type", org_type),
        ("status", status),
    ]
}

/// Node and relationship counts of one sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub sink: String,
    pub nodes: BTreeMap<String, u64>,
    pub relationships: BTreeMap<String, u64>,
}

impl SinkStats {
    pub fn new(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            ..Default::default()
        }
    }

    pub fn node_count(&self, label: &str) -> u64 {
        self.nodes.get(label).copied().unwrap_or(0)
    }

    pub fn relationship_count(&self, rel_type: &str) -> u64 {
        self.relationships.get(rel_type).copied().unwrap_or(0)
    }

    pub fn total_nodes(&self) -> u64 {
        self.nodes.values().sum()
    }

    pub fn total_relationships(&self) -> u64 {
        self.relationships.values().sum()
    }
}

/// A store the loader writes into.
#[async_trait]
pub trait GraphSink: Send + Sync {
    fn name(&self) -> &str;

    /// Create constraints and indexes. Safe to call repeatedly.
    async fn create_schema(&self) -> Result<()>;

    /// Apply one batch with merge-by-id semantics.
    async fn write(&self, batch: &WriteBatch) -> Result<()>;

    async fn stats(&self) -> Result<SinkStats>;
}

/// A chunk returned by a query, with its source's provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub text: String,
    pub sequence_number: usize,
    pub speakers: Vec<String>,
    pub chunk_type: ChunkType,
    pub importance_score: f64,
    pub source_id: String,
    pub source_title: String,
    pub source_date: Option<String>,
    /// Engine relevance, for full-text and vector hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

fn date_cmp(a: &Option<String>, b: &Option<String>) -> Ordering {
    // None sorts before any date
    a.cmp(b)
}

/// Retrieval ranking: importance desc, source date desc (missing oldest),
/// then source id, sequence number and chunk id ascending.
pub fn rank_cmp(a: &ChunkHit, b: &ChunkHit) -> Ordering {
    b.importance_score
        .total_cmp(&a.importance_score)
        .then_with(|| date_cmp(&b.source_date, &a.source_date))
        .then_with(|| a.source_id.cmp(&b.source_id))
        .then_with(|| a.sequence_number.cmp(&b.sequence_number))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Chronological order: source date asc (missing first), sequence number,
/// then source id and chunk id.
pub fn timeline_cmp(a: &ChunkHit, b: &ChunkHit) -> Ordering {
    date_cmp(&a.source_date, &b.source_date)
        .then_with(|| a.sequence_number.cmp(&b.sequence_number))
        .then_with(|| a.source_id.cmp(&b.source_id))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Relevance order for scored hits: score desc, then [`rank_cmp`].
pub fn score_cmp(a: &ChunkHit, b: &ChunkHit) -> Ordering {
    let sa = a.score.unwrap_or(0.0);
    let sb = b.score.unwrap_or(0.0);
    sb.total_cmp(&sa).then_with(|| rank_cmp(a, b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Decision,
    Action,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Decision => "decision",
            OutcomeKind::Action => "action",
        }
    }
}

/// A Decision or Action matched by keyword, with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeHit {
    pub id: String,
    pub kind: OutcomeKind,
    /// Decision description or action task.
    pub text: String,
    /// Decision rationale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Action owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub source_id: String,
    pub source_title: String,
    pub source_date: Option<String>,
    /// Provenance chunks by sequence number.
    pub chunks: Vec<ChunkHit>,
}

/// Outcome ordering: source date desc (missing oldest), then id.
pub fn outcome_cmp(a: &OutcomeHit, b: &OutcomeHit) -> Ordering {
    date_cmp(&b.source_date, &a.source_date).then_with(|| a.id.cmp(&b.id))
}

/// Read side of the graph.
#[async_trait]
pub trait GraphReader: Send + Sync {
    /// Chunks mentioning an entity whose name contains `pattern`
    /// (case-insensitive), in [`rank_cmp`] order.
    async fn chunks_mentioning(&self, pattern: &str, limit: usize) -> Result<Vec<ChunkHit>>;

    /// Full-text search over chunk text, best match first.
    async fn full_text(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>>;

    /// The chunk plus up to `before`/`after` neighbours along NEXT, in
    /// sequence order. Unknown ids give an empty result.
    async fn chunk_context(&self, chunk_id: &str, before: usize, after: usize)
        -> Result<Vec<ChunkHit>>;

    /// Decisions and actions matching `keyword`, in [`outcome_cmp`] order.
    async fn outcomes(&self, keyword: &str, limit: usize) -> Result<Vec<OutcomeHit>>;

    /// Chunks mentioning a matching entity in [`timeline_cmp`] order.
    async fn entity_timeline(
        &self,
        pattern: &str,
        chunk_type: Option<ChunkType>,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;
}

/// Nearest-neighbour search over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Chunks by cosine similarity desc, ties by chunk id.
    async fn similar_chunks(&self, vector: &[f32], limit: usize) -> Result<Vec<ChunkHit>>;
}

/// Lucene special characters escaped for a full-text query.
pub fn escape_lucene(query: &str) -> String {
    const SPECIAL: &[char] = &[
        '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
        '/',
    ];
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{chunk_id, ChunkEntityLink, SourceCategory};
    use crate::extraction::entity_id;

    fn chunk(seq: usize) -> ChunkRecord {
        ChunkRecord {
            id: chunk_id("s1", seq),
            text: format!("text {}", seq),
            sequence_number: seq,
            speakers: vec!["Anna".into()],
            chunk_type: ChunkType::Discussion,
            importance_score: 0.5,
            start_time: None,
            embedding: None,
        }
    }

    fn doc(n: usize) -> Document {
        Document {
            source: SourceRecord {
                id: "s1".into(),
                title: "Chat".into(),
                date: Some("2024-01-01".into()),
                end_date: None,
                category: SourceCategory::Chat,
                participants: vec!["Anna".into()],
            },
            chunks: (0..n).map(chunk).collect(),
            entities: vec![
                EntityRecord {
                    id: entity_id("Anna"),
                    name: "Anna".into(),
                    kind: EntityKind::person(),
                },
                EntityRecord {
                    id: entity_id("Brazil"),
                    name: "Brazil".into(),
                    kind: EntityKind::topic(),
                },
            ],
            chunk_entity_links: (0..n)
                .map(|seq| ChunkEntityLink {
                    chunk_sequence: seq,
                    entity_id: entity_id("Anna"),
                })
                .collect(),
            decisions: vec![DecisionRecord {
                id: "s1_d0".into(),
                description: "Go".into(),
                rationale: None,
                source_chunk_sequences: vec![0, 1],
            }],
            actions: vec![],
        }
    }

    #[test]
    fn plan_batches_respects_size_and_order() {
        let batches = plan_batches(&doc(5), 2);
        let kinds: Vec<BatchKind> = batches.iter().map(WriteBatch::kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
        assert!(batches.iter().all(|b| b.len() <= 2 && !b.is_empty()));

        let chunk_rows: usize = batches
            .iter()
            .filter(|b| b.kind() == BatchKind::Chunks)
            .map(WriteBatch::len)
            .sum();
        assert_eq!(chunk_rows, 5);

        let next_rows: usize = batches
            .iter()
            .filter(|b| b.kind() == BatchKind::Next)
            .map(WriteBatch::len)
            .sum();
        assert_eq!(next_rows, 4);
    }

    #[test]
    fn participants_only_for_parser_participants() {
        let batches = plan_batches(&doc(1), 500);
        let participates: Vec<&WriteBatch> = batches
            .iter()
            .filter(|b| b.kind() == BatchKind::Participates)
            .collect();
        assert_eq!(participates.len(), 1);
        assert_eq!(
            participates[0],
            &WriteBatch::Participates {
                source_id: "s1".into(),
                entity_ids: vec![entity_id("Anna")],
            }
        );
    }

    #[test]
    fn edges_use_the_documents_own_chunk_ids() {
        let mut d = doc(2);
        d.chunks[0].id = "chunk-a".into();
        d.chunks[1].id = "chunk-b".into();
        let batches = plan_batches(&d, 500);

        let mentions: Vec<&(String, String)> = batches
            .iter()
            .filter_map(|b| match b {
                WriteBatch::Mentions(pairs) => Some(pairs),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].0, "chunk-a");
        assert_eq!(mentions[1].0, "chunk-b");

        let resulted_in: Vec<&str> = batches
            .iter()
            .filter_map(|b| match b {
                WriteBatch::ResultedIn(pairs) => Some(pairs),
                _ => None,
            })
            .flatten()
            .map(|(chunk, _)| chunk.as_str())
            .collect();
        assert_eq!(resulted_in, vec!["chunk-a", "chunk-b"]);
    }

    #[test]
    fn anchored_batches_name_their_source() {
        let batches = plan_batches(&doc(2), 500);
        for batch in &batches {
            let expected = matches!(
                batch.kind(),
                BatchKind::Chunks | BatchKind::Outcomes | BatchKind::Participates
            )
            .then_some("s1");
            assert_eq!(batch.anchor_source(), expected, "{:?}", batch.kind());
        }
    }

    #[test]
    fn single_chunk_has_no_next_batch() {
        let batches = plan_batches(&doc(1), 500);
        assert!(batches.iter().all(|b| b.kind() != BatchKind::Next));
    }

    fn hit(id: &str, importance: f64, date: Option<&str>) -> ChunkHit {
        ChunkHit {
            chunk_id: id.into(),
            text: String::new(),
            sequence_number: 0,
            speakers: vec![],
            chunk_type: ChunkType::Discussion,
            importance_score: importance,
            source_id: id.into(),
            source_title: String::new(),
            source_date: date.map(str::to_string),
            score: None,
        }
    }

    #[test]
    fn rank_orders_by_importance_then_recent_date() {
        let mut hits = vec![
            hit("a", 0.5, Some("2024-01-01")),
            hit("b", 0.9, None),
            hit("c", 0.5, Some("2024-06-01")),
            hit("d", 0.5, None),
        ];
        hits.sort_by(rank_cmp);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn timeline_puts_undated_first() {
        let mut hits = vec![
            hit("a", 0.5, Some("2024-06-01")),
            hit("b", 0.5, None),
            hit("c", 0.5, Some("2024-01-01")),
        ];
        hits.sort_by(timeline_cmp);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn entity_attributes_cover_every_kind() {
        let fields = entity_attributes(&EntityKind::Country {
            status: Some("priority".into()),
        });
        assert_eq!(fields[3], ("status", Some("priority".to_string())));
        assert!(entity_attributes(&EntityKind::topic())
            .iter()
            .all(|(_, v)| v.is_none()));
    }

    #[test]
    fn lucene_escaping() {
        assert_eq!(escape_lucene("a+b (c)"), "a\\+b \\(c\\)");
        assert_eq!(escape_lucene("plain words"), "plain words");
    }
}
