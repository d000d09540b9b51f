//! Neo4j sink and reader.

use async_trait::async_trait;
use neo4rs::{query, BoltMap, BoltType, Graph, Query, Row};
use tracing::{debug, info};

use super::{
    entity_attributes, escape_lucene, missing_source, outcome_cmp, rank_cmp, score_cmp,
    timeline_cmp, ChunkHit, GraphReader, GraphSink, OutcomeHit, OutcomeKind, OutcomeRecord, SinkStats, WriteBatch, LABEL_ACTION,
    LABEL_CHUNK, LABEL_DECISION, LABEL_ENTITY, LABEL_SOURCE, REL_MENTIONS, REL_NEXT,
    REL_PARTICIPATES_IN, REL_PART_OF, REL_PRODUCED, REL_RESULTED_IN,
};
use crate::config::Neo4jConfig;
use crate::document::ChunkType;
use crate::error::{Error, Result};

const CONSTRAINTS: [&str; 5] = [
    "CREATE CONSTRAINT source_id IF NOT EXISTS FOR (s:Source) REQUIRE s.id IS UNIQUE",
    "CREATE CONSTRAINT chunk_id IF NOT EXISTS FOR (c:Chunk) REQUIRE c.id IS UNIQUE",
    "CREATE CONSTRAINT entity_id IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE",
    "CREATE CONSTRAINT decision_id IF NOT EXISTS FOR (d:Decision) REQUIRE d.id IS UNIQUE",
    "CREATE CONSTRAINT action_id IF NOT EXISTS FOR (a:Action) REQUIRE a.id IS UNIQUE",
];

const INDEXES: [&str; 5] = [
    "CREATE INDEX chunk_sequence IF NOT EXISTS FOR (c:Chunk) ON (c.sequence_number)",
    "CREATE INDEX chunk_type IF NOT EXISTS FOR (c:Chunk) ON (c.chunk_type)",
    "CREATE INDEX chunk_importance IF NOT EXISTS FOR (c:Chunk) ON (c.importance_score)",
    "CREATE INDEX entity_name IF NOT EXISTS FOR (e:Entity) ON (e.name)",
    "CREATE FULLTEXT INDEX chunk_text IF NOT EXISTS FOR (c:Chunk) ON EACH [c.text]",
];

const HIT_COLUMNS: &str = "c.id AS id, c.text AS text, c.sequence_number AS seq, \
     c.speakers AS speakers, c.chunk_type AS chunk_type, c.importance_score AS importance, \
     s.id AS source_id, s.title AS title, s.date AS date";

/// Schema statements that fail only because the object is already there.
fn is_already_exists(msg: &str) -> bool {
    msg.contains("already exists")
        || msg.contains("AlreadyExists")
        || msg.contains("EquivalentSchemaRule")
}

fn row(fields: Vec<(&'static str, BoltType)>) -> BoltType {
    let mut map = BoltMap::new();
    for (key, value) in fields {
        map.put(key.into(), value);
    }
    BoltType::Map(map)
}

fn pair_rows(pairs: &[(String, String)]) -> Vec<BoltType> {
    pairs
        .iter()
        .map(|(from, to)| {
            row(vec![
                ("from", from.clone().into()),
                ("to", to.clone().into()),
            ])
        })
        .collect()
}

fn hit_from_row(row: &Row) -> Option<ChunkHit> {
    Some(ChunkHit {
        chunk_id: row.get::<String>("id").ok()?,
        text: row.get::<String>("text").unwrap_or_default(),
        sequence_number: row.get::<i64>("seq").unwrap_or(0).max(0) as usize,
        speakers: row.get::<Vec<String>>("speakers").unwrap_or_default(),
        chunk_type: row
            .get::<String>("chunk_type")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(ChunkType::Discussion),
        importance_score: row.get::<f64>("importance").unwrap_or(0.0),
        source_id: row.get::<String>("source_id").unwrap_or_default(),
        source_title: row.get::<String>("title").unwrap_or_default(),
        source_date: row.get::<String>("date").ok(),
        score: row.get::<f64>("score").ok(),
    })
}

/// Graph store backed by Neo4j.
pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    pub async fn connect(config: &Neo4jConfig) -> Result<Self> {
        let graph = Graph::new(&config.uri, &config.user, &config.password).await?;
        info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    async fn fetch_hits(&self, q: Query) -> Result<Vec<ChunkHit>> {
        let mut result = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::QueryFailure(e.to_string()))?;
        let mut hits = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| Error::QueryFailure(e.to_string()))?
        {
            if let Some(hit) = hit_from_row(&row) {
                hits.push(hit);
            }
        }
        Ok(hits)
    }

    async fn count(&self, cypher: &str) -> Result<u64> {
        let mut result = self.graph.execute(query(cypher)).await?;
        Ok(match result.next().await? {
            Some(row) => row.get::<i64>("n").unwrap_or(0).max(0) as u64,
            None => 0,
        })
    }

    async fn source_exists(&self, source_id: &str) -> Result<bool> {
        let mut result = self
            .graph
            .execute(
                query("MATCH (s:Source {id: $id}) RETURN count(s) AS n")
                    .param("id", source_id.to_string()),
            )
            .await?;
        Ok(match result.next().await? {
            Some(row) => row.get::<i64>("n").unwrap_or(0) > 0,
            None => false,
        })
    }

    fn queries_for(batch: &WriteBatch) -> Vec<Query> {
        match batch {
            WriteBatch::Sources(sources) => {
                let rows: Vec<BoltType> = sources
                    .iter()
                    .map(|s| {
                        row(vec![
                            ("id", s.id.clone().into()),
                            ("title", s.title.clone().into()),
                            ("date", s.date.clone().into()),
                            ("end_date", s.end_date.clone().into()),
                            ("category", s.category.as_str().into()),
                            ("participants", s.participants.clone().into()),
                        ])
                    })
                    .collect();
                vec![query(
                    "UNWIND $rows AS row
                     MERGE (s:Source {id: row.id})
                     SET s.title = row.title,
                         s.date = row.date,
                         s.end_date = row.end_date,
                         s.category = row.category,
                         s.participants = row.participants",
                )
                .param("rows", rows)]
            }
            WriteBatch::Entities(entities) => {
                let rows: Vec<BoltType> = entities
                    .iter()
                    .map(|e| {
                        let mut fields: Vec<(&'static str, BoltType)> = vec![
                            ("id", e.id.clone().into()),
                            ("name", e.name.clone().into()),
                            ("type", e.kind.label().into()),
                        ];
                        fields.extend(
                            entity_attributes(&e.kind)
                                .into_iter()
                                .map(|(key, value)| (key, BoltType::from(value))),
                        );
                        row(fields)
                    })
                    .collect();
                vec![query(
                    "UNWIND $rows AS row
                     MERGE (e:Entity {id: row.id})
                     ON CREATE SET e.name = row.name, e.type = row.type
                     SET e.role = coalesce(e.role, row.role),
                         e.organization = coalesce(e.organization, row.organization),
                         e.org_type = coalesce(e.org_type, row.org_type),
                         e.status = coalesce(e.status, row.status)",
                )
                .param("rows", rows)]
            }
            WriteBatch::Chunks { source_id, rows } => {
                let rows: Vec<BoltType> = rows
                    .iter()
                    .map(|c| {
                        let embedding: Option<Vec<f64>> = c
                            .embedding
                            .as_ref()
                            .map(|v| v.iter().map(|&x| x as f64).collect());
                        row(vec![
                            ("id", c.id.clone().into()),
                            ("text", c.text.clone().into()),
                            ("seq", (c.sequence_number as i64).into()),
                            ("speakers", c.speakers.clone().into()),
                            ("chunk_type", c.chunk_type.as_str().into()),
                            ("importance", c.importance_score.into()),
                            ("start_time", c.start_time.clone().into()),
                            ("embedding", embedding.into()),
                        ])
                    })
                    .collect();
                vec![query(
                    "MATCH (s:Source {id: $source_id})
                     UNWIND $rows AS row
                     MERGE (c:Chunk {id: row.id})
                     SET c.text = row.text,
                         c.sequence_number = row.seq,
                         c.speakers = row.speakers,
                         c.chunk_type = row.chunk_type,
                         c.importance_score = row.importance,
                         c.start_time = row.start_time,
                         c.embedding = row.embedding
                     MERGE (c)-[:PART_OF]->(s)",
                )
                .param("source_id", source_id.clone())
                .param("rows", rows)]
            }
            WriteBatch::Next(pairs) => vec![query(
                "UNWIND $rows AS row
                 MATCH (a:Chunk {id: row.from})
                 MATCH (b:Chunk {id: row.to})
                 MERGE (a)-[:NEXT]->(b)",
            )
            .param("rows", pair_rows(pairs))],
            WriteBatch::Mentions(pairs) => vec![query(
                "UNWIND $rows AS row
                 MATCH (c:Chunk {id: row.from})
                 MATCH (e:Entity {id: row.to})
                 MERGE (c)-[:MENTIONS]->(e)",
            )
            .param("rows", pair_rows(pairs))],
            WriteBatch::Outcomes { source_id, rows } => {
                let mut decisions = Vec::new();
                let mut actions = Vec::new();
                for outcome in rows {
                    match outcome {
                        OutcomeRecord::Decision(d) => decisions.push(row(vec![
                            ("id", d.id.clone().into()),
                            ("description", d.description.clone().into()),
                            ("rationale", d.rationale.clone().into()),
                        ])),
                        OutcomeRecord::Action(a) => actions.push(row(vec![
                            ("id", a.id.clone().into()),
                            ("task", a.task.clone().into()),
                            ("owner", a.owner.clone().into()),
                        ])),
                    }
                }
                let mut queries = Vec::new();
                if !decisions.is_empty() {
                    queries.push(
                        query(
                            "MATCH (s:Source {id: $source_id})
                             UNWIND $rows AS row
                             MERGE (d:Decision {id: row.id})
                             SET d.kind = 'decision',
                                 d.description = row.description,
                                 d.rationale = row.rationale
                             MERGE (s)-[:PRODUCED]->(d)",
                        )
                        .param("source_id", source_id.clone())
                        .param("rows", decisions),
                    );
                }
                if !actions.is_empty() {
                    queries.push(
                        query(
                            "MATCH (s:Source {id: $source_id})
                             UNWIND $rows AS row
                             MERGE (a:Action {id: row.id})
                             SET a.kind = 'action',
                                 a.task = row.task,
                                 a.owner = row.owner
                             MERGE (s)-[:PRODUCED]->(a)",
                        )
                        .param("source_id", source_id.clone())
                        .param("rows", actions),
                    );
                }
                queries
            }
            WriteBatch::ResultedIn(pairs) => vec![query(
                "UNWIND $rows AS row
                 MATCH (c:Chunk {id: row.from})
                 MATCH (o {id: row.to})
                 WHERE o:Decision OR o:Action
                 MERGE (c)-[:RESULTED_IN]->(o)",
            )
            .param("rows", pair_rows(pairs))],
            WriteBatch::Participates {
                source_id,
                entity_ids,
            } => vec![query(
                "MATCH (s:Source {id: $source_id})
                 UNWIND $ids AS id
                 MATCH (e:Entity {id: id})
                 MERGE (e)-[:PARTICIPATES_IN]->(s)",
            )
            .param("source_id", source_id.clone())
            .param("ids", entity_ids.clone())],
        }
    }
}

#[async_trait]
impl GraphSink for Neo4jGraph {
    fn name(&self) -> &str {
        "neo4j"
    }

    async fn create_schema(&self) -> Result<()> {
        info!("Initializing Neo4j schema...");
        for statement in CONSTRAINTS.iter().chain(INDEXES.iter()) {
            match self.graph.run(query(statement)).await {
                Ok(()) => {}
                Err(err) if is_already_exists(&err.to_string()) => {
                    debug!(statement, "Schema object already exists");
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!("Schema initialized successfully");
        Ok(())
    }

    async fn write(&self, batch: &WriteBatch) -> Result<()> {
        let queries = Self::queries_for(batch);
        if queries.is_empty() {
            return Ok(());
        }
        if let Some(source_id) = batch.anchor_source() {
            if !self.source_exists(source_id).await? {
                return Err(missing_source(source_id));
            }
        }
        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(queries).await?;
        txn.commit().await?;
        debug!(kind = %batch.kind(), rows = batch.len(), "Wrote batch to Neo4j");
        Ok(())
    }

    async fn stats(&self) -> Result<SinkStats> {
        let mut stats = SinkStats::new(self.name());
        for label in [
            LABEL_SOURCE,
            LABEL_CHUNK,
            LABEL_ENTITY,
            LABEL_DECISION,
            LABEL_ACTION,
        ] {
            let n = self
                .count(&format!("MATCH (n:{}) RETURN count(n) AS n", label))
                .await?;
            stats.nodes.insert(label.to_string(), n);
        }
        for rel in [
            REL_PART_OF,
            REL_NEXT,
            REL_MENTIONS,
            REL_RESULTED_IN,
            REL_PRODUCED,
            REL_PARTICIPATES_IN,
        ] {
            let n = self
                .count(&format!("MATCH ()-[r:{}]->() RETURN count(r) AS n", rel))
                .await?;
            stats.relationships.insert(rel.to_string(), n);
        }
        Ok(stats)
    }
}

#[async_trait]
impl GraphReader for Neo4jGraph {
    async fn chunks_mentioning(&self, pattern: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        if pattern.trim().is_empty() {
            return Err(Error::QueryFailure("entity pattern must not be empty".into()));
        }
        let q = query(&format!(
            "MATCH (e:Entity)<-[:MENTIONS]-(c:Chunk)-[:PART_OF]->(s:Source)
             WHERE toLower(e.name) CONTAINS toLower($pattern)
             WITH DISTINCT c, s
             RETURN {}
             ORDER BY importance DESC, coalesce(date, '') DESC, source_id, seq, id
             LIMIT $limit",
            HIT_COLUMNS
        ))
        .param("pattern", pattern)
        .param("limit", limit as i64);

        let mut hits = self.fetch_hits(q).await?;
        hits.sort_by(rank_cmp);
        Ok(hits)
    }

    async fn full_text(&self, text: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        if text.trim().is_empty() {
            return Err(Error::QueryFailure("full-text query must not be empty".into()));
        }
        let q = query(&format!(
            "CALL db.index.fulltext.queryNodes('chunk_text', $query) YIELD node AS c, score
             MATCH (c)-[:PART_OF]->(s:Source)
             RETURN {}, score
             ORDER BY score DESC, importance DESC, source_id, seq
             LIMIT $limit",
            HIT_COLUMNS
        ))
        .param("query", escape_lucene(text.trim()))
        .param("limit", limit as i64);

        let mut hits = self.fetch_hits(q).await?;
        hits.sort_by(score_cmp);
        Ok(hits)
    }

    async fn chunk_context(
        &self,
        chunk_id: &str,
        before: usize,
        after: usize,
    ) -> Result<Vec<ChunkHit>> {
        let center = self
            .fetch_hits(
                query(&format!(
                    "MATCH (c:Chunk {{id: $id}})-[:PART_OF]->(s:Source) RETURN {}",
                    HIT_COLUMNS
                ))
                .param("id", chunk_id),
            )
            .await?;
        if center.is_empty() {
            return Ok(Vec::new());
        }

        let mut window = center;
        // variable-length bounds cannot be parameters
        if before > 0 {
            let q = query(&format!(
                "MATCH (c:Chunk)-[:NEXT*1..{}]->(:Chunk {{id: $id}})
                 MATCH (c)-[:PART_OF]->(s:Source)
                 RETURN DISTINCT {}",
                before, HIT_COLUMNS
            ))
            .param("id", chunk_id);
            window.extend(self.fetch_hits(q).await?);
        }
        if after > 0 {
            let q = query(&format!(
                "MATCH (:Chunk {{id: $id}})-[:NEXT*1..{}]->(c:Chunk)
                 MATCH (c)-[:PART_OF]->(s:Source)
                 RETURN DISTINCT {}",
                after, HIT_COLUMNS
            ))
            .param("id", chunk_id);
            window.extend(self.fetch_hits(q).await?);
        }

        window.sort_by_key(|h| h.sequence_number);
        window.dedup_by(|a, b| a.chunk_id == b.chunk_id);
        Ok(window)
    }

    async fn outcomes(&self, keyword: &str, limit: usize) -> Result<Vec<OutcomeHit>> {
        if keyword.trim().is_empty() {
            return Err(Error::QueryFailure("outcome keyword must not be empty".into()));
        }
        let q = query(
            "MATCH (s:Source)-[:PRODUCED]->(o)
             WHERE (o:Decision AND (toLower(o.description) CONTAINS $kw
                                    OR toLower(coalesce(o.rationale, '')) CONTAINS $kw))
                OR (o:Action AND (toLower(o.task) CONTAINS $kw
                                  OR toLower(coalesce(o.owner, '')) CONTAINS $kw))
             RETURN o.id AS id, o.kind AS kind, o.description AS description,
                    o.rationale AS rationale, o.task AS task, o.owner AS owner,
                    s.id AS source_id, s.title AS title, s.date AS date
             ORDER BY coalesce(date, '') DESC, id
             LIMIT $limit",
        )
        .param("kw", keyword.to_lowercase())
        .param("limit", limit as i64);

        let mut result = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::QueryFailure(e.to_string()))?;
        let mut hits = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| Error::QueryFailure(e.to_string()))?
        {
            let Ok(id) = row.get::<String>("id") else {
                continue;
            };
            let kind = match row.get::<String>("kind").as_deref() {
                Ok("action") => OutcomeKind::Action,
                _ => OutcomeKind::Decision,
            };
            let text = match kind {
                OutcomeKind::Decision => row.get::<String>("description"),
                OutcomeKind::Action => row.get::<String>("task"),
            }
            .unwrap_or_default();
            hits.push(OutcomeHit {
                id,
                kind,
                text,
                rationale: row.get::<String>("rationale").ok(),
                owner: row.get::<String>("owner").ok(),
                source_id: row.get::<String>("source_id").unwrap_or_default(),
                source_title: row.get::<String>("title").unwrap_or_default(),
                source_date: row.get::<String>("date").ok(),
                chunks: Vec::new(),
            });
        }

        for hit in &mut hits {
            let q = query(&format!(
                "MATCH (c:Chunk)-[:RESULTED_IN]->(o {{id: $id}})
                 MATCH (c)-[:PART_OF]->(s:Source)
                 RETURN {}
                 ORDER BY seq",
                HIT_COLUMNS
            ))
            .param("id", hit.id.clone());
            hit.chunks = self.fetch_hits(q).await?;
        }

        hits.sort_by(outcome_cmp);
        Ok(hits)
    }

    async fn entity_timeline(
        &self,
        pattern: &str,
        chunk_type: Option<ChunkType>,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        if pattern.trim().is_empty() {
            return Err(Error::QueryFailure("entity pattern must not be empty".into()));
        }
        let q = query(&format!(
            "MATCH (e:Entity)<-[:MENTIONS]-(c:Chunk)-[:PART_OF]->(s:Source)
             WHERE toLower(e.name) CONTAINS toLower($pattern)
               AND ($chunk_type IS NULL OR c.chunk_type = $chunk_type)
             WITH DISTINCT c, s
             RETURN {}
             ORDER BY coalesce(date, '') ASC, seq ASC, source_id, id
             LIMIT $limit",
            HIT_COLUMNS
        ))
        .param("pattern", pattern)
        .param("chunk_type", chunk_type.map(|t| t.as_str().to_string()))
        .param("limit", limit as i64);

        let mut hits = self.fetch_hits(q).await?;
        hits.sort_by(timeline_cmp);
        Ok(hits)
    }
}
