//! MySQL relational mirror with brute-force vector search.
//!
//! Nodes map to tables keyed by id, relationships to link tables with
//! composite primary keys. PART_OF and PRODUCED are the `source_id`
//! columns of `chunks`, `decisions` and `actions`.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{OptsBuilder, Pool, TxOpts};
use tracing::{debug, info};

use super::{
    entity_attributes, missing_source, ChunkHit, GraphSink, OutcomeRecord, SinkStats,
    VectorIndex, WriteBatch,
};
use crate::config::MySqlConfig;
use crate::document::{ChunkRecord, ChunkType};
use crate::embeddings::cosine_similarity;
use crate::error::{Error, Result};

const SCHEMA: [&str; 9] = [
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id VARCHAR(64) PRIMARY KEY,
        title VARCHAR(512) NOT NULL,
        date VARCHAR(10) NULL,
        end_date VARCHAR(10) NULL,
        category VARCHAR(16) NOT NULL,
        participants JSON NULL,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
        INDEX idx_source_date (date)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id VARCHAR(64) PRIMARY KEY,
        name VARCHAR(512) NOT NULL,
        type VARCHAR(32) NOT NULL,
        role VARCHAR(255) NULL,
        organization VARCHAR(255) NULL,
        org_type VARCHAR(255) NULL,
        status VARCHAR(255) NULL,
        INDEX idx_entity_name (name)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id VARCHAR(96) PRIMARY KEY,
        source_id VARCHAR(64) NOT NULL,
        sequence_number INT UNSIGNED NOT NULL,
        text MEDIUMTEXT NOT NULL,
        speakers JSON NOT NULL,
        chunk_type VARCHAR(32) NOT NULL,
        importance_score DOUBLE NOT NULL,
        start_time VARCHAR(32) NULL,
        embedding JSON NULL,
        UNIQUE KEY uq_chunk_sequence (source_id, sequence_number),
        INDEX idx_chunk_type (chunk_type),
        INDEX idx_chunk_importance (importance_score),
        FULLTEXT KEY ft_chunk_text (text)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS decisions (
        id VARCHAR(96) PRIMARY KEY,
        source_id VARCHAR(64) NOT NULL,
        description TEXT NOT NULL,
        rationale TEXT NULL,
        INDEX idx_decision_source (source_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS actions (
        id VARCHAR(96) PRIMARY KEY,
        source_id VARCHAR(64) NOT NULL,
        task TEXT NOT NULL,
        owner VARCHAR(255) NULL,
        INDEX idx_action_source (source_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_next (
        from_id VARCHAR(96) NOT NULL,
        to_id VARCHAR(96) NOT NULL,
        PRIMARY KEY (from_id, to_id)
    ) ENGINE=InnoDB
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_mentions (
        chunk_id VARCHAR(96) NOT NULL,
        entity_id VARCHAR(64) NOT NULL,
        PRIMARY KEY (chunk_id, entity_id),
        INDEX idx_mention_entity (entity_id)
    ) ENGINE=InnoDB
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_outcomes (
        chunk_id VARCHAR(96) NOT NULL,
        outcome_id VARCHAR(96) NOT NULL,
        PRIMARY KEY (chunk_id, outcome_id)
    ) ENGINE=InnoDB
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_participants (
        entity_id VARCHAR(64) NOT NULL,
        source_id VARCHAR(64) NOT NULL,
        PRIMARY KEY (entity_id, source_id)
    ) ENGINE=InnoDB
    "#,
];

const NODE_TABLES: [&str; 5] = ["sources", "entities", "chunks", "decisions", "actions"];
const LINK_TABLES: [&str; 4] = [
    "chunk_next",
    "chunk_mentions",
    "chunk_outcomes",
    "source_participants",
];

const UPSERT_SOURCE: &str = r#"
    INSERT INTO sources (id, title, date, end_date, category, participants)
    VALUES (?, ?, ?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE
        title = VALUES(title),
        date = VALUES(date),
        end_date = VALUES(end_date),
        category = VALUES(category),
        participants = VALUES(participants)
"#;

const UPSERT_ENTITY: &str = r#"
    INSERT INTO entities (id, name, type, role, organization, org_type, status)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE
        role = COALESCE(role, VALUES(role)),
        organization = COALESCE(organization, VALUES(organization)),
        org_type = COALESCE(org_type, VALUES(org_type)),
        status = COALESCE(status, VALUES(status))
"#;

const UPSERT_CHUNK: &str = r#"
    INSERT INTO chunks (id, source_id, sequence_number, text, speakers, chunk_type,
                        importance_score, start_time, embedding)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE
        text = VALUES(text),
        speakers = VALUES(speakers),
        chunk_type = VALUES(chunk_type),
        importance_score = VALUES(importance_score),
        start_time = VALUES(start_time),
        embedding = VALUES(embedding)
"#;

const UPSERT_DECISION: &str = r#"
    INSERT INTO decisions (id, source_id, description, rationale)
    VALUES (?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE description = VALUES(description), rationale = VALUES(rationale)
"#;

const UPSERT_ACTION: &str = r#"
    INSERT INTO actions (id, source_id, task, owner)
    VALUES (?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE task = VALUES(task), owner = VALUES(owner)
"#;

/// id, text, sequence_number, speakers, chunk_type, importance_score,
/// source_id, title, date, embedding
type ChunkRow = (
    String,
    String,
    u64,
    String,
    String,
    f64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn chunk_params(
    source_id: &str,
    chunk: &ChunkRecord,
) -> Result<(
    String,
    String,
    u64,
    String,
    String,
    String,
    f64,
    Option<String>,
    Option<String>,
)> {
    let embedding = chunk.embedding.as_ref().map(to_json).transpose()?;
    Ok((
        chunk.id.clone(),
        source_id.to_string(),
        chunk.sequence_number as u64,
        chunk.text.clone(),
        to_json(&chunk.speakers)?,
        chunk.chunk_type.as_str().to_string(),
        chunk.importance_score,
        chunk.start_time.clone(),
        embedding,
    ))
}

fn insert_ignore(table: &str, columns: (&str, &str)) -> String {
    format!(
        "INSERT IGNORE INTO {} ({}, {}) VALUES (?, ?)",
        table, columns.0, columns.1
    )
}

pub struct MySqlSink {
    pool: Pool,
}

impl MySqlSink {
    /// Build a connection pool. Connections are opened lazily.
    pub fn connect(config: &MySqlConfig) -> Self {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()));
        info!(host = %config.host, database = %config.database, "MySQL pool created");
        Self {
            pool: Pool::new(opts),
        }
    }

    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl GraphSink for MySqlSink {
    fn name(&self) -> &str {
        "mysql"
    }

    async fn create_schema(&self) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        for statement in SCHEMA {
            conn.query_drop(statement).await?;
        }
        info!("MySQL schema ready");
        Ok(())
    }

    async fn write(&self, batch: &WriteBatch) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;

        if let Some(source_id) = batch.anchor_source() {
            let present: Option<u64> = tx
                .exec_first("SELECT COUNT(*) FROM sources WHERE id = ?", (source_id,))
                .await?;
            if present.unwrap_or(0) == 0 {
                return Err(missing_source(source_id));
            }
        }

        match batch {
            WriteBatch::Sources(rows) => {
                let params = rows
                    .iter()
                    .map(|s| {
                        Ok((
                            s.id.clone(),
                            s.title.clone(),
                            s.date.clone(),
                            s.end_date.clone(),
                            s.category.as_str().to_string(),
                            to_json(&s.participants)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                tx.exec_batch(UPSERT_SOURCE, params).await?;
            }
            WriteBatch::Entities(rows) => {
                let params = rows.iter().map(|e| {
                    let [role, organization, org_type, status] =
                        entity_attributes(&e.kind).map(|(_, value)| value);
                    (
                        e.id.clone(),
                        e.name.clone(),
                        e.kind.label().to_string(),
                        role,
                        organization,
                        org_type,
                        status,
                    )
                });
                tx.exec_batch(UPSERT_ENTITY, params).await?;
            }
            WriteBatch::Chunks { source_id, rows } => {
                let params = rows
                    .iter()
                    .map(|c| chunk_params(source_id, c))
                    .collect::<Result<Vec<_>>>()?;
                tx.exec_batch(UPSERT_CHUNK, params).await?;
            }
            WriteBatch::Next(pairs) => {
                tx.exec_batch(
                    insert_ignore("chunk_next", ("from_id", "to_id")),
                    pairs.iter().cloned(),
                )
                .await?;
            }
            WriteBatch::Mentions(pairs) => {
                tx.exec_batch(
                    insert_ignore("chunk_mentions", ("chunk_id", "entity_id")),
                    pairs.iter().cloned(),
                )
                .await?;
            }
            WriteBatch::Outcomes { source_id, rows } => {
                let mut decisions = Vec::new();
                let mut actions = Vec::new();
                for outcome in rows {
                    match outcome {
                        OutcomeRecord::Decision(d) => decisions.push((
                            d.id.clone(),
                            source_id.clone(),
                            d.description.clone(),
                            d.rationale.clone(),
                        )),
                        OutcomeRecord::Action(a) => actions.push((
                            a.id.clone(),
                            source_id.clone(),
                            a.task.clone(),
                            a.owner.clone(),
                        )),
                    }
                }
                if !decisions.is_empty() {
                    tx.exec_batch(UPSERT_DECISION, decisions).await?;
                }
                if !actions.is_empty() {
                    tx.exec_batch(UPSERT_ACTION, actions).await?;
                }
            }
            WriteBatch::ResultedIn(pairs) => {
                tx.exec_batch(
                    insert_ignore("chunk_outcomes", ("chunk_id", "outcome_id")),
                    pairs.iter().cloned(),
                )
                .await?;
            }
            WriteBatch::Participates {
                source_id,
                entity_ids,
            } => {
                let params = entity_ids.iter().map(|id| (id.clone(), source_id.clone()));
                tx.exec_batch(
                    insert_ignore("source_participants", ("entity_id", "source_id")),
                    params,
                )
                .await?;
            }
        }

        tx.commit().await?;
        debug!(kind = %batch.kind(), rows = batch.len(), "Wrote batch to MySQL");
        Ok(())
    }

    async fn stats(&self) -> Result<SinkStats> {
        let mut conn = self.pool.get_conn().await?;
        let mut stats = SinkStats::new(self.name());
        for table in NODE_TABLES {
            let n: Option<u64> = conn
                .query_first(format!("SELECT COUNT(*) FROM {}", table))
                .await?;
            stats.nodes.insert(table.to_string(), n.unwrap_or(0));
        }
        for table in LINK_TABLES {
            let n: Option<u64> = conn
                .query_first(format!("SELECT COUNT(*) FROM {}", table))
                .await?;
            stats.relationships.insert(table.to_string(), n.unwrap_or(0));
        }
        Ok(stats)
    }
}

#[async_trait]
impl VectorIndex for MySqlSink {
    async fn similar_chunks(&self, vector: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        if vector.is_empty() {
            return Err(Error::QueryFailure("query vector must not be empty".into()));
        }
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| Error::QueryFailure(e.to_string()))?;
        let rows: Vec<ChunkRow> = conn
            .query(
                "SELECT c.id, c.text, c.sequence_number, c.speakers, c.chunk_type,
                        c.importance_score, c.source_id, s.title, s.date, c.embedding
                 FROM chunks c LEFT JOIN sources s ON s.id = c.source_id
                 WHERE c.embedding IS NOT NULL",
            )
            .await
            .map_err(|e| Error::QueryFailure(e.to_string()))?;

        let mut hits: Vec<ChunkHit> = rows
            .into_iter()
            .filter_map(hit_from_row)
            .map(|(mut hit, embedding)| {
                hit.score = Some(cosine_similarity(vector, &embedding) as f64);
                hit
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

fn hit_from_row(row: ChunkRow) -> Option<(ChunkHit, Vec<f32>)> {
    let (id, text, seq, speakers, chunk_type, importance, source_id, title, date, embedding) = row;
    let embedding: Vec<f32> = serde_json::from_str(embedding.as_deref()?).ok()?;
    Some((
        ChunkHit {
            chunk_id: id,
            text,
            sequence_number: seq as usize,
            speakers: serde_json::from_str(&speakers).unwrap_or_default(),
            chunk_type: chunk_type.parse().unwrap_or(ChunkType::Discussion),
            importance_score: importance,
            source_id,
            source_title: title.unwrap_or_default(),
            source_date: date,
            score: None,
        },
        embedding,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::chunk_id;

    #[test]
    fn schema_covers_every_table() {
        for table in NODE_TABLES.iter().chain(LINK_TABLES.iter()) {
            let needle = format!("CREATE TABLE IF NOT EXISTS {} ", table);
            assert!(
                SCHEMA.iter().any(|s| s.contains(&needle)),
                "missing table {}",
                table
            );
        }
        assert!(SCHEMA.iter().any(|s| s.contains("FULLTEXT KEY ft_chunk_text")));
    }

    #[test]
    fn chunk_params_serialise_json_columns() {
        let chunk = ChunkRecord {
            id: chunk_id("s", 1),
            text: "hi".into(),
            sequence_number: 1,
            speakers: vec!["Anna".into(), "Luis".into()],
            chunk_type: ChunkType::Question,
            importance_score: 0.42,
            start_time: Some("10:00".into()),
            embedding: Some(vec![0.5, 0.25]),
        };
        let params = chunk_params("s", &chunk).unwrap();
        assert_eq!(params.4, r#"["Anna","Luis"]"#);
        assert_eq!(params.5, "question");
        assert_eq!(params.8.as_deref(), Some("[0.5,0.25]"));
    }

    #[test]
    fn link_inserts_are_idempotent() {
        let sql = insert_ignore("chunk_next", ("from_id", "to_id"));
        assert_eq!(sql, "INSERT IGNORE INTO chunk_next (from_id, to_id) VALUES (?, ?)");
    }

    #[test]
    fn rows_without_embedding_are_dropped() {
        let row: ChunkRow = (
            "s_c0000".into(),
            "text".into(),
            0,
            "[\"Anna\"]".into(),
            "decision".into(),
            0.9,
            "s".into(),
            Some("Sync".into()),
            None,
            None,
        );
        assert!(hit_from_row(row.clone()).is_none());

        let mut with_vector = row;
        with_vector.9 = Some("[1.0, 0.0]".into());
        let (hit, embedding) = hit_from_row(with_vector).unwrap();
        assert_eq!(hit.chunk_type, ChunkType::Decision);
        assert_eq!(hit.speakers, vec!["Anna".to_string()]);
        assert_eq!(embedding, vec![1.0, 0.0]);
    }
}
