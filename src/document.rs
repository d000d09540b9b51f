//! Intermediate document representation.
//!
//! A [`Document`] is what segmentation and extraction hand to the loader for
//! one source. Everything in it carries a stable id so loading the same
//! document twice converges on the same graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::extraction::EntityRecord;

/// Kind of conversational unit a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Discussion,
    Decision,
    ActionAssignment,
    Assessment,
    Question,
}

impl ChunkType {
    pub const ALL: [ChunkType; 5] = [
        ChunkType::Decision,
        ChunkType::ActionAssignment,
        ChunkType::Assessment,
        ChunkType::Question,
        ChunkType::Discussion,
    ];

    /// Fixed base importance of the type.
    pub fn base_importance(self) -> f64 {
        match self {
            ChunkType::Decision => 0.9,
            ChunkType::ActionAssignment => 0.8,
            ChunkType::Assessment => 0.7,
            ChunkType::Question => 0.6,
            ChunkType::Discussion => 0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Discussion => "discussion",
            ChunkType::Decision => "decision",
            ChunkType::ActionAssignment => "action_assignment",
            ChunkType::Assessment => "assessment",
            ChunkType::Question => "question",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ChunkType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown chunk type: {}", s)))
    }
}

/// Where a source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Meeting,
    Chat,
    Document,
}

impl SourceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceCategory::Meeting => "meeting",
            SourceCategory::Chat => "chat",
            SourceCategory::Document => "document",
        }
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub title: String,
    /// ISO `YYYY-MM-DD`.
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub category: SourceCategory,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub sequence_number: usize,
    pub speakers: Vec<String>,
    pub chunk_type: ChunkType,
    pub importance_score: f64,
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkEntityLink {
    pub chunk_sequence: usize,
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub source_chunk_sequences: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub task: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub source_chunk_sequences: Vec<usize>,
}

/// Everything derived from one source, ready for loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source: SourceRecord,
    pub chunks: Vec<ChunkRecord>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub chunk_entity_links: Vec<ChunkEntityLink>,
    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
}

impl Document {
    pub fn chunk(&self, sequence_number: usize) -> Option<&ChunkRecord> {
        self.chunks
            .get(sequence_number)
            .filter(|c| c.sequence_number == sequence_number)
            .or_else(|| {
                self.chunks
                    .iter()
                    .find(|c| c.sequence_number == sequence_number)
            })
    }

    /// Check the structural invariants the loader relies on.
    pub fn validate(&self) -> Result<()> {
        for (expected, chunk) in self.chunks.iter().enumerate() {
            if chunk.sequence_number != expected {
                return Err(Error::InvalidArgument(format!(
                    "source {}: chunk {} has sequence_number {}, expected {}",
                    self.source.id, chunk.id, chunk.sequence_number, expected
                )));
            }
            if !(0.0..=1.0).contains(&chunk.importance_score) {
                return Err(Error::InvalidArgument(format!(
                    "source {}: chunk {} importance {} outside [0, 1]",
                    self.source.id, chunk.id, chunk.importance_score
                )));
            }
        }

        let n = self.chunks.len();
        let link_sequences = self
            .chunk_entity_links
            .iter()
            .map(|l| l.chunk_sequence)
            .chain(
                self.decisions
                    .iter()
                    .flat_map(|d| d.source_chunk_sequences.iter().copied()),
            )
            .chain(
                self.actions
                    .iter()
                    .flat_map(|a| a.source_chunk_sequences.iter().copied()),
            );
        for seq in link_sequences {
            if seq >= n {
                return Err(Error::InvalidArgument(format!(
                    "source {}: reference to chunk sequence {} but only {} chunks",
                    self.source.id, seq, n
                )));
            }
        }

        for link in &self.chunk_entity_links {
            if !self.entities.iter().any(|e| e.id == link.entity_id) {
                return Err(Error::InvalidArgument(format!(
                    "source {}: link to unknown entity {}",
                    self.source.id, link.entity_id
                )));
            }
        }
        Ok(())
    }
}

/// First 16 hex chars of the SHA-256 digest of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Stable source id derived from raw content.
pub fn source_id_for(content: &str) -> String {
    short_hash(content)
}

pub fn chunk_id(source_id: &str, sequence_number: usize) -> String {
    format!("{}_c{:04}", source_id, sequence_number)
}

pub fn decision_id(source_id: &str, index: usize) -> String {
    format!("{}_d{}", source_id, index)
}

pub fn action_id(source_id: &str, index: usize) -> String {
    format!("{}_a{}", source_id, index)
}
