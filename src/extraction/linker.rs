//! Chunk-to-entity linking and outcome provenance.

use std::collections::HashSet;

use super::entity::{canonical_name, EntityRecord};
use super::provider::{ActionCandidate, DecisionCandidate};
use crate::document::{
    action_id, decision_id, ActionRecord, ChunkEntityLink, ChunkRecord, DecisionRecord,
};

/// Link every chunk whose text contains an entity's canonical name
/// (case-insensitive substring, no token-boundary check).
pub fn link_mentions(chunks: &[ChunkRecord], entities: &[EntityRecord]) -> Vec<ChunkEntityLink> {
    let names: Vec<(String, &str)> = entities
        .iter()
        .map(|e| (canonical_name(&e.name), e.id.as_str()))
        .filter(|(name, _)| !name.is_empty())
        .collect();

    let mut links = Vec::new();
    for chunk in chunks {
        let haystack = chunk.text.to_lowercase();
        for (name, id) in &names {
            if haystack.contains(name.as_str()) {
                links.push(ChunkEntityLink {
                    chunk_sequence: chunk.sequence_number,
                    entity_id: id.to_string(),
                });
            }
        }
    }
    links
}

/// Lower-cased words with surrounding punctuation removed.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Rank chunks by word overlap with `text` and keep the best `top_n`
/// with overlap > 0. Ties go to the earlier chunk. Returned in sequence order.
pub fn provenance(text: &str, chunks: &[ChunkRecord], top_n: usize) -> Vec<usize> {
    let words = word_set(text);
    if words.is_empty() || top_n == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, usize)> = chunks
        .iter()
        .map(|chunk| {
            let overlap = word_set(&chunk.text).intersection(&words).count();
            (overlap, chunk.sequence_number)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut picked: Vec<usize> = scored.into_iter().take(top_n).map(|(_, seq)| seq).collect();
    picked.sort_unstable();
    picked
}

/// Turn provider outcomes into records with ids and provenance. Outcomes
/// with the same text (case-insensitive) are reported once.
pub fn build_outcomes(
    source_id: &str,
    decisions: &[DecisionCandidate],
    actions: &[ActionCandidate],
    chunks: &[ChunkRecord],
    top_n: usize,
) -> (Vec<DecisionRecord>, Vec<ActionRecord>) {
    let mut seen = HashSet::new();
    let decision_records: Vec<DecisionRecord> = decisions
        .iter()
        .filter(|d| !d.description.trim().is_empty())
        .filter(|d| seen.insert(d.description.trim().to_lowercase()))
        .enumerate()
        .map(|(i, d)| DecisionRecord {
            id: decision_id(source_id, i),
            description: d.description.trim().to_string(),
            rationale: d.rationale.clone().filter(|r| !r.trim().is_empty()),
            source_chunk_sequences: provenance(&d.description, chunks, top_n),
        })
        .collect();

    let mut seen = HashSet::new();
    let action_records: Vec<ActionRecord> = actions
        .iter()
        .filter(|a| !a.task.trim().is_empty())
        .filter(|a| seen.insert(a.task.trim().to_lowercase()))
        .enumerate()
        .map(|(i, a)| ActionRecord {
            id: action_id(source_id, i),
            task: a.task.trim().to_string(),
            owner: a.owner.clone().filter(|o| !o.trim().is_empty()),
            source_chunk_sequences: provenance(&a.task, chunks, top_n),
        })
        .collect();

    (decision_records, action_records)
}
