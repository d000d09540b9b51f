//! Context block assembly.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

use crate::graph::{rank_cmp, ChunkHit};

/// The ranked, provenance-annotated context handed to a reasoning layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBlock {
    pub query: String,
    pub chunks: Vec<ChunkHit>,
    pub text: String,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// Merge candidate hits into a block: dedup by chunk id, rank, truncate to
/// `max_chunks` and render.
///
/// The result depends only on the set of candidates, not their order.
pub fn assemble(query: &str, candidates: Vec<ChunkHit>, max_chunks: usize) -> ContextBlock {
    let mut unique: BTreeMap<String, ChunkHit> = BTreeMap::new();
    for hit in candidates {
        match unique.get_mut(&hit.chunk_id) {
            Some(existing) => {
                // keep the best engine score seen for the chunk
                if let Some(score) = hit.score {
                    existing.score = Some(existing.score.map_or(score, |s| s.max(score)));
                }
            }
            None => {
                unique.insert(hit.chunk_id.clone(), hit);
            }
        }
    }

    let mut chunks: Vec<ChunkHit> = unique.into_values().collect();
    chunks.sort_by(rank_cmp);
    chunks.truncate(max_chunks);

    let text = render(query, &chunks);
    ContextBlock {
        query: query.to_string(),
        chunks,
        text,
    }
}

/// Render chunks with their provenance headers.
pub fn render(query: &str, chunks: &[ChunkHit]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Query: {}", query.trim());
    out.push('\n');
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] Source: {} | Date: {} | Speakers: {} | Type: {}",
            i + 1,
            chunk.source_title,
            chunk.source_date.as_deref().unwrap_or("unknown"),
            chunk.speakers.join(", "),
            chunk.chunk_type
        );
        let _ = writeln!(out, "{}", chunk.text.trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkType;

    fn hit(id: &str, importance: f64, date: Option<&str>, score: Option<f64>) -> ChunkHit {
        ChunkHit {
            chunk_id: id.into(),
            text: format!("text of {}", id),
            sequence_number: 0,
            speakers: vec!["Anna".into(), "Luis".into()],
            chunk_type: ChunkType::Decision,
            importance_score: importance,
            source_id: "s".into(),
            source_title: "Weekly sync".into(),
            source_date: date.map(str::to_string),
            score,
        }
    }

    #[test]
    fn dedups_ranks_and_truncates() {
        let candidates = vec![
            hit("a", 0.5, Some("2024-01-01"), None),
            hit("b", 0.9, Some("2024-01-01"), None),
            hit("a", 0.5, Some("2024-01-01"), Some(3.0)),
            hit("c", 0.5, Some("2024-05-01"), None),
        ];
        let block = assemble("germany", candidates, 2);
        let ids: Vec<&str> = block.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn output_is_independent_of_candidate_order() {
        let a = vec![
            hit("x", 0.7, None, Some(1.0)),
            hit("y", 0.7, None, None),
            hit("x", 0.7, None, None),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(assemble("q", a, 5), assemble("q", b, 5));
    }

    #[test]
    fn renders_provenance_headers() {
        let block = assemble("brazil tariffs", vec![hit("a", 0.9, None, None)], 5);
        let expected = "Query: brazil tariffs\n\n\
                        [1] Source: Weekly sync | Date: unknown | Speakers: Anna, Luis | Type: decision\n\
                        text of a\n\n";
        assert_eq!(block.text, expected);
    }

    #[test]
    fn empty_candidates_render_header_only() {
        let block = assemble("nothing", vec![], 5);
        assert!(block.is_empty());
        assert_eq!(block.text, "Query: nothing\n\n");
    }
}
