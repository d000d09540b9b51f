//! Segmentation & classification: raw text to typed, scored chunks.
//!
//! Text with recognisable speaker turns is grouped greedily by size and
//! topic change; anything else falls back to fixed-size windows. The
//! engine never fails: the worst case is a list of `discussion` chunks.

pub mod chunker;
pub mod classifier;
pub mod turns;

pub use chunker::{Chunker, Segment, FALLBACK_IMPORTANCE, UNKNOWN_SPEAKER};
pub use classifier::{classify, importance, is_topic_change};
pub use turns::{parse_turns, Turn};

use tracing::{debug, warn};

use crate::config::SegmentationConfig;
use crate::document::{chunk_id, ChunkRecord};

/// Result of segmenting one text.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    /// True when no speaker turns were found and windowing was used.
    pub fallback: bool,
}

impl Segmentation {
    /// Bind segments to a source, numbering them `0..N-1`.
    pub fn into_chunks(self, source_id: &str) -> Vec<ChunkRecord> {
        into_chunks(source_id, self.segments)
    }
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    chunker: Chunker,
}

impl Segmenter {
    pub fn new(config: &SegmentationConfig) -> Self {
        Self {
            chunker: Chunker::new(
                config.min_chunk_size,
                config.max_chunk_size,
                config.fallback_window,
            ),
        }
    }

    /// Segment raw text, falling back to windowing when it has no turns.
    pub fn segment(&self, text: &str) -> Segmentation {
        let turns = parse_turns(text);
        if turns.is_empty() {
            if !text.trim().is_empty() {
                debug!("No speaker turns found, using fixed-size windows");
            }
            return Segmentation {
                segments: self.chunker.fallback(text),
                fallback: true,
            };
        }
        self.segment_turns(&turns)
    }

    /// Segment already-parsed turns (chat exports bypass line parsing).
    pub fn segment_turns(&self, turns: &[Turn]) -> Segmentation {
        Segmentation {
            segments: self.chunker.chunk_turns(turns),
            fallback: false,
        }
    }

    /// One chunk per message, for chat exports.
    pub fn segment_messages(&self, messages: &[Turn]) -> Segmentation {
        Segmentation {
            segments: self.chunker.per_turn(messages),
            fallback: false,
        }
    }

    /// Fixed-size windows regardless of turn markers.
    pub fn segment_plain(&self, text: &str) -> Segmentation {
        Segmentation {
            segments: self.chunker.fallback(text),
            fallback: true,
        }
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(&SegmentationConfig::default())
    }
}

/// Assign ids and contiguous sequence numbers.
pub fn into_chunks(source_id: &str, segments: Vec<Segment>) -> Vec<ChunkRecord> {
    segments
        .into_iter()
        .enumerate()
        .map(|(seq, segment)| {
            let mut importance_score = segment.importance_score;
            if !(0.0..=1.0).contains(&importance_score) {
                warn!(source_id, seq, importance_score, "Importance out of range, clamping");
                importance_score = importance_score.clamp(0.0, 1.0);
            }
            ChunkRecord {
                id: chunk_id(source_id, seq),
                text: segment.text,
                sequence_number: seq,
                speakers: segment.speakers,
                chunk_type: segment.chunk_type,
                importance_score,
                start_time: segment.start_time,
                embedding: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkType;

    #[test]
    fn transcript_is_segmented_by_turns() {
        let text = "Anna  10:00\nWe decided to prioritise Brazil.\n\nLuis  10:01\nAgreed.\n";
        let segmentation = Segmenter::default().segment(text);
        assert!(!segmentation.fallback);
        let chunks = segmentation.into_chunks("src1");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "src1_c0000");
        assert_eq!(chunks[0].chunk_type, ChunkType::Decision);
        assert_eq!(chunks[0].speakers, vec!["Anna", "Luis"]);
    }

    #[test]
    fn malformed_text_falls_back() {
        let text = "just a memo with no structure ".repeat(100);
        let segmentation = Segmenter::default().segment(&text);
        assert!(segmentation.fallback);
        let chunks = segmentation.into_chunks("memo");
        assert!(chunks.len() >= 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.sequence_number, i);
            assert_eq!(c.chunk_type, ChunkType::Discussion);
            assert_eq!(c.importance_score, 0.5);
            assert_eq!(c.speakers, vec![UNKNOWN_SPEAKER]);
        }
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        let segmentation = Segmenter::default().segment("");
        assert!(segmentation.segments.is_empty());
    }
}
