//! Greedy turn accumulation and fixed-size fallback windowing.

use super::classifier::{classify, importance, is_topic_change};
use super::turns::Turn;
use crate::document::ChunkType;

/// Speaker recorded on chunks that came from fallback windowing.
pub const UNKNOWN_SPEAKER: &str = "unknown";
/// Importance assigned to fallback chunks.
pub const FALLBACK_IMPORTANCE: f64 = 0.5;

/// A classified, scored chunk before it is bound to a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub speakers: Vec<String>,
    pub chunk_type: ChunkType,
    pub importance_score: f64,
    pub start_time: Option<String>,
}

/// Groups turns into bounded chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    min_chunk_size: usize,
    max_chunk_size: usize,
    fallback_window: usize,
}

impl Chunker {
    pub fn new(min_chunk_size: usize, max_chunk_size: usize, fallback_window: usize) -> Self {
        Self {
            min_chunk_size,
            max_chunk_size: max_chunk_size.max(1),
            fallback_window: fallback_window.max(1),
        }
    }

    /// Accumulate turns until the size or topic-change trigger fires, then
    /// classify and score each group.
    pub fn chunk_turns(&self, turns: &[Turn]) -> Vec<Segment> {
        let mut groups: Vec<Vec<&Turn>> = Vec::new();
        let mut current: Vec<&Turn> = Vec::new();
        let mut current_len = 0usize;

        for turn in turns {
            if !current.is_empty() {
                let next_len = turn.len();
                let combined = current_len + next_len;
                let size_break = combined > self.max_chunk_size && current_len > self.min_chunk_size;
                let topic_break = combined > self.min_chunk_size && is_topic_change(&turn.text);
                if size_break || topic_break {
                    groups.push(std::mem::take(&mut current));
                    current_len = 0;
                }
            }
            current_len += turn.len();
            current.push(turn);
        }
        if !current.is_empty() {
            groups.push(current);
        }

        groups.iter().map(|group| build_segment(group)).collect()
    }

    /// One segment per turn. Used for chat messages.
    pub fn per_turn(&self, turns: &[Turn]) -> Vec<Segment> {
        turns.iter().map(|turn| build_segment(&[turn])).collect()
    }

    /// Split raw text into windows of at most `fallback_window` characters,
    /// breaking at the last whitespace inside each window.
    pub fn fallback(&self, text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut rest = text.trim();

        while !rest.is_empty() {
            let (piece, remainder) = match rest.char_indices().nth(self.fallback_window) {
                None => (rest, ""),
                Some((cut, c)) if c.is_whitespace() => (&rest[..cut], &rest[cut..]),
                Some((cut, _)) => {
                    let head = &rest[..cut];
                    match head.rfind(char::is_whitespace) {
                        Some(ws) if ws > 0 => (&rest[..ws], &rest[ws..]),
                        _ => (head, &rest[cut..]),
                    }
                }
            };

            let piece = piece.trim();
            if !piece.is_empty() {
                segments.push(Segment {
                    text: piece.to_string(),
                    speakers: vec![UNKNOWN_SPEAKER.to_string()],
                    chunk_type: ChunkType::Discussion,
                    importance_score: FALLBACK_IMPORTANCE,
                    start_time: None,
                });
            }
            rest = remainder.trim_start();
        }

        segments
    }
}

fn build_segment(group: &[&Turn]) -> Segment {
    let mut speakers: Vec<String> = Vec::new();
    for turn in group {
        if !speakers.iter().any(|s| s == &turn.speaker) {
            speakers.push(turn.speaker.clone());
        }
    }

    let text = group
        .iter()
        .map(|t| format!("{}: {}", t.speaker, t.text))
        .collect::<Vec<_>>()
        .join("\n");
    let spoken = group
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let chunk_type = classify(&spoken);
    let importance_score = importance(chunk_type, text.chars().count(), speakers.len());

    Segment {
        text,
        speakers,
        chunk_type,
        importance_score,
        start_time: group.first().and_then(|t| t.timestamp.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: &str, text: &str) -> Turn {
        Turn::new(speaker, Some("10:00".to_string()), text)
    }

    fn filler(n: usize) -> String {
        "a".repeat(n)
    }

    #[test]
    fn topic_change_breaks_after_running_total_passes_min() {
        let turns = vec![
            turn("Anna", &filler(120)),
            turn("Luis", &filler(130)),
            turn("Anna", &format!("Moving on to logistics {}", filler(60))),
        ];
        let chunks = Chunker::new(300, 1500, 1000).chunk_turns(&turns);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("Anna: Moving on"));
        assert_eq!(chunks[0].speakers, vec!["Anna", "Luis"]);
    }

    #[test]
    fn topic_change_ignored_while_chunk_small() {
        let turns = vec![
            turn("Anna", "Hi all."),
            turn("Luis", "Moving on to the agenda then."),
        ];
        let chunks = Chunker::new(300, 1500, 1000).chunk_turns(&turns);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn size_trigger_requires_min_reached() {
        let chunker = Chunker::new(300, 500, 1000);
        let turns = vec![
            turn("A", &filler(350)),
            turn("B", &filler(200)),
            turn("C", &filler(100)),
        ];
        let chunks = chunker.chunk_turns(&turns);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("B: "));

        // Below min the chunk keeps growing past max.
        let turns = vec![turn("A", &filler(250)), turn("B", &filler(400))];
        assert_eq!(chunker.chunk_turns(&turns).len(), 1);
    }

    #[test]
    fn size_trigger_needs_chunk_strictly_above_min() {
        let chunker = Chunker::new(300, 500, 1000);
        let at_min = vec![turn("A", &filler(300)), turn("B", &filler(250))];
        assert_eq!(chunker.chunk_turns(&at_min).len(), 1);

        let above_min = vec![turn("A", &filler(301)), turn("B", &filler(250))];
        assert_eq!(chunker.chunk_turns(&above_min).len(), 2);
    }

    #[test]
    fn segment_records_first_timestamp_and_scores() {
        let turns = vec![
            Turn::new("Anna", Some("09:30".to_string()), "We decided to ship."),
            Turn::new("Luis", Some("09:31".to_string()), "Fine."),
        ];
        let chunks = Chunker::new(300, 1500, 1000).chunk_turns(&turns);
        assert_eq!(chunks[0].start_time.as_deref(), Some("09:30"));
        assert_eq!(chunks[0].chunk_type, ChunkType::Decision);
        assert_eq!(chunks[0].text, "Anna: We decided to ship.\nLuis: Fine.");
        assert!(chunks[0].importance_score > 0.0 && chunks[0].importance_score <= 1.0);
    }

    #[test]
    fn per_turn_keeps_every_message_separate() {
        let turns = vec![
            turn("Anna", "Should we go?"),
            turn("Luis", "Will you send the memo by Friday?"),
            turn("Anna", "ok"),
        ];
        let segments = Chunker::new(300, 1500, 1000).per_turn(&turns);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].chunk_type, ChunkType::Question);
        assert_eq!(segments[2].text, "Anna: ok");
        assert_eq!(segments[2].speakers, vec!["Anna"]);
    }

    #[test]
    fn fallback_splits_on_whitespace() {
        let chunker = Chunker::new(300, 1500, 10);
        let segments = chunker.fallback("alpha beta gamma delta");
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha beta", "gamma", "delta"]);
        for s in &segments {
            assert_eq!(s.speakers, vec![UNKNOWN_SPEAKER]);
            assert_eq!(s.chunk_type, ChunkType::Discussion);
            assert_eq!(s.importance_score, FALLBACK_IMPORTANCE);
            assert!(s.start_time.is_none());
        }
    }

    #[test]
    fn fallback_hard_cuts_long_words() {
        let chunker = Chunker::new(300, 1500, 4);
        let segments = chunker.fallback("abcdefghij");
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn fallback_on_blank_text_is_empty() {
        let chunker = Chunker::new(300, 1500, 1000);
        assert!(chunker.fallback("   \n  ").is_empty());
    }
}
