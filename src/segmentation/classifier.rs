//! Chunk classification and importance scoring.
//!
//! Pattern sets are tested in fixed priority order: decision,
//! action_assignment, assessment, question. The first set that matches wins;
//! nothing matching means `discussion`.

use once_cell::sync::Lazy;
use regex::RegexSet;

use crate::document::ChunkType;

fn pattern_set(patterns: &[&str]) -> RegexSet {
    let patterns: Vec<String> = patterns.iter().map(|p| format!("(?i){}", p)).collect();
    RegexSet::new(patterns).expect("valid classifier patterns")
}

static DECISION: Lazy<RegexSet> = Lazy::new(|| {
    pattern_set(&[
        r"\b(we|i|they|the (team|committee|board|group))\s+(have\s+|has\s+)?(decided|agreed|resolved|concluded)\b",
        r"\bdecision\b",
        r"\bdecided\b",
        r"\bagreed\b",
        r"\bapproved\b",
        r"\b(we('ll| will)|let'?s) go with\b",
        r"\bfinal (call|answer|position)\b",
        r"\bit'?s settled\b",
    ])
});

static ACTION: Lazy<RegexSet> = Lazy::new(|| {
    pattern_set(&[
        r"\baction (item|point)s?\b",
        r"\b(i|we|you|he|she|they)('ll| will) (send|prepare|draft|follow up|take care|look into|circulate|schedule|share|check|update|write|call|email|contact|organi[sz]e|set up)\b",
        r"\bcan you (please )?(send|prepare|draft|follow up|take|look|circulate|schedule|share|check|update|write|call|email|contact)\b",
        r"\bfollow[- ]up\b",
        r"\bassign(ed|ing)?\b",
        r"\bowner\b",
        r"\bdeadline\b",
        r"\bby (monday|tuesday|wednesday|thursday|friday|tomorrow|next week|end of (the )?(day|week|month))\b",
        r"\btake (the )?(lead|action)\b",
    ])
});

static ASSESSMENT: Lazy<RegexSet> = Lazy::new(|| {
    pattern_set(&[
        r"\bi (think|believe|feel)\b",
        r"\bin (my|our) (view|opinion|assessment)\b",
        r"\bwe believe\b",
        r"\bassess",
        r"\bevaluat",
        r"priorit",
        r"\brisks?\b",
        r"\b(likely|unlikely)\b",
        r"\bconcern(s|ed)?\b",
        r"\b(strong|weak)(er|est)?\b",
        r"\bimpact\b",
        r"\b(pros and cons|trade-?off)\b",
    ])
});

static QUESTION: Lazy<RegexSet> = Lazy::new(|| {
    pattern_set(&[
        r"\?",
        r"\bany (questions|thoughts|objections)\b",
        r"\b(i'?m )?wondering\b",
        r"\bnot sure (whether|if)\b",
    ])
});

static TOPIC_CHANGE: Lazy<RegexSet> = Lazy::new(|| {
    pattern_set(&[
        r"\bmoving on\b",
        r"\bnext (topic|item|point|agenda item|question)\b",
        r"\blet'?s (move|turn|switch|go) (on )?to\b",
        r"\bturning to\b",
        r"\bswitching (gears|topics)\b",
        r"\bon (another|a different) (note|topic)\b",
        r"\b(another|new) topic\b",
        r"\bchanging the subject\b",
        r"\bnext on the agenda\b",
    ])
});

fn patterns(kind: ChunkType) -> Option<&'static RegexSet> {
    match kind {
        ChunkType::Decision => Some(&DECISION),
        ChunkType::ActionAssignment => Some(&ACTION),
        ChunkType::Assessment => Some(&ASSESSMENT),
        ChunkType::Question => Some(&QUESTION),
        ChunkType::Discussion => None,
    }
}

/// Whether `text` matches the pattern set of `kind`. Always false for
/// `discussion`, which is the absence of a match.
pub fn matches(kind: ChunkType, text: &str) -> bool {
    patterns(kind).is_some_and(|set| set.is_match(text))
}

/// Classify a chunk by priority-ordered pattern match.
pub fn classify(text: &str) -> ChunkType {
    [
        ChunkType::Decision,
        ChunkType::ActionAssignment,
        ChunkType::Assessment,
        ChunkType::Question,
    ]
    .into_iter()
    .find(|kind| matches(*kind, text))
    .unwrap_or(ChunkType::Discussion)
}

/// Whether a turn opens a new topic.
pub fn is_topic_change(text: &str) -> bool {
    TOPIC_CHANGE.is_match(text)
}

/// Two-stage average: type base with length factor, then that with
/// speaker diversity. Rounded to 2 decimals.
pub fn importance(chunk_type: ChunkType, text_len: usize, distinct_speakers: usize) -> f64 {
    let length_factor = (text_len as f64 / 1000.0).min(1.0);
    let diversity = (distinct_speakers as f64 / 3.0).min(1.0);
    let first = (chunk_type.base_importance() + length_factor) / 2.0;
    let score = (first + diversity) / 2.0;
    ((score * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_beats_assessment() {
        assert_eq!(
            classify("We decided to deprioritize Germany"),
            ChunkType::Decision
        );
        assert!(matches(ChunkType::Assessment, "We decided to deprioritize Germany"));
    }

    #[test]
    fn classifies_each_type() {
        assert_eq!(
            classify("Luis will send the revised tariff table by Friday."),
            ChunkType::ActionAssignment
        );
        assert_eq!(
            classify("I think the Brazilian market is the stronger bet."),
            ChunkType::Assessment
        );
        assert_eq!(classify("Who owns the shipping file?"), ChunkType::Question);
        assert_eq!(
            classify("Good morning, the weather is nice today."),
            ChunkType::Discussion
        );
    }

    #[test]
    fn action_outranks_question() {
        assert_eq!(
            classify("Can you send the memo to the embassy?"),
            ChunkType::ActionAssignment
        );
    }

    #[test]
    fn detects_topic_change_phrases() {
        assert!(is_topic_change("Moving on to the next item, logistics."));
        assert!(is_topic_change("OK, let's turn to the budget"));
        assert!(!is_topic_change("We keep talking about the budget"));
    }

    #[test]
    fn importance_is_two_stage_average() {
        // ((0.9 + 0.5) / 2 + 2/3) / 2 = 0.6833..
        assert_eq!(importance(ChunkType::Decision, 500, 2), 0.68);
        // ((0.5 + 1.0) / 2 + 1.0) / 2 = 0.875
        assert_eq!(importance(ChunkType::Discussion, 5000, 7), 0.88);
        assert_eq!(importance(ChunkType::Question, 0, 0), 0.15);
    }

    #[test]
    fn importance_stays_in_unit_range() {
        for kind in ChunkType::ALL {
            for len in [0, 1, 999, 1000, 100_000] {
                for speakers in [0, 1, 3, 50] {
                    let score = importance(kind, len, speakers);
                    assert!((0.0..=1.0).contains(&score), "{kind} {len} {speakers}");
                }
            }
        }
    }
}
