//! Speaker-turn parsing.
//!
//! Two line formats are recognised:
//!
//! ```text
//! Anna Weber  10:02            (header; text follows on the next lines)
//! Anna Weber [10:02:15]
//! [10:02] Anna Weber: text     (inline)
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

/// One utterance by one speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: String,
    pub timestamp: Option<String>,
    pub text: String,
}

impl Turn {
    pub fn new(speaker: impl Into<String>, timestamp: Option<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            timestamp,
            text: text.into(),
        }
    }

    /// Length used for chunk sizing.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<speaker>[\p{L}][\p{L}\p{M}'’.\- ]{0,60}?)\s+\[?(?P<time>\d{1,2}:\d{2}(?::\d{2})?)\]?\s*$")
        .expect("valid header regex")
});

static INLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\[(?P<time>\d{1,2}:\d{2}(?::\d{2})?)\]\s*(?P<speaker>[^:\[\]]{1,60}?)\s*:\s*(?P<text>.*)$")
        .expect("valid inline regex")
});

type PendingTurn = (String, Option<String>, Vec<String>);

fn flush(current: &mut Option<PendingTurn>, turns: &mut Vec<Turn>) {
    if let Some((speaker, time, lines)) = current.take() {
        let body = lines.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
        if !body.is_empty() {
            turns.push(Turn::new(speaker, time, body));
        }
    }
}

/// Parse text into speaker turns. Returns an empty list when no turn
/// markers are found; callers fall back to fixed-size windowing.
pub fn parse_turns(text: &str) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut current: Option<PendingTurn> = None;

    for line in text.lines() {
        if let Some(caps) = INLINE.captures(line) {
            flush(&mut current, &mut turns);
            let speaker = caps["speaker"].trim().to_string();
            let time = Some(caps["time"].to_string());
            current = Some((speaker, time, vec![caps["text"].trim().to_string()]));
            continue;
        }

        if let Some(caps) = HEADER.captures(line) {
            flush(&mut current, &mut turns);
            let speaker = caps["speaker"].trim().to_string();
            current = Some((speaker, Some(caps["time"].to_string()), Vec::new()));
            continue;
        }

        if let Some((_, _, lines)) = current.as_mut() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
    }
    flush(&mut current, &mut turns);

    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_format() {
        let text = "Weekly trade sync\n\nAnna Weber  10:02\nGood morning everyone.\nLet's start.\n\nLuis Ortega  10:03:30\nMorning!\n";
        let turns = parse_turns(text);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker, "Anna Weber");
        assert_eq!(turns[0].timestamp.as_deref(), Some("10:02"));
        assert_eq!(turns[0].text, "Good morning everyone. Let's start.");
        assert_eq!(turns[1].speaker, "Luis Ortega");
        assert_eq!(turns[1].timestamp.as_deref(), Some("10:03:30"));
    }

    #[test]
    fn parses_bracketed_header_time() {
        let turns = parse_turns("Anna [09:15]\nHello\n");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].speaker, "Anna");
        assert_eq!(turns[0].timestamp.as_deref(), Some("09:15"));
    }

    #[test]
    fn parses_inline_format() {
        let text = "[10:00] Anna: We decided to go ahead.\n[10:01] Luis: Agreed.\nand one more thing\n";
        let turns = parse_turns(text);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "We decided to go ahead.");
        assert_eq!(turns[1].speaker, "Luis");
        assert_eq!(turns[1].text, "Agreed. and one more thing");
    }

    #[test]
    fn drops_empty_turns() {
        let turns = parse_turns("Anna  10:00\n\nLuis  10:01\nHi\n");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].speaker, "Luis");
    }

    #[test]
    fn plain_prose_yields_no_turns() {
        let text = "This is an ordinary memo.\nIt has no speakers at all: none.\n";
        assert!(parse_turns(text).is_empty());
    }

    #[test]
    fn turn_len_counts_chars() {
        let turn = Turn::new("A", None, "héllo");
        assert_eq!(turn.len(), 5);
        assert!(!turn.is_empty());
    }
}
