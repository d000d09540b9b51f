//! Offline extraction heuristics (no network calls).

use std::collections::HashSet;

use async_trait::async_trait;

use super::entity::{canonical_name, EntityCandidate, EntityKind};
use super::provider::{
    ActionCandidate, DecisionCandidate, ExtractionInput, ExtractionProvider, ExtractionResponse,
};
use crate::document::{ChunkRecord, ChunkType};
use crate::error::Result;
use crate::segmentation::{classifier, UNKNOWN_SPEAKER};

const STOPWORDS: &[&str] = &[
    "and", "or", "but", "the", "a", "an", "of", "in", "on", "for", "to", "with", "we", "i",
    "you", "he", "she", "it", "they", "our", "my", "your", "this", "that", "these", "those",
    "so", "yes", "no", "ok", "okay", "well", "also", "then", "there", "here", "what", "why",
    "how", "when", "where", "who", "which", "did", "does", "do", "is", "are", "was", "were",
    "can", "could", "should", "would", "will", "let", "let's", "if", "as", "at", "by", "from",
    "thanks", "thank", "good", "morning", "hello", "hi", "all", "everyone", "agreed", "right",
    "sure", "great", "fine", "just", "maybe", "not", "any", "some", "one", "next", "moving",
];

/// Capitalised-token keyword extractor.
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    stopwords: HashSet<String>,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordExtractor {
    pub fn new() -> Self {
        Self {
            stopwords: STOPWORDS.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Candidate names in order of first appearance. Runs of capitalised
    /// tokens are joined ("European Union"); handles and hashtags are kept.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        let mut run: Vec<String> = Vec::new();

        let mut close_run = |run: &mut Vec<String>, names: &mut Vec<String>| {
            if !run.is_empty() {
                let name = run.join(" ");
                if seen.insert(canonical_name(&name)) {
                    names.push(name);
                }
                run.clear();
            }
        };

        for raw in text.split_whitespace() {
            let ends_phrase = raw.ends_with(|c: char| matches!(c, ',' | '.' | ';' | ':' | '!' | '?' | ')'));
            let token = clean_token(raw);

            if self.is_candidate(token) {
                run.push(token.to_string());
            } else {
                close_run(&mut run, &mut names);
            }
            if ends_phrase {
                close_run(&mut run, &mut names);
            }
        }
        close_run(&mut run, &mut names);

        names
    }

    fn is_candidate(&self, token: &str) -> bool {
        if token.chars().count() < 3 {
            return false;
        }
        if self.stopwords.contains(&token.to_lowercase()) {
            return false;
        }
        token.starts_with('@')
            || token.starts_with('#')
            || token.chars().next().is_some_and(char::is_uppercase)
    }
}

fn clean_token(raw: &str) -> &str {
    let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '#');
    token
        .strip_suffix("'s")
        .or_else(|| token.strip_suffix("’s"))
        .unwrap_or(token)
}

/// Split text into sentences on `.`, `!` and `?`.
pub fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |n| n.is_whitespace());
        if boundary || c == '\n' {
            let s = current.trim();
            if !s.is_empty() {
                out.push(s.to_string());
            }
            current.clear();
        }
    }
    let s = current.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
    out
}

fn strip_speaker<'a>(line: &'a str, speakers: &[String]) -> &'a str {
    for speaker in speakers {
        if let Some(rest) = line
            .strip_prefix(speaker.as_str())
            .and_then(|r| r.strip_prefix(':'))
        {
            return rest.trim_start();
        }
    }
    line
}

/// The first sentence of a chunk that matches its own type's patterns,
/// else its first sentence.
fn key_sentence(chunk: &ChunkRecord) -> Option<String> {
    let body: Vec<&str> = chunk
        .text
        .lines()
        .map(|l| strip_speaker(l, &chunk.speakers))
        .collect();
    let all = sentences(&body.join("\n"));
    all.iter()
        .find(|s| classifier::matches(chunk.chunk_type, s))
        .or_else(|| all.first())
        .cloned()
}

/// Heuristic provider: capitalised tokens become topics, speakers become
/// people, decision/action chunks yield one outcome each.
#[derive(Debug, Clone, Default)]
pub struct HeuristicProvider {
    keywords: KeywordExtractor,
}

impl HeuristicProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keywords(&self) -> &KeywordExtractor {
        &self.keywords
    }
}

#[async_trait]
impl ExtractionProvider for HeuristicProvider {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn extract(&self, input: ExtractionInput<'_>) -> Result<ExtractionResponse> {
        let mut response = ExtractionResponse::default();

        let mut speaker_tokens = HashSet::new();
        let mut seen_speakers = HashSet::new();
        for chunk in input.chunks {
            for speaker in &chunk.speakers {
                if speaker == UNKNOWN_SPEAKER {
                    continue;
                }
                for token in speaker.split_whitespace() {
                    speaker_tokens.insert(token.to_lowercase());
                }
                if seen_speakers.insert(canonical_name(speaker)) {
                    response
                        .entities
                        .push(EntityCandidate::new(speaker.clone(), EntityKind::person()));
                }
            }
        }

        let body = if input.chunks.is_empty() {
            input.text.to_string()
        } else {
            input
                .chunks
                .iter()
                .flat_map(|c| c.text.lines().map(|l| strip_speaker(l, &c.speakers)))
                .collect::<Vec<_>>()
                .join("\n")
        };
        for name in self.keywords.extract(&body) {
            let all_speaker_tokens = name
                .split_whitespace()
                .all(|t| speaker_tokens.contains(&t.to_lowercase()));
            if !all_speaker_tokens {
                response
                    .entities
                    .push(EntityCandidate::new(name, EntityKind::topic()));
            }
        }

        for chunk in input.chunks {
            let Some(sentence) = key_sentence(chunk) else {
                continue;
            };
            match chunk.chunk_type {
                ChunkType::Decision => response.decisions.push(DecisionCandidate {
                    description: sentence,
                    rationale: None,
                }),
                ChunkType::ActionAssignment => response.actions.push(ActionCandidate {
                    task: sentence,
                    owner: chunk
                        .speakers
                        .first()
                        .filter(|s| s.as_str() != UNKNOWN_SPEAKER)
                        .cloned(),
                }),
                _ => {}
            }
        }

        Ok(response)
    }
}
