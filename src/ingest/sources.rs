//! Source discovery and parsing.
//!
//! Three kinds of input are recognised:
//! - meeting transcripts (`.txt`, `.vtt`, `.md` with speaker turns)
//! - chat exports (`.json`, Telegram desktop layout)
//! - plain documents (anything else, windowed)

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::document::{source_id_for, SourceCategory, SourceRecord};
use crate::error::{Error, Result};
use crate::segmentation::{Segmentation, Segmenter, Turn, UNKNOWN_SPEAKER};

/// File extensions picked up by [`discover`].
pub const SOURCE_EXTENSIONS: [&str; 5] = ["txt", "vtt", "md", "text", "json"];

static FILE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("valid date regex"));

/// Raw content of one source plus where it came from.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub path: PathBuf,
    pub title: String,
    pub content: String,
}

impl SourceInput {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            title,
            content: content.into(),
        }
    }

    pub fn id(&self) -> String {
        source_id_for(&self.content)
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }
}

/// A parsed source ready for extraction.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub record: SourceRecord,
    /// Text handed to the extraction provider.
    pub text: String,
    pub segmentation: Segmentation,
}

/// All source files under `dir`, sorted by path. Hidden files are skipped.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "input directory not found: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    SOURCE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                })
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Read a source file. Invalid UTF-8 is replaced rather than rejected.
pub fn load_source(path: &Path) -> Result<SourceInput> {
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes).into_owned();
    Ok(SourceInput::new(path, content))
}

/// Turn raw content into a source record and its segments.
pub fn parse_source(input: &SourceInput, segmenter: &Segmenter) -> Result<ParsedSource> {
    if input.content.trim().is_empty() {
        return Err(Error::ParseFailure(format!(
            "{}: source is empty",
            input.path.display()
        )));
    }

    if input.is_json() {
        match serde_json::from_str::<ChatExport>(&input.content) {
            Ok(export) => return parse_chat(input, export, segmenter),
            Err(err) => {
                warn!(
                    path = %input.path.display(),
                    error = %err,
                    "Not a chat export, treating as plain document"
                );
                return Ok(parse_text(input, segmenter.segment_plain(&input.content)));
            }
        }
    }

    Ok(parse_text(input, segmenter.segment(&input.content)))
}

fn parse_text(input: &SourceInput, segmentation: Segmentation) -> ParsedSource {
    let category = if segmentation.fallback {
        SourceCategory::Document
    } else {
        SourceCategory::Meeting
    };

    let mut participants: Vec<String> = Vec::new();
    for speaker in segmentation.segments.iter().flat_map(|s| s.speakers.iter()) {
        if speaker != UNKNOWN_SPEAKER && !participants.contains(speaker) {
            participants.push(speaker.clone());
        }
    }

    ParsedSource {
        record: SourceRecord {
            id: input.id(),
            title: input.title.clone(),
            date: date_from_name(&input.path),
            end_date: None,
            category,
            participants,
        },
        text: input.content.clone(),
        segmentation,
    }
}

fn parse_chat(
    input: &SourceInput,
    export: ChatExport,
    segmenter: &Segmenter,
) -> Result<ParsedSource> {
    let turns: Vec<Turn> = export
        .messages
        .iter()
        .filter(|m| m.kind == "message")
        .filter_map(|m| {
            let text = flatten_text(&m.text);
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            let sender = m
                .from
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(UNKNOWN_SPEAKER);
            Some(Turn::new(sender, m.date.clone(), text))
        })
        .collect();

    if turns.is_empty() {
        return Err(Error::ParseFailure(format!(
            "{}: chat export has no text messages",
            input.path.display()
        )));
    }

    let mut participants: Vec<String> = Vec::new();
    for turn in &turns {
        if turn.speaker != UNKNOWN_SPEAKER && !participants.contains(&turn.speaker) {
            participants.push(turn.speaker.clone());
        }
    }

    let mut days: Vec<&str> = turns
        .iter()
        .filter_map(|t| t.timestamp.as_deref())
        .filter_map(|d| d.get(..10))
        .collect();
    days.sort_unstable();

    let date = date_from_name(&input.path).or_else(|| days.first().map(|d| d.to_string()));
    let end_date = days.last().map(|d| d.to_string());

    let text = turns
        .iter()
        .map(|t| format!("{}: {}", t.speaker, t.text))
        .collect::<Vec<_>>()
        .join("\n");

    let title = export
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| input.title.clone());

    debug!(
        path = %input.path.display(),
        messages = turns.len(),
        participants = participants.len(),
        "Parsed chat export"
    );

    Ok(ParsedSource {
        record: SourceRecord {
            id: input.id(),
            title,
            date,
            end_date,
            category: SourceCategory::Chat,
            participants,
        },
        text,
        segmentation: segmenter.segment_messages(&turns),
    })
}

fn date_from_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    FILE_DATE
        .captures(&name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Deserialize)]
struct ChatExport {
    #[serde(default)]
    name: Option<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    text: Value,
}

fn default_kind() -> String {
    "message".to_string()
}

/// Message text is either a string or a list of strings and `{text}` parts.
fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.as_str(),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str).unwrap_or(""),
                _ => "",
            })
            .collect(),
        _ => String::new(),
    }
}
