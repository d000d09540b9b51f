//! System prompt loader.
//!
//! Prompts live in the `prompts/` directory at the project root. A built-in
//! copy is compiled in so the binary works from any working directory.

use std::path::PathBuf;

use crate::{Error, Result};

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Entity, decision and action extraction over a whole source.
    EntityExtraction,
}

impl Prompt {
    /// Prompt file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::EntityExtraction => "entity_extraction.md",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            Prompt::EntityExtraction => include_str!("../prompts/entity_extraction.md"),
        }
    }

    /// Load the prompt from disk.
    pub fn load(&self) -> Result<String> {
        load_prompt(self.filename())
    }

    /// Load from disk if an override exists, otherwise use the built-in text.
    pub fn load_or_builtin(&self) -> String {
        self.load().unwrap_or_else(|_| self.builtin().to_string())
    }
}

/// Load a prompt by file name.
pub fn load_prompt(filename: &str) -> Result<String> {
    let path = prompts_dir().join(filename);
    std::fs::read_to_string(&path)
        .map_err(|e| Error::InvalidArgument(format!("Failed to load prompt {}: {}", filename, e)))
}

/// Path to the prompts directory.
pub fn prompts_dir() -> PathBuf {
    let candidates = [
        PathBuf::from("prompts"),
        PathBuf::from("../prompts"),
        PathBuf::from("../../prompts"),
    ];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("prompts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_filenames() {
        assert_eq!(Prompt::EntityExtraction.filename(), "entity_extraction.md");
    }

    #[test]
    fn test_builtin_prompt_describes_json_shape() {
        let text = Prompt::EntityExtraction.load_or_builtin();
        assert!(text.contains("\"entities\""));
        assert!(text.contains("\"decisions\""));
        assert!(text.contains("\"task\""));
    }

    #[test]
    fn test_load_prompt_nonexistent_file() {
        let result = load_prompt("nonexistent_file_12345.md");
        assert!(result.is_err());
    }
}
