//! Persisted record of processed sources.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionState {
    #[serde(default)]
    pub processed_source_ids: BTreeSet<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl IngestionState {
    /// Read the state file. A missing or unreadable file yields an empty
    /// state so the next run reprocesses everything.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Ingestion state unusable, starting from empty state"
                );
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::StateCorruption(format!("cannot read {}: {}", path.display(), e))
        })?;
        let state: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::StateCorruption(format!("cannot parse {}: {}", path.display(), e))
        })?;
        debug!(
            path = %path.display(),
            processed = state.processed_source_ids.len(),
            "Ingestion state loaded"
        );
        Ok(state)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_updated = Some(Utc::now());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn is_processed(&self, source_id: &str) -> bool {
        self.processed_source_ids.contains(source_id)
    }

    pub fn mark_processed(&mut self, source_id: impl Into<String>) {
        self.processed_source_ids.insert(source_id.into());
    }

    pub fn len(&self) -> usize {
        self.processed_source_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed_source_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempdir().unwrap();
        let state = IngestionState::load(&dir.path().join("state.json"));
        assert!(state.is_empty());
        assert!(state.last_updated.is_none());
    }

    #[test]
    fn corrupt_file_is_empty_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ processed_source_ids: oops").unwrap();
        assert!(IngestionState::load(&path).is_empty());
    }

    #[test]
    fn save_then_load_keeps_ids_and_stamps_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut state = IngestionState::default();
        state.mark_processed("abc");
        state.mark_processed("def");
        state.save(&path).unwrap();

        let loaded = IngestionState::load(&path);
        assert_eq!(loaded.len(), 2);
        assert!(loaded.is_processed("abc"));
        assert!(loaded.last_updated.is_some());
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn reads_minimal_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"processed_source_ids":["x"]}"#).unwrap();
        let state = IngestionState::load(&path);
        assert!(state.is_processed("x"));
    }
}
