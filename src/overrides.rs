use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("failed to read override table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed override table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A fixed answer for a known demo filename.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverrideRecord {
    pub disease_name: String,
    pub confidence: f64,
}

/// Filename -> forced result, loaded once at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct OverrideTable {
    records: HashMap<String, OverrideRecord>,
}

impl OverrideTable {
    pub fn from_json_str(json: &str) -> Result<Self, OverrideError> {
        let records: HashMap<String, OverrideRecord> = serde_json::from_str(json)?;
        Ok(OverrideTable { records })
    }

    /// A missing file yields an empty table; an unreadable or malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OverrideError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "override table not found, continuing without overrides");
            return Ok(OverrideTable::default());
        }

        let json = std::fs::read_to_string(path).map_err(|source| OverrideError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_json_str(&json)?;
        info!(entries = table.len(), "loaded override table");
        Ok(table)
    }

    pub fn get(&self, filename: &str) -> Option<&OverrideRecord> {
        self.records.get(filename)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<(String, OverrideRecord)> for OverrideTable {
    fn from_iter<I: IntoIterator<Item = (String, OverrideRecord)>>(iter: I) -> Self {
        OverrideTable {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filename_keyed_records() {
        let table = OverrideTable::from_json_str(
            r#"{
                "leaf1.jpg": {"disease_name": "Healthy", "confidence": 0.99},
                "leaf2.png": {"disease_name": "Early Blight", "confidence": 0.87}
            }"#,
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get("leaf1.jpg"),
            Some(&OverrideRecord {
                disease_name: "Healthy".into(),
                confidence: 0.99,
            })
        );
        assert!(table.get("leaf3.jpg").is_none());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = OverrideTable::from_json_str(r#"{"leaf1.jpg": {"disease_name": 3}}"#)
            .unwrap_err();
        assert!(matches!(err, OverrideError::Parse(_)));
    }

    #[test]
    fn missing_file_is_empty_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let table = OverrideTable::load(dir.path().join("custom_results.json")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom_results.json");
        std::fs::write(
            &path,
            r#"{"leaf1.jpg": {"disease_name": "Healthy", "confidence": 0.99}}"#,
        )
        .unwrap();

        let table = OverrideTable::load(&path).unwrap();
        assert_eq!(table.get("leaf1.jpg").unwrap().disease_name, "Healthy");
    }
}
