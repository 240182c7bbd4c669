//! On-disk ingestion checkpoint for resume across process restarts.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::IngestError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub offset: u64,
    pub last_completed_at: DateTime<Utc>,
    pub dead_letter: Vec<String>,
}

impl Checkpoint {
    pub fn new(offset: u64, dead_letter: Vec<String>) -> Self {
        Self {
            offset,
            last_completed_at: Utc::now(),
            dead_letter,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| IngestError::Checkpoint(e.to_string()))?;
        std::fs::write(path, body).map_err(|e| IngestError::Checkpoint(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Option<Self>, IngestError> {
        if !path.exists() {
            return Ok(None);
        }
        let body =
            std::fs::read_to_string(path).map_err(|e| IngestError::Checkpoint(e.to_string()))?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| IngestError::Checkpoint(e.to_string()))
    }
}
