//! Indication store: deduplicated secondary storage of per-class indication
//! lists.
//!
//! Thousands of documents share one record, keyed `brand:{NAME}` or
//! `class:{DRUG_CLASS}`. An upsert replaces the stored list wholesale; reads
//! are by single key or small batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::util::backoff::Transient;

#[derive(Debug, thiserror::Error)]
pub enum IndicationError {
    #[error("cannot open indication store: {0}")]
    Connection(String),
    #[error("indication store: {0}")]
    Storage(String),
}

impl Transient for IndicationError {
    fn is_transient(&self) -> bool {
        matches!(self, IndicationError::Connection(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicationRecord {
    pub key: String,
    pub indications: Vec<String>,
}

#[derive(Clone)]
pub struct IndicationStore {
    db_path: PathBuf,
}

impl IndicationStore {
    pub fn open(db_path: &Path) -> Result<Self, IndicationError> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        let conn = store.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS indications (
                 key         TEXT PRIMARY KEY,
                 indications TEXT NOT NULL
             );",
        )
        .map_err(|e| IndicationError::Storage(e.to_string()))?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection, IndicationError> {
        Connection::open(&self.db_path).map_err(|e| IndicationError::Connection(e.to_string()))
    }

    /// Replace the list stored under `key` wholesale.
    pub fn upsert(&self, key: &str, indications: &[String]) -> Result<(), IndicationError> {
        let body = serde_json::to_string(&serde_json::json!({ "indications": indications }))
            .map_err(|e| IndicationError::Storage(e.to_string()))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO indications (key, indications) VALUES (?1, ?2)",
            params![format!("indication:{key}"), body],
        )
        .map_err(|e| IndicationError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<String>>, IndicationError> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT indications FROM indications WHERE key = ?1",
                params![format!("indication:{key}")],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| IndicationError::Storage(e.to_string()))?;
        Ok(body.and_then(|b| parse_body(&b)))
    }

    /// Batch read. Missing keys are simply absent from the map.
    pub fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<String>>, IndicationError> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(list) = self.get(key)? {
                out.insert(key.clone(), list);
            }
        }
        Ok(out)
    }

    /// Whether `key` already has a record (used by ingest to skip lookups).
    pub fn contains(&self, key: &str) -> Result<bool, IndicationError> {
        Ok(self.get(key)?.is_some())
    }

    pub fn len(&self) -> Result<usize, IndicationError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM indications", [], |r| r.get(0))
            .map_err(|e| IndicationError::Storage(e.to_string()))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, IndicationError> {
        Ok(self.len()? == 0)
    }
}

fn parse_body(body: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["indications"].as_array().map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, IndicationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IndicationStore::open(&dir.path().join("indications.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn upsert_get_round_trip() {
        let (_dir, store) = temp_store();
        let list = vec!["High cholesterol".to_string(), "Hyperlipidemia".to_string()];
        store.upsert("brand:CRESTOR", &list).unwrap();
        assert_eq!(store.get("brand:CRESTOR").unwrap().unwrap(), list);
    }

    #[test]
    fn upsert_replaces_wholesale() {
        let (_dir, store) = temp_store();
        store
            .upsert("class:ROSUVASTATIN_CALCIUM", &["Old".to_string()])
            .unwrap();
        store
            .upsert("class:ROSUVASTATIN_CALCIUM", &["New".to_string()])
            .unwrap();
        assert_eq!(
            store.get("class:ROSUVASTATIN_CALCIUM").unwrap().unwrap(),
            vec!["New"]
        );
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn missing_key_is_none() {
        let (_dir, store) = temp_store();
        assert!(store.get("brand:NOPE").unwrap().is_none());
        assert!(!store.contains("brand:NOPE").unwrap());
    }

    #[test]
    fn get_many_skips_missing() {
        let (_dir, store) = temp_store();
        store.upsert("brand:A", &["x".to_string()]).unwrap();
        let map = store
            .get_many(&["brand:A".to_string(), "brand:B".to_string()])
            .unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("brand:A"));
    }
}
