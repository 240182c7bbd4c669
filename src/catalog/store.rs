//! Pooled SQL access to the denormalized FDB tables.
//!
//! Two tables are read:
//!
//! - `fdb_ndc` — one row per NDC: `ndc`, `label_name`, `brand_name`,
//!   `generic_name`, `gcn_seqno`, `innov`, `obsolete_date`, `labeler_id`,
//!   `manufacturer`, `dosage_form`, `strength`, `dea_class`, `drug_class`,
//!   `therapeutic_class`.
//! - `fdb_class_indication` — `(class_key, indication, seq)` rows holding
//!   per-class indication lists, read only during ingest.
//!
//! The gateway never writes and never holds a connection across other I/O;
//! each method acquires from the pool, runs one statement, and releases.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, SqlitePool};

use super::CatalogError;

/// SQLite caps host parameters; IN lists are chunked below it.
const MAX_IN_PARAMS: usize = 500;

const SCAN_COLUMNS: &str = "ndc, label_name, brand_name, generic_name, gcn_seqno, innov, \
     labeler_id, manufacturer, dosage_form, strength, dea_class, drug_class, therapeutic_class";

/// Raw catalog row as scanned for ingestion.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogRow {
    pub ndc: String,
    pub label_name: String,
    pub brand_name: Option<String>,
    pub generic_name: Option<String>,
    pub gcn_seqno: Option<i64>,
    pub innov: Option<String>,
    pub labeler_id: Option<String>,
    pub manufacturer: Option<String>,
    pub dosage_form: Option<String>,
    pub strength: Option<String>,
    pub dea_class: Option<String>,
    pub drug_class: Option<String>,
    pub therapeutic_class: Option<String>,
}

/// Catalog-truth fields attached to results at enrichment time.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EnrichedRow {
    pub ndc: String,
    pub label_name: String,
    pub manufacturer: String,
    pub gcn_seqno: i64,
}

#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Connect a small pool to the catalog database.
    pub async fn connect(
        path: &str,
        max_connections: u32,
        idle_timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(idle_timeout)
            .connect_with(options)
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stream one page of candidate rows, ordered by NDC. Active means no
    /// obsolescence date and a trimmed name of at least 4 characters.
    pub async fn scan_active(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<CatalogRow>, CatalogError> {
        let sql = format!(
            "SELECT {SCAN_COLUMNS} FROM fdb_ndc \
             WHERE (obsolete_date IS NULL OR obsolete_date = '') \
               AND length(trim(label_name)) >= 4 \
             ORDER BY ndc LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query_as::<_, CatalogRow>(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Batched enrichment lookup. One `IN` query per chunk of NDCs, never a
    /// per-item fan-out.
    pub async fn enrich_by_ndc(
        &self,
        ndcs: &[String],
    ) -> Result<HashMap<String, EnrichedRow>, CatalogError> {
        let mut out = HashMap::with_capacity(ndcs.len());
        for chunk in ndcs.chunks(MAX_IN_PARAMS) {
            if chunk.is_empty() {
                continue;
            }
            let mut builder = QueryBuilder::new(
                "SELECT ndc, label_name, manufacturer, gcn_seqno FROM fdb_ndc WHERE ndc IN (",
            );
            let mut separated = builder.separated(", ");
            for ndc in chunk {
                separated.push_bind(ndc);
            }
            separated.push_unseparated(")");

            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in rows {
                let enriched = EnrichedRow {
                    ndc: row.try_get("ndc").map_err(CatalogError::from)?,
                    label_name: row
                        .try_get::<Option<String>, _>("label_name")
                        .map_err(CatalogError::from)?
                        .unwrap_or_default(),
                    manufacturer: row
                        .try_get::<Option<String>, _>("manufacturer")
                        .map_err(CatalogError::from)?
                        .unwrap_or_default(),
                    gcn_seqno: row
                        .try_get::<Option<i64>, _>("gcn_seqno")
                        .map_err(CatalogError::from)?
                        .unwrap_or(0),
                };
                out.insert(enriched.ndc.clone(), enriched);
            }
        }
        Ok(out)
    }

    /// Per-class indication lists, ingest only. Order within a class follows
    /// the catalog's `seq`; duplicates are dropped.
    pub async fn lookup_indications_by_class(
        &self,
        class_keys: &[String],
    ) -> Result<HashMap<String, Vec<String>>, CatalogError> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in class_keys.chunks(MAX_IN_PARAMS) {
            if chunk.is_empty() {
                continue;
            }
            let mut builder = QueryBuilder::new(
                "SELECT class_key, indication FROM fdb_class_indication WHERE class_key IN (",
            );
            let mut separated = builder.separated(", ");
            for key in chunk {
                separated.push_bind(key);
            }
            separated.push_unseparated(") ORDER BY class_key, seq");

            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in rows {
                let key: String = row.try_get("class_key").map_err(CatalogError::from)?;
                let indication: String = row.try_get("indication").map_err(CatalogError::from)?;
                let list = out.entry(key).or_default();
                if !list.contains(&indication) {
                    list.push(indication);
                }
            }
        }
        Ok(out)
    }
}
