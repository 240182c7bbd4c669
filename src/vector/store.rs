//! SQLite-backed vector store plus the in-memory double used by tests.
//!
//! Documents live in one flat table under key `{prefix}{ndc}`. The embedding
//! column holds the quantized encoding; the f32 wire payload is re-encoded on
//! upsert and dequantized on read. All rusqlite work runs on the blocking
//! pool.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use super::quant::{cosine_similarity, dequantize, quantize};
use super::{Hit, IndexSchema, Projection, QuerySpec, VectorStore, VectorStoreError};
use crate::model::{DrugDocument, EMBEDDING_DIM};
use crate::util::backoff::{with_retries, RetryPolicy};

const DOC_COLUMNS: &str = "ndc, drug_name, brand_name, generic_name, gcn_seqno, drug_class, \
     therapeutic_class, dosage_form, strength_value, strength_unit, manufacturer, \
     is_brand, is_generic, dea_schedule, indication_key, embedding, indexed_at";

pub struct SqliteVectorStore {
    db_path: PathBuf,
    retry: RetryPolicy,
}

impl SqliteVectorStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            retry: RetryPolicy::default(),
        }
    }

    fn open_conn(db_path: &PathBuf) -> Result<Connection, VectorStoreError> {
        Connection::open(db_path).map_err(|e| VectorStoreError::Connection(e.to_string()))
    }

    fn create_index_sync(db_path: &PathBuf, schema: &IndexSchema) -> Result<(), VectorStoreError> {
        let conn = Self::open_conn(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS drug_documents (
                 doc_key           TEXT PRIMARY KEY,
                 ndc               TEXT NOT NULL UNIQUE,
                 drug_name         TEXT NOT NULL,
                 brand_name        TEXT NOT NULL DEFAULT '',
                 generic_name      TEXT NOT NULL DEFAULT '',
                 gcn_seqno         INTEGER NOT NULL DEFAULT 0,
                 drug_class        TEXT NOT NULL DEFAULT '',
                 therapeutic_class TEXT NOT NULL DEFAULT '',
                 dosage_form       TEXT NOT NULL DEFAULT 'OTHER',
                 strength_value    REAL NOT NULL DEFAULT 0,
                 strength_unit     TEXT NOT NULL DEFAULT '',
                 manufacturer      TEXT NOT NULL DEFAULT '',
                 is_brand          INTEGER NOT NULL DEFAULT 0,
                 is_generic        INTEGER NOT NULL DEFAULT 1,
                 dea_schedule      TEXT NOT NULL DEFAULT '',
                 indication_key    TEXT NOT NULL DEFAULT '',
                 embedding         BLOB NOT NULL,
                 indexed_at        TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_docs_drug_class ON drug_documents (drug_class);
             CREATE INDEX IF NOT EXISTS idx_docs_thera_class ON drug_documents (therapeutic_class);
             CREATE INDEX IF NOT EXISTS idx_docs_gcn ON drug_documents (gcn_seqno);
             CREATE INDEX IF NOT EXISTS idx_docs_dosage_form ON drug_documents (dosage_form);
             CREATE TABLE IF NOT EXISTS index_meta (
                 id     INTEGER PRIMARY KEY CHECK (id = 1),
                 schema TEXT NOT NULL
             );",
        )
        .map_err(|e| VectorStoreError::Storage(e.to_string()))?;

        let requested = serde_json::to_string(schema)
            .map_err(|e| VectorStoreError::Storage(e.to_string()))?;
        let stored: Option<String> = conn
            .query_row("SELECT schema FROM index_meta WHERE id = 1", [], |r| {
                r.get(0)
            })
            .optional()
            .map_err(|e| VectorStoreError::Storage(e.to_string()))?;

        match stored {
            None => {
                conn.execute(
                    "INSERT INTO index_meta (id, schema) VALUES (1, ?1)",
                    [&requested],
                )
                .map_err(|e| VectorStoreError::Storage(e.to_string()))?;
                tracing::info!(schema = %requested, "vector index created");
                Ok(())
            }
            Some(existing) if existing == requested => Ok(()),
            Some(existing) => Err(VectorStoreError::SchemaMismatch {
                stored: existing,
                requested,
            }),
        }
    }

    fn upsert_sync(db_path: &PathBuf, doc: &DrugDocument) -> Result<(), VectorStoreError> {
        if doc.embedding.len() != EMBEDDING_DIM {
            return Err(VectorStoreError::BadEmbedding(doc.ndc.clone()));
        }
        let conn = Self::open_conn(db_path)?;
        conn.execute(
            "INSERT OR REPLACE INTO drug_documents (
                 doc_key, ndc, drug_name, brand_name, generic_name, gcn_seqno, drug_class,
                 therapeutic_class, dosage_form, strength_value, strength_unit, manufacturer,
                 is_brand, is_generic, dea_schedule, indication_key, embedding, indexed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            rusqlite::params![
                format!("drug:{}", doc.ndc),
                doc.ndc,
                doc.drug_name,
                doc.brand_name,
                doc.generic_name,
                doc.gcn_seqno,
                doc.drug_class,
                doc.therapeutic_class,
                doc.dosage_form.as_str(),
                doc.strength_value,
                doc.strength_unit.as_str(),
                doc.manufacturer,
                doc.is_brand as i64,
                doc.is_generic as i64,
                doc.dea_schedule.as_str(),
                doc.indication_key,
                quantize(&doc.embedding),
                doc.indexed_at.to_rfc3339(),
            ],
        )
        .map_err(|e| VectorStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    fn query_sync(db_path: &PathBuf, spec: &QuerySpec) -> Result<Vec<Hit>, VectorStoreError> {
        let conn = Self::open_conn(db_path)?;
        let (where_clause, params) = spec.filter.to_sql();

        match &spec.vector {
            Some(query_vector) => {
                // Exact scan over the filtered candidate set; the beam-width
                // hint only matters to graph-traversal backends.
                if let Some(ef) = spec.ef_runtime {
                    tracing::trace!(ef_runtime = ef, "beam width accepted (exact scan)");
                }
                let sql = format!(
                    "SELECT {DOC_COLUMNS} FROM drug_documents WHERE {where_clause}"
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| VectorStoreError::Storage(e.to_string()))?;
                let rows = stmt
                    .query_map(params_from_iter(params), |row| {
                        row_to_doc(row, Projection::Full)
                    })
                    .map_err(|e| VectorStoreError::Storage(e.to_string()))?;

                let mut scored: Vec<Hit> = Vec::new();
                for row in rows {
                    let mut doc =
                        row.map_err(|e| VectorStoreError::Storage(e.to_string()))?;
                    let score = cosine_similarity(query_vector, &doc.embedding).clamp(0.0, 1.0);
                    if spec.projection == Projection::Core {
                        doc.embedding = Vec::new();
                    }
                    scored.push(Hit { score, doc });
                }
                scored.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.doc.ndc.cmp(&b.doc.ndc))
                });
                scored.truncate(spec.k);
                Ok(scored)
            }
            None => {
                let sql = format!(
                    "SELECT {DOC_COLUMNS} FROM drug_documents WHERE {where_clause} \
                     ORDER BY ndc LIMIT ?"
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| VectorStoreError::Storage(e.to_string()))?;
                let mut all_params = params;
                all_params.push(rusqlite::types::Value::Integer(spec.k as i64));
                let rows = stmt
                    .query_map(params_from_iter(all_params), |row| {
                        row_to_doc(row, spec.projection)
                    })
                    .map_err(|e| VectorStoreError::Storage(e.to_string()))?;

                let mut hits = Vec::new();
                for row in rows {
                    let doc = row.map_err(|e| VectorStoreError::Storage(e.to_string()))?;
                    hits.push(Hit { score: 0.0, doc });
                }
                Ok(hits)
            }
        }
    }

    fn fetch_sync(db_path: &PathBuf, ndc: &str) -> Result<Option<DrugDocument>, VectorStoreError> {
        let conn = Self::open_conn(db_path)?;
        let sql = format!("SELECT {DOC_COLUMNS} FROM drug_documents WHERE ndc = ?1");
        conn.query_row(&sql, [ndc], |row| row_to_doc(row, Projection::Full))
            .optional()
            .map_err(|e| VectorStoreError::Storage(e.to_string()))
    }

    fn count_sync(db_path: &PathBuf) -> Result<usize, VectorStoreError> {
        let conn = Self::open_conn(db_path)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM drug_documents", [], |r| r.get(0))
            .map_err(|e| VectorStoreError::Storage(e.to_string()))?;
        Ok(count as usize)
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, VectorStoreError>
    where
        T: Send + 'static,
        F: Fn(&PathBuf) -> Result<T, VectorStoreError> + Send + Sync + Clone + 'static,
    {
        with_retries(self.retry, || {
            let db_path = self.db_path.clone();
            let op = op.clone();
            async move {
                tokio::task::spawn_blocking(move || op(&db_path))
                    .await
                    .map_err(|e| VectorStoreError::Storage(e.to_string()))?
            }
        })
        .await
    }
}

fn row_to_doc(row: &rusqlite::Row<'_>, projection: Projection) -> rusqlite::Result<DrugDocument> {
    let dosage_form: String = row.get(7)?;
    let strength_unit: String = row.get(9)?;
    let dea_schedule: String = row.get(13)?;
    let embedding_blob: Vec<u8> = row.get(15)?;
    let indexed_at: String = row.get(16)?;

    let embedding = match projection {
        Projection::Full => dequantize(&embedding_blob, EMBEDDING_DIM),
        Projection::Core => Vec::new(),
    };

    Ok(DrugDocument {
        ndc: row.get(0)?,
        drug_name: row.get(1)?,
        brand_name: row.get(2)?,
        generic_name: row.get(3)?,
        gcn_seqno: row.get(4)?,
        drug_class: row.get(5)?,
        therapeutic_class: row.get(6)?,
        dosage_form: dosage_form.parse().unwrap_or(crate::model::DosageForm::Other),
        strength_value: row.get(8)?,
        strength_unit: strength_unit
            .parse()
            .unwrap_or(crate::model::StrengthUnit::None),
        manufacturer: row.get(10)?,
        is_brand: row.get::<_, i64>(11)? != 0,
        is_generic: row.get::<_, i64>(12)? != 0,
        dea_schedule: dea_schedule
            .parse()
            .unwrap_or(crate::model::DeaSchedule::None),
        indication_key: row.get(14)?,
        embedding,
        indexed_at: DateTime::parse_from_rfc3339(&indexed_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn create_index(&self, schema: &IndexSchema) -> Result<(), VectorStoreError> {
        let schema = schema.clone();
        self.run_blocking(move |path| Self::create_index_sync(path, &schema))
            .await
    }

    async fn upsert(&self, doc: &DrugDocument) -> Result<(), VectorStoreError> {
        let doc = doc.clone();
        self.run_blocking(move |path| Self::upsert_sync(path, &doc))
            .await
    }

    async fn hybrid_query(&self, spec: &QuerySpec) -> Result<Vec<Hit>, VectorStoreError> {
        let spec = spec.clone();
        self.run_blocking(move |path| Self::query_sync(path, &spec))
            .await
    }

    async fn fetch(&self, ndc: &str) -> Result<Option<DrugDocument>, VectorStoreError> {
        let ndc = ndc.to_string();
        self.run_blocking(move |path| Self::fetch_sync(path, &ndc))
            .await
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        self.run_blocking(Self::count_sync).await
    }
}

/// In-memory store for tests. Same semantics, raw f32 vectors.
pub struct InMemoryVectorStore {
    docs: Mutex<std::collections::BTreeMap<String, DrugDocument>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(std::collections::BTreeMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_index(&self, _schema: &IndexSchema) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn upsert(&self, doc: &DrugDocument) -> Result<(), VectorStoreError> {
        if doc.embedding.len() != EMBEDDING_DIM {
            return Err(VectorStoreError::BadEmbedding(doc.ndc.clone()));
        }
        self.docs
            .lock()
            .unwrap()
            .insert(doc.ndc.clone(), doc.clone());
        Ok(())
    }

    async fn hybrid_query(&self, spec: &QuerySpec) -> Result<Vec<Hit>, VectorStoreError> {
        let docs = self.docs.lock().unwrap();
        let matching = docs.values().filter(|d| spec.filter.matches(d));

        let mut hits: Vec<Hit> = match &spec.vector {
            Some(query_vector) => {
                let mut scored: Vec<Hit> = matching
                    .map(|doc| Hit {
                        score: cosine_similarity(query_vector, &doc.embedding).clamp(0.0, 1.0),
                        doc: doc.clone(),
                    })
                    .collect();
                scored.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.doc.ndc.cmp(&b.doc.ndc))
                });
                scored
            }
            None => matching
                .map(|doc| Hit {
                    score: 0.0,
                    doc: doc.clone(),
                })
                .collect(),
        };

        hits.truncate(spec.k);
        if spec.projection == Projection::Core {
            for hit in &mut hits {
                hit.doc.embedding = Vec::new();
            }
        }
        Ok(hits)
    }

    async fn fetch(&self, ndc: &str) -> Result<Option<DrugDocument>, VectorStoreError> {
        Ok(self.docs.lock().unwrap().get(ndc).cloned())
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self.docs.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::deterministic_vector;
    use crate::model::{DeaSchedule, DosageForm, StrengthUnit};
    use crate::vector::{FilterExpr, NumField, Predicate, TagField};

    pub(crate) fn make_doc(ndc: &str, name: &str, class: &str, form: DosageForm) -> DrugDocument {
        DrugDocument {
            ndc: ndc.into(),
            drug_name: name.to_uppercase(),
            brand_name: String::new(),
            generic_name: name.to_lowercase(),
            gcn_seqno: 1000,
            drug_class: class.into(),
            therapeutic_class: "Test Class".into(),
            dosage_form: form,
            strength_value: 10.0,
            strength_unit: StrengthUnit::Mg,
            manufacturer: "ACME".into(),
            is_brand: false,
            is_generic: true,
            dea_schedule: DeaSchedule::None,
            indication_key: format!("class:{class}"),
            embedding: deterministic_vector(name, EMBEDDING_DIM),
            indexed_at: Utc::now(),
        }
    }

    fn temp_store() -> (tempfile::TempDir, SqliteVectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::new(dir.path().join("vector.db"));
        (dir, store)
    }

    #[tokio::test]
    async fn create_index_is_idempotent() {
        let (_dir, store) = temp_store();
        let schema = IndexSchema::default();
        store.create_index(&schema).await.unwrap();
        store.create_index(&schema).await.unwrap();
    }

    #[tokio::test]
    async fn schema_mismatch_is_fatal() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();

        let changed = IndexSchema {
            hnsw_m: 16,
            ..IndexSchema::default()
        };
        let err = store.create_index(&changed).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn upsert_fetch_round_trip() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();

        let doc = make_doc("00000000001", "rosuvastatin calcium", "ROSUVASTATIN_CALCIUM", DosageForm::Tablet);
        store.upsert(&doc).await.unwrap();

        let fetched = store.fetch("00000000001").await.unwrap().unwrap();
        assert_eq!(fetched.ndc, doc.ndc);
        assert_eq!(fetched.drug_name, doc.drug_name);
        assert_eq!(fetched.dosage_form, DosageForm::Tablet);
        assert_eq!(fetched.embedding.len(), EMBEDDING_DIM);
        // Quantization round-trip keeps the vector close to the original.
        let sim = cosine_similarity(&doc.embedding, &fetched.embedding);
        assert!(sim > 0.999, "sim = {sim}");
    }

    #[tokio::test]
    async fn upsert_is_last_writer_wins() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();

        let mut doc = make_doc("00000000002", "metformin", "METFORMIN_HCL", DosageForm::Tablet);
        store.upsert(&doc).await.unwrap();
        doc.manufacturer = "OTHER PHARMA".into();
        store.upsert(&doc).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let fetched = store.fetch("00000000002").await.unwrap().unwrap();
        assert_eq!(fetched.manufacturer, "OTHER PHARMA");
    }

    #[tokio::test]
    async fn filters_apply_before_ranking() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();

        store
            .upsert(&make_doc("00000000010", "testosterone", "TESTOSTERONE", DosageForm::Cream))
            .await
            .unwrap();
        store
            .upsert(&make_doc("00000000011", "testosterone", "TESTOSTERONE", DosageForm::Gel))
            .await
            .unwrap();

        let spec = QuerySpec {
            filter: FilterExpr::new()
                .and(Predicate::TagEq(TagField::DosageForm, "CREAM".into())),
            vector: Some(deterministic_vector("testosterone", EMBEDDING_DIM)),
            k: 10,
            ..QuerySpec::default()
        };
        let hits = store.hybrid_query(&spec).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.dosage_form, DosageForm::Cream);
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn vector_mode_ranks_by_similarity() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();

        store
            .upsert(&make_doc("00000000020", "rosuvastatin", "ROSUVASTATIN", DosageForm::Tablet))
            .await
            .unwrap();
        store
            .upsert(&make_doc("00000000021", "lisinopril", "LISINOPRIL", DosageForm::Tablet))
            .await
            .unwrap();

        let spec = QuerySpec {
            filter: FilterExpr::new(),
            vector: Some(deterministic_vector("rosuvastatin", EMBEDDING_DIM)),
            k: 2,
            ..QuerySpec::default()
        };
        let hits = store.hybrid_query(&spec).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc.ndc, "00000000020");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn scan_mode_orders_by_ndc_with_limit() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();

        for i in 0..5 {
            store
                .upsert(&make_doc(
                    &format!("0000000003{i}"),
                    &format!("drug {i}"),
                    "SHARED_CLASS",
                    DosageForm::Tablet,
                ))
                .await
                .unwrap();
        }

        let spec = QuerySpec {
            filter: FilterExpr::new()
                .and(Predicate::TagEq(TagField::DrugClass, "SHARED_CLASS".into())),
            vector: None,
            k: 3,
            ..QuerySpec::default()
        };
        let hits = store.hybrid_query(&spec).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].doc.ndc, "00000000030");
        assert!(hits.iter().all(|h| h.score == 0.0));
    }

    #[tokio::test]
    async fn k_larger_than_result_count_is_fine() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();
        store
            .upsert(&make_doc("00000000040", "aspirin", "ASPIRIN", DosageForm::Tablet))
            .await
            .unwrap();

        let spec = QuerySpec {
            filter: FilterExpr::new(),
            vector: Some(deterministic_vector("aspirin", EMBEDDING_DIM)),
            k: 100,
            ..QuerySpec::default()
        };
        assert_eq!(store.hybrid_query(&spec).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn numeric_range_filters_strength() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();

        let mut low = make_doc("00000000050", "testosterone", "TESTOSTERONE", DosageForm::Vial);
        low.strength_value = 100.0;
        let mut high = make_doc("00000000051", "testosterone", "TESTOSTERONE", DosageForm::Vial);
        high.strength_value = 200.0;
        store.upsert(&low).await.unwrap();
        store.upsert(&high).await.unwrap();

        let spec = QuerySpec {
            filter: FilterExpr::new()
                .and(Predicate::NumRange(NumField::StrengthValue, 190.0, 210.0)),
            vector: None,
            k: 10,
            ..QuerySpec::default()
        };
        let hits = store.hybrid_query(&spec).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.ndc, "00000000051");
    }

    #[tokio::test]
    async fn text_prefilter_restricts_candidates() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();
        store
            .upsert(&make_doc("00000000060", "testosterone cypionate", "TESTOSTERONE", DosageForm::Vial))
            .await
            .unwrap();
        store
            .upsert(&make_doc("00000000061", "estradiol", "ESTRADIOL", DosageForm::Patch))
            .await
            .unwrap();

        let spec = QuerySpec {
            filter: FilterExpr::new().and(Predicate::Text("testosterone".into())),
            vector: Some(deterministic_vector("testosterone", EMBEDDING_DIM)),
            k: 10,
            ..QuerySpec::default()
        };
        let hits = store.hybrid_query(&spec).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.ndc, "00000000060");
    }

    #[tokio::test]
    async fn core_projection_omits_embedding() {
        let (_dir, store) = temp_store();
        store.create_index(&IndexSchema::default()).await.unwrap();
        store
            .upsert(&make_doc("00000000070", "aspirin", "ASPIRIN", DosageForm::Tablet))
            .await
            .unwrap();

        let spec = QuerySpec {
            filter: FilterExpr::new(),
            vector: Some(deterministic_vector("aspirin", EMBEDDING_DIM)),
            k: 1,
            projection: Projection::Core,
            ..QuerySpec::default()
        };
        let hits = store.hybrid_query(&spec).await.unwrap();
        assert!(hits[0].doc.embedding.is_empty());
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn in_memory_double_matches_sqlite_semantics() {
        let store = InMemoryVectorStore::new();
        store.create_index(&IndexSchema::default()).await.unwrap();
        store
            .upsert(&make_doc("00000000080", "rosuvastatin", "ROSUVASTATIN", DosageForm::Tablet))
            .await
            .unwrap();
        store
            .upsert(&make_doc("00000000081", "atorvastatin", "ATORVASTATIN", DosageForm::Tablet))
            .await
            .unwrap();

        let spec = QuerySpec {
            filter: FilterExpr::new(),
            vector: Some(deterministic_vector("rosuvastatin", EMBEDDING_DIM)),
            k: 1,
            ..QuerySpec::default()
        };
        let hits = store.hybrid_query(&spec).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.ndc, "00000000080");
    }
}
