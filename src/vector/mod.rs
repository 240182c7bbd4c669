//! Vector store gateway: index create, document upsert, hybrid query, fetch.
//!
//! The shipped backend keeps documents in SQLite with embeddings re-encoded
//! by the `leanvec4x8` quantizer. Hybrid queries are filter-then-KNN: the
//! typed filter expression is compiled to SQL and applied before any
//! similarity work, then survivors are ranked by cosine against the
//! dequantized vectors.

pub mod filter;
pub mod quant;
pub mod store;

pub use filter::{FilterExpr, NumField, Predicate, TagField};
pub use store::{InMemoryVectorStore, SqliteVectorStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{DrugDocument, EMBEDDING_DIM};
use crate::util::backoff::Transient;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("cannot open vector store: {0}")]
    Connection(String),
    #[error("index schema mismatch: stored {stored}, requested {requested}")]
    SchemaMismatch { stored: String, requested: String },
    #[error("vector store: {0}")]
    Storage(String),
    #[error("document {0} has no {EMBEDDING_DIM}-dim embedding")]
    BadEmbedding(String),
}

impl Transient for VectorStoreError {
    fn is_transient(&self) -> bool {
        matches!(self, VectorStoreError::Connection(_))
    }
}

/// Index definition stored alongside the documents. `create_index` is
/// idempotent for an equal schema; a differing stored schema is fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Key prefix for stored documents.
    pub prefix: String,
    pub dim: usize,
    pub hnsw_m: usize,
    pub ef_construction: usize,
    pub ef_runtime: usize,
    pub quantization: String,
}

impl Default for IndexSchema {
    fn default() -> Self {
        Self {
            prefix: "drug:".into(),
            dim: EMBEDDING_DIM,
            hnsw_m: 40,
            ef_construction: 200,
            ef_runtime: 10,
            quantization: quant::QUANT_SCHEME.into(),
        }
    }
}

/// Which stored fields a query materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Everything except the embedding (the common case).
    #[default]
    Core,
    /// Include the dequantized embedding.
    Full,
}

/// One hybrid query.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// Conjunction of tag/numeric predicates plus optional lexical prefilter.
    pub filter: FilterExpr,
    /// Query vector; absent degrades to a filtered scan.
    pub vector: Option<Vec<f32>>,
    /// Top-k cut in vector mode, scan limit otherwise.
    pub k: usize,
    /// Beam-width override, forwarded to the index.
    pub ef_runtime: Option<usize>,
    pub projection: Projection,
}

/// A scored query hit. `score` is `1 - cosine distance` in vector mode and
/// 0.0 for filtered scans.
#[derive(Debug, Clone)]
pub struct Hit {
    pub score: f32,
    pub doc: DrugDocument,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_index(&self, schema: &IndexSchema) -> Result<(), VectorStoreError>;

    /// Last-writer-wins upsert under key `{prefix}{ndc}`.
    async fn upsert(&self, doc: &DrugDocument) -> Result<(), VectorStoreError>;

    async fn hybrid_query(&self, spec: &QuerySpec) -> Result<Vec<Hit>, VectorStoreError>;

    async fn fetch(&self, ndc: &str) -> Result<Option<DrugDocument>, VectorStoreError>;

    async fn count(&self) -> Result<usize, VectorStoreError>;
}
