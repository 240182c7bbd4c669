//! Catalog ingestion: paged relational scan, embed, upsert. Resumable by
//! offset; per-row failures dead-letter instead of aborting the batch.

pub mod checkpoint;
pub mod normalize;
pub mod pipeline;

pub use checkpoint::Checkpoint;
pub use pipeline::{BatchMetrics, IngestParams, IngestPipeline, IngestReport};

use crate::catalog::CatalogError;
use crate::vector::VectorStoreError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error("indication store: {0}")]
    Indications(String),
    #[error("checkpoint: {0}")]
    Checkpoint(String),
}
