//! Read-only gateway over the relational FDB drug catalog.

pub mod store;

pub use store::{CatalogRow, CatalogStore, EnrichedRow};

use crate::util::backoff::Transient;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot reach catalog database: {0}")]
    Connection(String),
    #[error("catalog query failed: {0}")]
    Query(String),
}

impl Transient for CatalogError {
    fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Connection(_))
    }
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                CatalogError::Connection(err.to_string())
            }
            other => CatalogError::Query(other.to_string()),
        }
    }
}
