//! Core domain types shared across the search, ingest, and API layers.

pub mod document;
pub mod query;
pub mod result;

pub use document::{DeaSchedule, DosageForm, DrugDocument, StrengthUnit, EMBEDDING_DIM};
pub use query::{ParsedQuery, QueryFilters, StrengthFilter};
pub use result::{MatchType, SearchResult, Variant};

/// Raised when a closed-vocabulary field receives a value outside it.
#[derive(Debug, thiserror::Error)]
#[error("invalid {field} value: '{value}'")]
pub struct InvalidEnum {
    pub field: String,
    pub value: String,
}
