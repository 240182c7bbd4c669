//! Search orchestration: routing, vector fan-out, class expansion,
//! classification, grouping, ordering, enrichment.

pub mod expansion;
pub mod grouping;
pub mod orchestrator;

pub use grouping::Candidate;
pub use orchestrator::{SearchOptions, SearchOrchestrator};

use std::collections::BTreeMap;

use serde::Serialize;

use crate::embedding::EmbeddingError;
use crate::model::{ParsedQuery, SearchResult};
use crate::vector::VectorStoreError;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0} timed out")]
    PhaseTimeout(&'static str),
    #[error("enrichment failed: {0}")]
    Enrichment(String),
}

impl SearchError {
    /// Whether the failure came from an unavailable upstream (maps to 503).
    pub fn is_upstream(&self) -> bool {
        match self {
            SearchError::Embedding(e) => !matches!(
                e,
                EmbeddingError::EmptyInput | EmbeddingError::InputTooLong(_)
            ),
            SearchError::VectorStore(_) | SearchError::PhaseTimeout(_) => true,
            SearchError::Cancelled | SearchError::Enrichment(_) => false,
        }
    }
}

/// Per-phase request states, in order. Used for latency keys and tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parsing,
    Embedding,
    VectorSearch,
    Expansion,
    Filtering,
    Grouping,
    Enrichment,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Parsing => "parsing",
            Phase::Embedding => "embedding",
            Phase::VectorSearch => "vector_search",
            Phase::Expansion => "expansion",
            Phase::Filtering => "filtering",
            Phase::Grouping => "grouping",
            Phase::Enrichment => "enrichment",
        }
    }
}

/// Result counts surfaced in response metadata.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Counts {
    pub vector: usize,
    pub pharmacological: usize,
    pub therapeutic: usize,
    pub families: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMetadata {
    pub parsed: ParsedQuery,
    /// `"llm"` or `"fallback"`.
    pub parser: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped_filters: Vec<String>,
    pub counts: Counts,
    pub latency_ms: BTreeMap<&'static str, u64>,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub metadata: SearchMetadata,
}
