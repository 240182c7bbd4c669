//! Request/response DTOs and the shared handler context.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::indication::IndicationStore;
use crate::model::{DrugDocument, SearchResult};
use crate::search::{SearchMetadata, SearchOrchestrator};
use crate::vector::VectorStore;

/// Shared state for all endpoint handlers.
#[derive(Clone)]
pub struct ApiContext {
    pub orchestrator: Arc<SearchOrchestrator>,
    pub store: Arc<dyn VectorStore>,
    pub indications: IndicationStore,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
    #[serde(default)]
    pub options: Option<SearchRequestOptions>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchRequestOptions {
    pub ef_runtime: Option<usize>,
    pub multi_drug_threshold: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchResult>,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Serialize)]
pub struct DrugDetailResponse {
    #[serde(flatten)]
    pub document: DrugDocument,
    pub indications: Vec<String>,
    /// Same-GCN documents, excluding this one.
    pub alternatives_count: usize,
}

#[derive(Debug, Serialize)]
pub struct AlternativesResponse {
    pub generic: Vec<DrugDocument>,
    pub brand: Vec<DrugDocument>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub documents: usize,
}
