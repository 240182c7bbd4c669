//! `POST /search`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tokio_util::sync::CancellationToken;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SearchRequest, SearchResponse};
use crate::search::orchestrator::MAX_LIMIT;
use crate::search::SearchOptions;

pub async fn search(
    State(ctx): State<ApiContext>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let query = request.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    if let Some(limit) = request.limit {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
    }

    let mut options = SearchOptions::default();
    if let Some(limit) = request.limit {
        options.limit = limit;
    }
    if let Some(request_options) = &request.options {
        options.ef_runtime = request_options.ef_runtime;
        options.multi_drug_threshold = request_options.multi_drug_threshold;
    }

    // Dropping the token on timeout cancels in-flight pipeline work.
    let cancel = CancellationToken::new();
    let outcome = match tokio::time::timeout(
        ctx.request_timeout,
        ctx.orchestrator.search(query, &options, &cancel),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            cancel.cancel();
            return Err(ApiError::UpstreamUnavailable("request timed out".into()));
        }
    };

    Ok(Json(SearchResponse {
        success: true,
        results: outcome.results,
        metadata: outcome.metadata,
    }))
}
