//! `GET /health` — liveness plus vector store reachability.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, HealthResponse};

pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let documents = ctx.store.count().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        documents,
    }))
}
