//! Router assembly: routes, CORS, request tracing.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Build the full API router. CORS is open to any origin; every request is
/// logged with a correlation id.
pub fn api_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/search", post(endpoints::search::search))
        .route("/drugs/:ndc", get(endpoints::drugs::detail))
        .route("/drugs/:ndc/alternatives", get(endpoints::drugs::alternatives))
        .route("/health", get(endpoints::health::check))
        .with_state(ctx)
        .layer(axum::middleware::from_fn(trace_requests))
        .layer(CorsLayer::permissive())
}

async fn trace_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let correlation_id = uuid::Uuid::new_v4();
    let start = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        %correlation_id,
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}
