//! `GET /drugs/{ndc}` and `GET /drugs/{ndc}/alternatives`.

use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{AlternativesResponse, ApiContext, DrugDetailResponse};
use crate::model::DrugDocument;
use crate::vector::{FilterExpr, NumField, Predicate, QuerySpec};

/// Cap on the same-GCN scan; far above any real therapeutic group.
const ALTERNATIVES_SCAN_LIMIT: usize = 1000;

pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(ndc): Path<String>,
) -> Result<Json<DrugDetailResponse>, ApiError> {
    let document = fetch_document(&ctx, &ndc).await?;

    let alternatives_count = if document.gcn_seqno != 0 {
        same_gcn_documents(&ctx, document.gcn_seqno)
            .await?
            .iter()
            .filter(|d| d.ndc != document.ndc)
            .count()
    } else {
        0
    };

    let indications = lookup_indications(&ctx, &document.indication_key).await?;

    Ok(Json(DrugDetailResponse {
        document,
        indications,
        alternatives_count,
    }))
}

pub async fn alternatives(
    State(ctx): State<ApiContext>,
    Path(ndc): Path<String>,
) -> Result<Json<AlternativesResponse>, ApiError> {
    let document = fetch_document(&ctx, &ndc).await?;

    let mut generic = Vec::new();
    let mut brand = Vec::new();
    if document.gcn_seqno != 0 {
        for alternative in same_gcn_documents(&ctx, document.gcn_seqno).await? {
            if alternative.ndc == document.ndc {
                continue;
            }
            if alternative.is_generic {
                generic.push(alternative);
            } else {
                brand.push(alternative);
            }
        }
    }

    Ok(Json(AlternativesResponse { generic, brand }))
}

async fn fetch_document(ctx: &ApiContext, ndc: &str) -> Result<DrugDocument, ApiError> {
    if !DrugDocument::is_valid_ndc(ndc) {
        return Err(ApiError::BadRequest(format!(
            "'{ndc}' is not an 11-digit NDC"
        )));
    }
    let mut document = ctx
        .store
        .fetch(ndc)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no drug with NDC {ndc}")))?;
    document.embedding = Vec::new();
    Ok(document)
}

async fn same_gcn_documents(
    ctx: &ApiContext,
    gcn_seqno: i64,
) -> Result<Vec<DrugDocument>, ApiError> {
    let spec = QuerySpec {
        filter: FilterExpr::new().and(Predicate::NumEq(NumField::GcnSeqno, gcn_seqno as f64)),
        vector: None,
        k: ALTERNATIVES_SCAN_LIMIT,
        ..QuerySpec::default()
    };
    let hits = ctx.store.hybrid_query(&spec).await?;
    Ok(hits.into_iter().map(|h| h.doc).collect())
}

async fn lookup_indications(ctx: &ApiContext, key: &str) -> Result<Vec<String>, ApiError> {
    if key.is_empty() {
        return Ok(Vec::new());
    }
    let store = ctx.indications.clone();
    let key = key.to_string();
    tokio::task::spawn_blocking(move || store.get(&key))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))
        .map(|list| list.unwrap_or_default())
}
