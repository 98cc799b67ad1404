//! # API Handlers
//!
//! Axum handlers for search, query conversion, and health.

use crate::auth::Principal;
use crate::search::{PipelineError, SearchError};
use crate::AppState;
use axum::{
    extract::{rejection::QueryRejection, ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use hq_core::{AuditRecord, HostDocument, PageParams};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::Instrument;

// =============================================================================
// Request / Response Shapes
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub total: usize,
    pub results: Vec<HostDocument>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_)
            | PipelineError::Conversion(_)
            | PipelineError::Pagination(_)
            | PipelineError::PageParams(_) => StatusCode::BAD_REQUEST,
            PipelineError::Search(SearchError::BackendUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PipelineError::Search(SearchError::BackendQueryError(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) | PipelineError::Conversion(_) => "Invalid query",
            PipelineError::Pagination(_) | PipelineError::PageParams(_) => "Invalid page",
            PipelineError::Search(SearchError::BackendUnavailable(_)) => {
                "Search backend unavailable"
            }
            PipelineError::Search(SearchError::BackendQueryError(_)) => "Search failed",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let body = ApiError {
            error: self.label().into(),
            details: Some(self.to_string()),
        };
        (self.status(), Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Validate and convert a query without running it.
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<Value>, PipelineError> {
    let query = state.search.prepare(&req.query)?;
    Ok(Json(json!({ "query": query.to_dsl() })))
}

/// Publish the audit record, then run the search pipeline. A failed
/// publish is logged and does not change the response. Malformed paging
/// parameters are still audited before being rejected.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    params: Result<Query<PageParams>, QueryRejection>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<SearchResponse>, PipelineError> {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("search", %request_id, user = %principal.username);

    async move {
        let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
        let record = AuditRecord::new(ip, principal.username.as_str(), req.query.as_str());
        if let Err(e) = state.publisher.publish(&record).await {
            tracing::warn!("Audit publish failed: {}", e);
        }

        let params = match params {
            Ok(Query(params)) => params,
            Err(rejection) => {
                let e = PipelineError::PageParams(rejection.body_text());
                tracing::info!("Query '{}' rejected: {}", req.query, e);
                return Err(e);
            }
        };

        match state.search.run(&req.query, params).await {
            Ok(page) => {
                tracing::info!("Query '{}' matched {} hosts", req.query, page.total);
                Ok(Json(SearchResponse {
                    total: page.total,
                    results: page.items,
                }))
            }
            Err(e) => {
                tracing::info!("Query '{}' rejected: {}", req.query, e);
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

/// First hop of `X-Forwarded-For`, else the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".into(),
    }
}
