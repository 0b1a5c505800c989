use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};

use crate::document::Document;
use crate::gateway::Gateway;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

pub async fn openid_configuration(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    serve_document(&state, &method, &headers, Document::OpenIdConfiguration).await
}

pub async fn jwks(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Response {
    serve_document(&state, &method, &headers, Document::Jwks).await
}

async fn serve_document(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    doc: Document,
) -> Response {
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    state
        .gateway
        .serve(method, doc, if_none_match)
        .await
        .into_response()
}

/// Liveness probe: refreshes both documents from the upstream.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    probe(&state, "liveness").await
}

/// Readiness probe: same check as liveness, the gateway is only useful while
/// the upstream answers.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    probe(&state, "readiness").await
}

async fn probe(state: &AppState, kind: &'static str) -> (StatusCode, &'static str) {
    match state.gateway.populate_detached().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::warn!(probe = kind, error = %e, "probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        }
    }
}

pub async fn method_not_allowed(method: Method, uri: Uri) -> impl IntoResponse {
    tracing::info!(path = %uri.path(), method = %method, status = 405, "method not allowed");
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "GET")],
        "Method Not Allowed",
    )
}

pub async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    tracing::info!(path = %uri.path(), method = %method, status = 404, "not found");
    (StatusCode::NOT_FOUND, "Not Found")
}
