// OpenMRS Handler
use axum::{
    extract::{Path, State},
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
};
use serde_json::json;

use crate::proxy::gateway::{GatewayResponse, InboundRequest};
use crate::proxy::server::AppState;

/// `/api/openmrs?path=<relative-path>&...`
pub async fn handle_query_route(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> GatewayResponse {
    let request = InboundRequest {
        method,
        wildcard: None,
        raw_query: uri.query().map(str::to_string),
        original_url: uri.to_string(),
    };
    state.gateway.handle(request).await
}

/// `/api/openmrs/<relative-path>?...`
pub async fn handle_wildcard_route(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
) -> GatewayResponse {
    let request = InboundRequest {
        method,
        wildcard: Some(path),
        raw_query: uri.query().map(str::to_string),
        original_url: uri.to_string(),
    };
    state.gateway.handle(request).await
}

/// Health check handler
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let mut response = GatewayResponse::json(
        StatusCode::OK,
        json!({
            "status": "ok",
            "message": "Proxy server is running",
            "openmrs_url": state.gateway.target().base_url(),
            "proxy_path": crate::proxy::invocation::ROUTE_PREFIX,
        }),
    );
    state.gateway.cors().apply(&mut response.headers);
    response
}
