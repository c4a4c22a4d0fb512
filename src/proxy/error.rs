use axum::http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

pub const NO_PATH_MESSAGE: &str = "No API path provided. Use /api/openmrs?path=ws/rest/v1/session or /api/openmrs/ws/rest/v1/session";

pub const DOT_SEGMENT_MESSAGE: &str = "API path may not contain '.' or '..' segments";

/// Failures the gateway reports to its caller. None are retried.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Invalid request: no API path provided")]
    InvalidRequest { url: String, query: Value },

    /// Path carries a `.` or `..` segment that would leave `/openmrs/`
    #[error("Invalid request: dot segment in path {path}")]
    DotSegment { url: String, path: String },

    #[error("Method not allowed: {method}")]
    MethodNotAllowed { method: String },

    /// Upstream answered with a non-2xx status
    #[error("OpenMRS API error: {status}")]
    Upstream {
        status: StatusCode,
        details: Value,
        requested_url: String,
    },

    /// Upstream could not be reached at all
    #[error("Proxy error: {message}")]
    Transport {
        message: String,
        url: String,
        path: String,
    },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } | Self::DotSegment { .. } => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Upstream { status, .. } => *status,
            Self::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            Self::InvalidRequest { url, query } => json!({
                "error": "Invalid request",
                "message": NO_PATH_MESSAGE,
                "url": url,
                "query": query,
            }),
            Self::DotSegment { url, path } => json!({
                "error": "Invalid request",
                "message": DOT_SEGMENT_MESSAGE,
                "url": url,
                "path": path,
            }),
            Self::MethodNotAllowed { .. } => json!({ "error": "Method not allowed" }),
            Self::Upstream {
                status,
                details,
                requested_url,
            } => json!({
                "error": "OpenMRS API error",
                "status": status.as_u16(),
                "statusText": status.canonical_reason().unwrap_or(""),
                "details": details,
                "requestedUrl": requested_url,
            }),
            Self::Transport { message, url, path } => json!({
                "error": "Proxy error",
                "message": message,
                "url": url,
                "path": path,
            }),
        }
    }

    /// Upstream error bodies are echoed as JSON when they parse, else wrapped.
    pub fn upstream_details(body: &str) -> Value {
        serde_json::from_str(body).unwrap_or_else(|_| json!({ "error": body }))
    }
}
