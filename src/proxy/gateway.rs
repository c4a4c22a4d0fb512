// Shared forwarding logic used by both the long-running server and the
// single-invocation adapter.
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::proxy::error::GatewayError;
use crate::proxy::middleware::CorsPolicy;
use crate::proxy::target::ProxyTarget;
use crate::proxy::upstream::UpstreamClient;

/// An inbound request as seen by the gateway, independent of the hosting adapter
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path captured by the wildcard route, if the adapter has one
    pub wildcard: Option<String>,
    /// Raw (still encoded) query string
    pub raw_query: Option<String>,
    /// Original request URL, echoed in error bodies
    pub original_url: String,
}

/// Relative API path and the query string to forward with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    /// Upstream body that is not JSON, relayed verbatim
    Text(String),
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl GatewayResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn json(status: StatusCode, value: Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: ResponseBody::Json(value),
        }
    }

    pub fn text(status: StatusCode, body: String, content_type: Option<&str>) -> Self {
        let content_type = content_type
            .and_then(|ct| HeaderValue::from_str(ct).ok())
            .unwrap_or_else(|| HeaderValue::from_static("text/plain; charset=utf-8"));
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, content_type);
        Self {
            status,
            headers,
            body: ResponseBody::Text(body),
        }
    }

    pub fn body_text(&self) -> String {
        match &self.body {
            ResponseBody::Empty => String::new(),
            ResponseBody::Json(value) => value.to_string(),
            ResponseBody::Text(text) => text.clone(),
        }
    }
}

impl From<GatewayError> for GatewayResponse {
    fn from(err: GatewayError) -> Self {
        GatewayResponse::json(err.status(), err.body())
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            ResponseBody::Empty => Body::empty(),
            ResponseBody::Json(value) => Body::from(value.to_string()),
            ResponseBody::Text(text) => Body::from(text),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        GatewayResponse::from(self).into_response()
    }
}

/// Pick the API path: wildcard segment first, then the `path` query parameter(s).
/// Every other query pair is forwarded in its original order.
/// Both sources arrive decoded, so `.` and `..` are checked after decoding.
pub fn resolve_path(request: &InboundRequest) -> Result<ResolvedPath, GatewayError> {
    let pairs: Vec<(String, String)> = request
        .raw_query
        .as_deref()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let from_query = pairs
        .iter()
        .filter(|(k, _)| k == "path")
        .map(|(_, v)| v.trim_matches('/'))
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let path = match request.wildcard.as_deref().map(|w| w.trim_matches('/')) {
        Some(w) if !w.is_empty() => w.to_string(),
        _ => from_query,
    };

    if path.is_empty() {
        return Err(GatewayError::InvalidRequest {
            url: request.original_url.clone(),
            query: query_object(&pairs),
        });
    }

    if path.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(GatewayError::DotSegment {
            url: request.original_url.clone(),
            path,
        });
    }

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().filter(|(k, _)| k != "path"))
        .finish();

    Ok(ResolvedPath { path, query })
}

// Repeated keys become arrays, the way Node parses query strings
fn query_object(pairs: &[(String, String)]) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(key) {
            Some(Value::Array(values)) => values.push(Value::String(value.clone())),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value.clone())]);
            }
            None => {
                map.insert(key.clone(), Value::String(value.clone()));
            }
        }
    }
    Value::Object(map)
}

/// Stateless single-attempt relay to the fixed OpenMRS host
pub struct Gateway {
    target: ProxyTarget,
    upstream: UpstreamClient,
    cors: CorsPolicy,
}

impl Gateway {
    pub fn new(target: ProxyTarget, upstream: UpstreamClient, cors: CorsPolicy) -> Self {
        Self {
            target,
            upstream,
            cors,
        }
    }

    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    /// Handle one request. Always produces a response, always with CORS headers.
    pub async fn handle(&self, request: InboundRequest) -> GatewayResponse {
        let mut response = match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => GatewayResponse::from(err),
        };
        self.cors.apply(&mut response.headers);
        response
    }

    async fn dispatch(&self, request: InboundRequest) -> Result<GatewayResponse, GatewayError> {
        // Preflight never reaches upstream
        if request.method == Method::OPTIONS {
            return Ok(GatewayResponse::empty(StatusCode::OK));
        }

        if request.method != Method::GET {
            return Err(GatewayError::MethodNotAllowed {
                method: request.method.to_string(),
            });
        }

        let resolved = resolve_path(&request)?;
        let url = self.target.upstream_url(&resolved.path, &resolved.query);

        info!("[Proxy] {} {}", request.method, request.original_url);
        debug!("[Proxy] Extracted path: {}", resolved.path);
        info!("[Proxy] Target URL: {}", url);

        let upstream = self
            .upstream
            .get(&url, &self.target.authorization())
            .await
            .map_err(|message| {
                error!("[Proxy] Transport error for {}: {}", url, message);
                GatewayError::Transport {
                    message,
                    url: url.clone(),
                    path: resolved.path.clone(),
                }
            })?;

        let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
        info!(
            "[Proxy] Response: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        );

        if !upstream.is_success() {
            return Err(GatewayError::Upstream {
                status,
                details: GatewayError::upstream_details(&upstream.body),
                requested_url: url,
            });
        }

        match serde_json::from_str::<Value>(&upstream.body) {
            Ok(json) => Ok(GatewayResponse::json(status, json)),
            Err(_) => {
                debug!("[Proxy] Upstream body is not JSON, relaying as text");
                Ok(GatewayResponse::text(
                    status,
                    upstream.body,
                    upstream.content_type.as_deref(),
                ))
            }
        }
    }
}
