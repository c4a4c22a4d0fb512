// Single-invocation adapter: one request in, one response out, no listener.
use std::collections::BTreeMap;
use std::str::FromStr;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::proxy::gateway::{Gateway, GatewayResponse, InboundRequest};

pub const ROUTE_PREFIX: &str = "/api/openmrs";

/// A raw function-style request, e.g. `GET /api/openmrs/ws/rest/v1/session?v=full`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub method: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl From<GatewayResponse> for InvocationResponse {
    fn from(response: GatewayResponse) -> Self {
        let body = response.body_text();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers.iter() {
            if let Ok(v) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(v);
                    })
                    .or_insert_with(|| v.to_string());
            }
        }
        Self {
            status: response.status.as_u16(),
            headers,
            body,
        }
    }
}

impl Invocation {
    /// Split the URL into the wildcard segment after `/api/openmrs` and the raw query.
    pub fn to_inbound(&self) -> InboundRequest {
        // An unparseable method still has to produce a 405, not a crash
        let method = Method::from_str(&self.method.to_uppercase()).unwrap_or(Method::CONNECT);

        let (path_part, raw_query) = match self.url.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (self.url.as_str(), None),
        };

        let wildcard = strip_route_prefix(path_part).trim_matches('/');
        // Decoded like the axum `Path` extractor; invalid UTF-8 stays as sent
        let wildcard = urlencoding::decode(wildcard)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| wildcard.to_string());

        InboundRequest {
            method,
            wildcard: (!wildcard.is_empty()).then_some(wildcard),
            raw_query: raw_query.filter(|q| !q.is_empty()),
            original_url: self.url.clone(),
        }
    }
}

// `/api/openmrs` only counts when a segment boundary follows it
fn strip_route_prefix(path: &str) -> &str {
    match path.strip_prefix(ROUTE_PREFIX) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

pub async fn invoke(gateway: &Gateway, invocation: &Invocation) -> InvocationResponse {
    gateway.handle(invocation.to_inbound()).await.into()
}
