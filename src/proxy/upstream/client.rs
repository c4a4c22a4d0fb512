// Upstream client implementation
// Single-attempt GET against the OpenMRS host

use reqwest::{header, Client};

use crate::proxy::config::UpstreamProxyConfig;

/// What came back from the EMR, body already read
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct UpstreamClient {
    http_client: Client,
}

impl UpstreamClient {
    pub fn new(timeout_secs: Option<u64>, proxy_config: Option<UpstreamProxyConfig>) -> Self {
        Self {
            http_client: crate::utils::http::create_client_with_proxy(timeout_secs, proxy_config),
        }
    }

    /// Issue the upstream GET. `Err` carries the transport failure message.
    pub async fn get(&self, url: &str, authorization: &str) -> Result<UpstreamResponse, String> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(authorization).map_err(|e| e.to_string())?,
        );

        let response = self
            .http_client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read upstream body: {}", e))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
