use serde::{Deserialize, Serialize};

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://openmrs6.arogya.cloud";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Gateway service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listening port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether to allow LAN access
    /// - false: local access only 127.0.0.1 (default)
    /// - true: listen on 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// OpenMRS host, without the `/openmrs` context path
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,

    /// Basic-Auth user injected into every upstream request
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Origin allowed by the CORS headers. `None` or `"*"` allows any origin.
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: Option<String>,

    /// Upstream request timeout (seconds). Unset means wait indefinitely.
    #[serde(default)]
    pub request_timeout: Option<u64>,

    /// Outbound proxy used to reach the OpenMRS host
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

/// Outbound proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    /// Whether it is enabled
    pub enabled: bool,
    /// Proxy address (http://, https://, socks5://)
    pub url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allow_lan_access: false,
            upstream_base_url: default_upstream_base_url(),
            username: None,
            password: None,
            allowed_origin: default_allowed_origin(),
            request_timeout: None,
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    3001
}

fn default_upstream_base_url() -> String {
    DEFAULT_UPSTREAM_BASE_URL.to_string()
}

fn default_allowed_origin() -> Option<String> {
    Some(DEFAULT_ALLOWED_ORIGIN.to_string())
}

impl GatewayConfig {
    /// Get the actual listening address
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}
