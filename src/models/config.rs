use crate::proxy::GatewayConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:3001/api/openmrs";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub advisory: AdvisoryConfig,
}

/// How the dashboard data layer reaches OpenMRS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway endpoint, including the `/api/openmrs` prefix
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// false: call the OpenMRS host directly with the gateway credentials
    #[serde(default = "default_use_proxy")]
    pub use_proxy: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            use_proxy: true,
        }
    }
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_use_proxy() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Anthropic,
    Custom,
}

impl LlmProvider {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// LLM settings for the health advisory
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdvisoryConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the provider's default endpoint
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay environment values. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("OPENMRS_BASE_URL") {
            self.gateway.upstream_base_url = url;
        }
        if let Some(user) = non_empty("OPENMRS_USERNAME") {
            self.gateway.username = Some(user);
        }
        if let Some(pass) = non_empty("OPENMRS_PASSWORD") {
            self.gateway.password = Some(pass);
        }
        if let Some(port) = non_empty("PORT") {
            match port.trim().parse() {
                Ok(p) => self.gateway.port = p,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }
        if let Some(origin) = non_empty("GATEWAY_ALLOWED_ORIGIN") {
            self.gateway.allowed_origin = Some(origin);
        }
        if let Some(url) = non_empty("GATEWAY_PROXY_URL") {
            self.client.gateway_url = url;
        }
        if let Some(flag) = non_empty("USE_PROXY") {
            self.client.use_proxy = flag.trim() != "false";
        }
        if let Some(provider) = non_empty("LLM_PROVIDER") {
            match LlmProvider::parse(&provider) {
                Some(p) => self.advisory.provider = p,
                None => tracing::warn!("Unknown LLM_PROVIDER {}, keeping {:?}", provider, self.advisory.provider),
            }
        }
        if let Some(key) = non_empty("LLM_API_KEY") {
            self.advisory.api_key = Some(key);
        }
        if let Some(url) = non_empty("LLM_API_URL") {
            self.advisory.api_url = Some(url);
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.advisory.model = Some(model);
        }
    }
}
