// proxy module - credential-injecting OpenMRS gateway

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers; // API endpoint handlers
pub mod invocation; // Single-invocation adapter
pub mod middleware; // Axum middleware and CORS headers
pub mod server; // Long-running adapter
pub mod target;
pub mod upstream; // Upstream client

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayResponse, InboundRequest, ResponseBody};
pub use server::AxumServer;
pub use target::ProxyTarget;

use crate::error::AppResult;
use crate::proxy::middleware::CorsPolicy;
use crate::proxy::upstream::UpstreamClient;

/// Assemble a gateway from configuration. Fails when credentials are missing.
pub fn build_gateway(config: &GatewayConfig) -> AppResult<Gateway> {
    let cors = CorsPolicy::from_setting(config.allowed_origin.as_deref());
    build_gateway_with_cors(config, cors)
}

pub fn build_gateway_with_cors(config: &GatewayConfig, cors: CorsPolicy) -> AppResult<Gateway> {
    let target = ProxyTarget::from_config(config)?;
    let upstream = UpstreamClient::new(config.request_timeout, Some(config.upstream_proxy.clone()));
    Ok(Gateway::new(target, upstream, cors))
}
