use crate::models::AppConfig;
use crate::modules::config::ConfigLayers;
use crate::proxy::invocation::{self, Invocation, InvocationResponse};
use crate::proxy::middleware::CorsPolicy;
use crate::proxy::{AxumServer, GatewayConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Gateway service status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub running: bool,
    pub port: u16,
    pub base_url: String,
    pub upstream_url: String,
}

/// Running gateway instance
pub struct GatewayServiceInstance {
    pub config: GatewayConfig,
    pub axum_server: AxumServer,
    pub server_handle: tokio::task::JoinHandle<()>,
}

/// Start gateway service
pub async fn start_gateway_service(
    config: GatewayConfig,
) -> Result<(GatewayServiceInstance, GatewayStatus), String> {
    let gateway = crate::proxy::build_gateway(&config).map_err(|e| e.to_string())?;
    let upstream_url = gateway.target().base_url().to_string();

    // Start Axum server
    let (axum_server, server_handle) = match AxumServer::start(
        config.get_bind_address().to_string(),
        config.port,
        Arc::new(gateway),
    )
    .await
    {
        Ok((server, handle)) => (server, handle),
        Err(e) => return Err(format!("Failed to start Axum server: {}", e)),
    };

    let status = GatewayStatus {
        running: true,
        port: axum_server.local_addr().port(),
        base_url: format!("http://{}", axum_server.local_addr()),
        upstream_url,
    };

    Ok((
        GatewayServiceInstance {
            config,
            axum_server,
            server_handle,
        },
        status,
    ))
}

/// Stop gateway service and wait for the accept loop to finish
pub async fn stop_gateway_service(instance: GatewayServiceInstance) {
    instance.axum_server.stop();
    instance.server_handle.await.ok();
}

/// `serve`: run until Ctrl-C. `--save-config` writes the file layer only.
pub async fn serve(mut layers: ConfigLayers, port: Option<u16>, save_config: bool) -> anyhow::Result<()> {
    if let Some(port) = port {
        layers.set_port(port);
    }

    let (instance, status) = start_gateway_service(layers.effective.gateway.clone())
        .await
        .map_err(anyhow::Error::msg)?;
    tracing::info!(
        "Gateway listening on {} (upstream {})",
        status.base_url,
        status.upstream_url
    );

    if save_config {
        let path = crate::modules::config::save_app_config(&layers.file)?;
        tracing::info!("Configuration saved to {:?}", path);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down gateway on port {}", instance.config.port);
    stop_gateway_service(instance).await;
    Ok(())
}

/// `invoke`: one request through the single-invocation adapter
pub async fn invoke_once(config: &AppConfig, method: &str, url: &str) -> anyhow::Result<InvocationResponse> {
    let gateway = crate::proxy::build_gateway_with_cors(&config.gateway, CorsPolicy::any())?;
    let request = Invocation {
        method: method.to_string(),
        url: url.to_string(),
    };
    Ok(invocation::invoke(&gateway, &request).await)
}
