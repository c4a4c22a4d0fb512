use crate::proxy::gateway::Gateway;
use axum::{
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// Build the long-running gateway router
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    use crate::proxy::handlers::openmrs;

    let state = AppState { gateway };

    Router::new()
        .route("/health", get(openmrs::handle_health))
        // Every method is routed so the gateway itself answers OPTIONS and 405
        .route("/api/openmrs", any(openmrs::handle_query_route))
        .route("/api/openmrs/", any(openmrs::handle_query_route))
        .route("/api/openmrs/*path", any(openmrs::handle_wildcard_route))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            crate::proxy::middleware::logging_middleware,
        ))
        .with_state(state)
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: std::net::SocketAddr,
}

impl AxumServer {
    /// Start Axum server
    pub async fn start(
        host: String,
        port: u16,
        gateway: Arc<Gateway>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let upstream = gateway.target().base_url().to_string();
        let app = build_router(gateway);

        // Bind address
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        tracing::info!("Proxy server running on http://{}", local_addr);
        tracing::info!("Proxying OpenMRS requests to {}", upstream);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            local_addr,
        };

        // Start server in new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection handling finished or errored: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Proxy server stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stop server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::middleware::CorsPolicy;
    use crate::proxy::target::ProxyTarget;
    use crate::proxy::upstream::UpstreamClient;
    use crate::test_support::{StubReply, StubUpstream};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router_for(base_url: &str) -> Router {
        build_router(Arc::new(Gateway::new(
            ProxyTarget::new(base_url, "admin", "pw"),
            UpstreamClient::new(None, None),
            CorsPolicy::exact("http://localhost:3000"),
        )))
    }

    async fn send(router: Router, method: &str, uri: &str) -> (StatusCode, header::HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    #[tokio::test]
    async fn test_query_and_wildcard_routes_reach_same_resource() {
        let stub = StubUpstream::spawn(vec![(
            "/openmrs/ws/rest/v1/session",
            StubReply::json(json!({ "authenticated": true })),
        )])
        .await;
        let router = router_for(&stub.base_url);

        let (status, headers, body) =
            send(router.clone(), "GET", "/api/openmrs?path=ws/rest/v1/session").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({ "authenticated": true })
        );
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let (status, _, body) = send(router, "GET", "/api/openmrs/ws/rest/v1/session").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({ "authenticated": true })
        );
        assert_eq!(stub.hits(), 2);
    }

    #[tokio::test]
    async fn test_missing_path_is_400() {
        let stub = StubUpstream::spawn(vec![]).await;
        let (status, headers, body) = send(router_for(&stub.base_url), "GET", "/api/openmrs").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Invalid request");
        assert_eq!(stub.hits(), 0);
    }

    #[tokio::test]
    async fn test_post_is_405_without_upstream_call() {
        let stub = StubUpstream::spawn(vec![]).await;
        let (status, _, body) = send(
            router_for(&stub.base_url),
            "POST",
            "/api/openmrs?path=ws/rest/v1/visit",
        )
        .await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({ "error": "Method not allowed" })
        );
        assert_eq!(stub.hits(), 0);
    }

    #[tokio::test]
    async fn test_preflight_answers_locally() {
        let stub = StubUpstream::spawn(vec![]).await;
        let (status, headers, body) =
            send(router_for(&stub.base_url), "OPTIONS", "/api/openmrs/anything").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_HEADERS));
        assert_eq!(stub.hits(), 0);
    }

    #[tokio::test]
    async fn test_plain_text_upstream_is_relayed() {
        let stub = StubUpstream::spawn(vec![(
            "/openmrs/ws/rest/v1/ping",
            StubReply::text(202, "pong"),
        )])
        .await;
        let (status, _, body) =
            send(router_for(&stub.base_url), "GET", "/api/openmrs/ws/rest/v1/ping").await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, b"pong");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, headers, body) = send(router_for("https://emr.example.org"), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["openmrs_url"], "https://emr.example.org");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let stub = StubUpstream::spawn(vec![(
            "/openmrs/ws/rest/v1/session",
            StubReply::json(json!({ "authenticated": true })),
        )])
        .await;
        let gateway = Arc::new(Gateway::new(
            ProxyTarget::new(&stub.base_url, "admin", "pw"),
            UpstreamClient::new(None, None),
            CorsPolicy::any(),
        ));
        let (server, handle) = AxumServer::start("127.0.0.1".to_string(), 0, gateway)
            .await
            .unwrap();

        let url = format!(
            "http://{}/api/openmrs/ws/rest/v1/session",
            server.local_addr()
        );
        let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["authenticated"], true);

        server.stop();
        handle.await.unwrap();
    }
}
