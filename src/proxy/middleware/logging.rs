// Request logging middleware
use axum::{extract::Request, middleware::Next, response::Response};

pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    tracing::info!("Request: {} {}", method, uri);

    let response = next.run(request).await;

    tracing::info!(
        status = response.status().as_u16(),
        "Response: {} for {} {}",
        response.status(),
        method,
        uri
    );
    response
}
