// Middleware module - Axum middleware and response headers

pub mod cors;
pub mod logging;

pub use cors::CorsPolicy;
pub use logging::logging_middleware;
