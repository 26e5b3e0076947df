//! HTTP transport via axum.

mod deferred;
mod routes;
mod server;

pub use deferred::{DeferredHttpRequest, PendingRequest, Responder};
pub use routes::{AppState, DEFAULT_MAX_BODY_BYTES, endpoint_response, router};
pub use server::{ServerConfig, serve, serve_listener, serve_with_shutdown};
