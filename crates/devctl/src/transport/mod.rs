//! Transport layer for devctl.
//!
//! Currently provides HTTP transport via axum.

pub mod http;

pub use http::{AppState, ServerConfig, serve};
