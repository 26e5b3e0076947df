//! Route registration.
//!
//! Each route names a path, a method, a handler and whether the handler runs
//! inline on the accept path or on a dispatch worker. That choice is the only
//! per-route policy.

use std::fmt;
use std::sync::Arc;

use axum::http::Method;

use crate::error::ApiError;
use crate::request::DeviceRequest;

/// JSON body for a 200 response, or an error envelope.
pub type EndpointResult = Result<serde_json::Value, ApiError>;

pub type EndpointHandler = Arc<dyn Fn(&DeviceRequest) -> EndpointResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_method(&self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route path must start with '/': {0}")]
    InvalidPath(String),
    #[error("route already registered: {method} {path}")]
    Duplicate { method: HttpMethod, path: String },
}

#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub method: HttpMethod,
    pub handler: EndpointHandler,
    pub run_async: bool,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("run_async", &self.run_async)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        path: &str,
        method: HttpMethod,
        handler: EndpointHandler,
        run_async: bool,
    ) -> Result<&mut Self, RouteError> {
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath(path.to_string()));
        }
        if self.find(path, method).is_some() {
            return Err(RouteError::Duplicate {
                method,
                path: path.to_string(),
            });
        }

        tracing::debug!(%method, path, run_async, "Registering route");
        self.routes.push(Route {
            path: path.to_string(),
            method,
            handler,
            run_async,
        });
        Ok(self)
    }

    pub fn find(&self, path: &str, method: HttpMethod) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.path == path && r.method == method)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
