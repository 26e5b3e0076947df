//! Device administration endpoints.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::ApiError;
use crate::health::HealthReporter;
use crate::request::DeviceRequest;
use crate::routing::{EndpointResult, HttpMethod, RouteError, RouteTable};
use crate::wifi::WifiManager;

const MAX_HOST_NAME_LEN: usize = 63;

/// Collaborators shared by the endpoints.
#[derive(Clone, Default)]
pub struct WebContext {
    pub wifi_manager: Option<Arc<dyn WifiManager>>,
}

impl WebContext {
    pub fn new(wifi_manager: Arc<dyn WifiManager>) -> Self {
        Self {
            wifi_manager: Some(wifi_manager),
        }
    }

    fn wifi_manager(&self) -> Result<&Arc<dyn WifiManager>, ApiError> {
        self.wifi_manager.as_ref().ok_or_else(|| {
            tracing::error!("No valid wifiManager");
            ApiError::internal("Missing wifiManager")
        })
    }
}

/// Which endpoints run on dispatch workers.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub healthz_async: bool,
    pub reset_async: bool,
    pub set_hostname_async: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            healthz_async: false,
            reset_async: true,
            set_hostname_async: true,
        }
    }
}

/// The standard device route table.
pub fn device_routes(
    context: WebContext,
    health: Arc<HealthReporter>,
    policy: DispatchPolicy,
) -> Result<RouteTable, RouteError> {
    let context = Arc::new(context);
    let mut table = RouteTable::new();

    table.register(
        "/reset",
        HttpMethod::Post,
        {
            let context = Arc::clone(&context);
            Arc::new(move |req: &DeviceRequest| reset(&context, req))
        },
        policy.reset_async,
    )?;
    table.register(
        "/set_hostname",
        HttpMethod::Post,
        {
            let context = Arc::clone(&context);
            Arc::new(move |req: &DeviceRequest| set_hostname(&context, req))
        },
        policy.set_hostname_async,
    )?;
    table.register(
        "/healthz",
        HttpMethod::Get,
        Arc::new(move |_: &DeviceRequest| health.report()),
        policy.healthz_async,
    )?;

    Ok(table)
}

pub fn reset(context: &WebContext, _req: &DeviceRequest) -> EndpointResult {
    let wifi = context.wifi_manager()?;
    wifi.clear().map_err(|e| {
        tracing::error!(error = %e, "Failed to clear network config");
        ApiError::internal("Failed to clear network config")
    })?;
    Ok(json!({"status": "OK"}))
}

pub fn set_hostname(context: &WebContext, req: &DeviceRequest) -> EndpointResult {
    let wifi = context.wifi_manager()?;

    if req.content_len() == 0 {
        return Err(ApiError::bad_request("Content-Length required"));
    }

    let body: Value = serde_json::from_slice(&req.body)
        .map_err(|_| ApiError::bad_request("Invalid JSON"))?;
    if is_empty_document(&body) {
        return Err(ApiError::bad_request("Invalid JSON"));
    }

    let host_name = body
        .get("host_name")
        .and_then(Value::as_str)
        .filter(|name| is_valid_host_name(name))
        .ok_or_else(|| ApiError::bad_request("Missing or invalid 'host_name'"))?;

    wifi.set_host_name(host_name).map_err(|e| {
        tracing::error!(error = %e, "Failed to store hostname");
        ApiError::internal("Failed to store hostname")
    })?;

    Ok(json!({"status": "OK", "host_name": host_name}))
}

/// No members to look in: an empty object or array, or a bare scalar.
fn is_empty_document(body: &Value) -> bool {
    match body {
        Value::Object(fields) => fields.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => true,
    }
}

fn is_valid_host_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_HOST_NAME_LEN
}
