//! `/healthz` body: uptime, local time, and fields from registered providers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::dispatch::{Dispatcher, ExtendedRequest};
use crate::error::ApiError;
use crate::routing::EndpointResult;

/// Local time with numeric UTC offset, e.g. `2024-05-01T13:45:10+0200`.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Adds device-specific fields to the health body.
pub trait HealthFields: Send + Sync {
    fn populate(&self, fields: &mut Map<String, Value>) -> Result<(), ApiError>;
}

pub struct HealthReporter {
    started: Instant,
    providers: Vec<Arc<dyn HealthFields>>,
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthReporter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            providers: Vec::new(),
        }
    }

    pub fn with_fields(mut self, provider: Arc<dyn HealthFields>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn report(&self) -> EndpointResult {
        let mut fields = Map::new();
        fields.insert("uptime".to_string(), Value::from(self.uptime().as_secs()));
        fields.insert("time".to_string(), Value::from(timestamp_now()));

        for provider in &self.providers {
            provider.populate(&mut fields)?;
        }

        Ok(Value::Object(fields))
    }
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

impl<H: ExtendedRequest> HealthFields for Dispatcher<H> {
    fn populate(&self, fields: &mut Map<String, Value>) -> Result<(), ApiError> {
        let stats = serde_json::to_value(self.stats())
            .map_err(|e| ApiError::internal(format!("Failed to encode worker stats: {e}")))?;
        fields.insert("workers".to_string(), stats);
        Ok(())
    }
}
