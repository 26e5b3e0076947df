//! Blocking outbound HTTP POST helper.
//!
//! Uses ureq so it can be called from dispatch workers and other non-async
//! contexts. Each call builds a fresh agent; nothing is pooled between calls.

use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Result of a POST. `body` is empty unless the server answered 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOutcome {
    pub success: bool,
    pub body: String,
}

impl PostOutcome {
    fn failed() -> Self {
        Self {
            success: false,
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    url: String,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, milliseconds: u64) -> Self {
        self.set_timeout(milliseconds);
        self
    }

    pub fn set_timeout(&mut self, milliseconds: u64) {
        self.timeout = Duration::from_millis(milliseconds);
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `data` as JSON. Succeeds only on status 200; no retries.
    pub fn post(&self, data: &str) -> PostOutcome {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();

        let mut response = match agent
            .post(&self.url)
            .header("Content-Type", "application/json")
            .send(data)
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "HTTP POST failed");
                return PostOutcome::failed();
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            tracing::error!(url = %self.url, status, "HTTP POST returned non-200 status");
            return PostOutcome::failed();
        }

        match response.body_mut().read_to_string() {
            Ok(body) => PostOutcome {
                success: true,
                body,
            },
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Failed to read HTTP response body");
                PostOutcome::failed()
            }
        }
    }
}
