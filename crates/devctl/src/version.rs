//! Version information for devctl.

use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::health::HealthFields;

/// devctl version from Cargo.toml
pub const DEVCTL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub devctl: &'static str,
    /// Firmware or image version of the device, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            devctl: DEVCTL_VERSION,
            firmware: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_firmware(mut self, version: String) -> Self {
        self.firmware = Some(version);
        self
    }
}

impl HealthFields for VersionInfo {
    fn populate(&self, fields: &mut Map<String, Value>) -> Result<(), ApiError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ApiError::internal(format!("Failed to encode version: {e}")))?;
        fields.insert("version".to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_devctl_version() {
        let info = VersionInfo::new();
        assert_eq!(info.devctl, DEVCTL_VERSION);
        assert!(info.firmware.is_none());
    }

    #[test]
    fn version_info_serializes_minimal() {
        let info = VersionInfo {
            devctl: "0.1.0",
            firmware: None,
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "devctl": "0.1.0"
        }
        "#);
    }

    #[test]
    fn populates_version_field() {
        let info = VersionInfo {
            devctl: "0.1.0",
            firmware: Some("2.4.1".to_string()),
        };
        let mut fields = Map::new();
        info.populate(&mut fields).unwrap();
        assert_eq!(
            fields["version"],
            serde_json::json!({"devctl": "0.1.0", "firmware": "2.4.1"})
        );
    }
}
