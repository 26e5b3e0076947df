//! Network configuration store.
//!
//! `FileWifiManager` keeps stored credentials and the configured hostname in a
//! JSON file. Writes go to a sibling temp file which is then renamed over the
//! original, so a crash never leaves a half-written file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access network config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("network config {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Device network configuration.
pub trait WifiManager: Send + Sync {
    /// Forget stored network credentials.
    fn clear(&self) -> Result<(), StoreError>;

    fn set_host_name(&self, host_name: &str) -> Result<(), StoreError>;

    fn host_name(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<WifiCredentials>,
}

pub struct FileWifiManager {
    path: PathBuf,
    config: Mutex<NetworkConfig>,
}

impl FileWifiManager {
    /// Load the config at `path`; a missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let config = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => NetworkConfig::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            config: Mutex::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> NetworkConfig {
        self.lock().clone()
    }

    pub fn set_credentials(&self, credentials: WifiCredentials) -> Result<(), StoreError> {
        self.update(|config| config.credentials = Some(credentials))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkConfig> {
        match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Network config mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    fn update(&self, change: impl FnOnce(&mut NetworkConfig)) -> Result<(), StoreError> {
        let mut config = self.lock();
        let mut next = config.clone();
        change(&mut next);
        self.persist(&next)?;
        *config = next;
        Ok(())
    }

    fn persist(&self, config: &NetworkConfig) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let bytes = serde_json::to_vec_pretty(config).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl WifiManager for FileWifiManager {
    fn clear(&self) -> Result<(), StoreError> {
        tracing::info!(path = %self.path.display(), "Clearing stored network credentials");
        self.update(|config| config.credentials = None)
    }

    fn set_host_name(&self, host_name: &str) -> Result<(), StoreError> {
        tracing::info!(host_name, "Storing hostname");
        self.update(|config| config.host_name = Some(host_name.to_string()))
    }

    fn host_name(&self) -> Option<String> {
        self.lock().host_name.clone()
    }
}
