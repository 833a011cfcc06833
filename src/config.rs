use std::path::Path;

use serde::Deserialize;

use crate::errors::{ServiceError, ServiceResult};

/// Remote document-store connection settings. An empty `api_base` means no
/// remote is configured and the app runs local-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_base: String,
    /// Seconds between snapshot polls.
    pub poll_interval_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            poll_interval_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_base.trim().is_empty()
    }
}

/// Media upload endpoint settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub upload_base: String,
    pub upload_preset: String,
    pub folder: Option<String>,
}

impl UploaderConfig {
    pub fn is_configured(&self) -> bool {
        !self.upload_base.trim().is_empty() && !self.upload_preset.trim().is_empty()
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub uploader: UploaderConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file. A missing file is not an error:
    /// the app then runs with everything unconfigured (local-only mode).
    pub fn load(path: impl AsRef<Path>) -> ServiceResult<AppConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ServiceError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })
    }
}
