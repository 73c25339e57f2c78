use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::destination::Destination;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrent_uploads must be at least 1")]
    ZeroConcurrency,
    #[error("no destination configured")]
    MissingDestination,
    #[error("invalid server url '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("invalid accepted type pattern '{0}'")]
    InvalidTypePattern(String),
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Which processing options the embedding UI offers. An option that is
/// not offered is never sent to the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub show_extract_option: bool,
    pub show_email_option: bool,
    pub show_verbose_option: bool,
    pub show_update_option: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            show_extract_option: true,
            show_email_option: false,
            show_verbose_option: false,
            show_update_option: false,
        }
    }
}

/// Query parameters sent with every upload of the batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    pub extract: bool,
    pub send_email: bool,
    pub verbose: bool,
    pub update: bool,
    pub content: Option<String>,
    pub format: Option<String>,
    /// Overwrite without asking.
    pub overwrite: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub server_url: String,
    /// Destination path template; `##FILENAME_REPLACE##` is substituted per file.
    pub destination: String,
    /// Where the presenter renders the file list.
    pub mount_point: Option<String>,
    pub max_concurrent_uploads: usize,
    /// MIME type patterns, e.g. `image/*`. Empty accepts everything.
    pub accepted_types: Vec<String>,
    /// The destination supports overwrite semantics (existence check and prompt).
    pub allow_overwrite: bool,
    pub features: FeatureToggles,
    pub options: UploadOptions,
    pub request_timeout_secs: Option<u64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            destination: String::new(),
            mount_point: None,
            max_concurrent_uploads: 1, // resources are not safe under concurrent writers
            accepted_types: Vec::new(),
            allow_overwrite: false,
            features: FeatureToggles::default(),
            options: UploadOptions::default(),
            request_timeout_secs: None,
        }
    }
}

impl UploadConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_uploads == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.destination.trim().is_empty() {
            return Err(ConfigError::MissingDestination);
        }
        reqwest::Url::parse(&self.server_url).map_err(|e| ConfigError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason: e.to_string(),
        })?;
        for pattern in &self.accepted_types {
            glob::Pattern::new(pattern)
                .map_err(|_| ConfigError::InvalidTypePattern(pattern.clone()))?;
        }

        if let Some(message) = self.concurrency_warning() {
            warn!("{}", message);
        }
        Ok(())
    }

    /// Raising concurrency against a resource can corrupt it server-side.
    /// The setting is honored; the caller is told.
    pub fn concurrency_warning(&self) -> Option<String> {
        if self.max_concurrent_uploads > 1 && Destination::new(&self.destination).is_resource() {
            Some(format!(
                "max_concurrent_uploads is {} for resource destination '{}'; concurrent writers to a resource can corrupt it",
                self.max_concurrent_uploads, self.destination
            ))
        } else {
            None
        }
    }

    pub fn accepts(&self, mime_type: &str) -> bool {
        if self.accepted_types.is_empty() {
            return true;
        }
        self.accepted_types.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(mime_type))
                .unwrap_or(false)
        })
    }

    /// Options masked by the feature toggles.
    pub fn effective_options(&self) -> UploadOptions {
        let mut options = self.options.clone();
        options.extract &= self.features.show_extract_option;
        options.send_email &= self.features.show_email_option;
        options.verbose &= self.features.show_verbose_option;
        options.update &= self.features.show_update_option;
        options
    }
}
