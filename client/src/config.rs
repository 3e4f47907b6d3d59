//! Configuration management for the client.

use crmsync_engine::SyncConfig;
use std::env;
use std::time::Duration;

/// Path of the OData endpoint below the CRM base URL.
pub const REST_PATH: &str = "/XRMServices/2011/OrganizationData.svc";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// CRM base URL, without trailing slash
    pub base_url: String,
    /// Login name, if the CRM needs one
    pub username: Option<String>,
    /// Password for `username`
    pub password: Option<String>,
    /// Engine tuning (sync delta)
    pub sync: SyncConfig,
    /// Page size (`$top`) of list requests
    pub page_size: usize,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("CRM_BASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingBaseUrl)?
            .trim_end_matches('/')
            .to_string();

        let username = lookup("CRM_USERNAME").filter(|s| !s.is_empty());
        let password = lookup("CRM_PASSWORD");

        let sync_delta = lookup("CRM_SYNC_DELTA")
            .unwrap_or_else(|| "2".to_string())
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidSyncDelta)?;
        let sync = SyncConfig::new(Duration::from_secs(sync_delta))
            .map_err(|_| ConfigError::InvalidSyncDelta)?;

        let page_size = lookup("CRM_PAGE_SIZE")
            .unwrap_or_else(|| "50".to_string())
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::InvalidPageSize)?;

        let timeout = lookup("CRM_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidTimeout)?;

        Ok(Self {
            base_url,
            username,
            password,
            sync,
            page_size,
            timeout: Duration::from_secs(timeout),
        })
    }

    /// Root of the OData REST API.
    pub fn rest_root(&self) -> String {
        format!("{}{}", self.base_url, REST_PATH)
    }

    /// Username and password, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CRM_BASE_URL environment variable is required")]
    MissingBaseUrl,

    #[error("Invalid CRM_SYNC_DELTA value (whole seconds, at least 1)")]
    InvalidSyncDelta,

    #[error("Invalid CRM_PAGE_SIZE value")]
    InvalidPageSize,

    #[error("Invalid CRM_TIMEOUT_SECS value")]
    InvalidTimeout,
}
