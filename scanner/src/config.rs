//! Configuration management for the gate scanner.
//!
//! Loads configuration from environment variables with sensible defaults.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration values
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The authority base URL does not parse
    #[error("Invalid GATECHECK_API_BASE_URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// Offending value
        url: String,
        /// Parser message
        reason: String,
    },

    /// A timeout was set to zero
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    /// The cache slot name is unusable as a file name
    #[error("Invalid GATECHECK_CACHE_SLOT '{0}'")]
    InvalidSlot(String),
}

/// Scanner configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote ticket authority
    pub remote: RemoteConfig,
    /// Offline ticket cache
    pub cache: CacheConfig,
    /// Verification policy
    pub verification: VerificationConfig,
    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

/// Remote ticket authority configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API base URL, e.g. `http://127.0.0.1:8000/api`
    pub base_url: String,
    /// Whole-request timeout in seconds
    pub request_timeout: u64,
    /// Connect timeout in seconds
    pub connect_timeout: u64,
    /// Cookie carrying the anti-forgery token
    pub csrf_cookie: String,
    /// Header the token is sent in
    pub csrf_header: String,
    /// Path (relative to `base_url`) that sets the token cookie
    pub csrf_path: String,
}

/// Offline cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding slot files
    pub dir: PathBuf,
    /// Slot holding the cached ticket list
    pub slot: String,
}

/// Verification policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Reject non-UUID identifiers before any network call
    pub strict_uuid: bool,
    /// Trust a definitive remote "not found" instead of consulting the cache
    pub skip_cache_on_not_found: bool,
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directives in `RUST_LOG` syntax, e.g. `info,gatecheck_scanner=debug`
    pub log_level: String,
    /// Prometheus listener address; metrics are off when unset
    pub metrics_addr: Option<String>,
}

impl RemoteConfig {
    /// Request timeout as a `Duration`
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Connect timeout as a `Duration`
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Remote config pointed at `base_url` with default timeouts and CSRF names.
    #[must_use]
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Config::default().remote
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig {
                base_url: "http://127.0.0.1:8000/api".to_string(),
                request_timeout: 10,
                connect_timeout: 5,
                csrf_cookie: "csrftoken".to_string(),
                csrf_header: "X-CSRFToken".to_string(),
                csrf_path: "/csrf/".to_string(),
            },
            cache: CacheConfig {
                dir: PathBuf::from(".gatecheck"),
                slot: gatecheck_core::DEFAULT_SLOT.to_string(),
            },
            verification: VerificationConfig {
                strict_uuid: false,
                skip_cache_on_not_found: false,
            },
            observability: ObservabilityConfig {
                log_level: "info,gatecheck_scanner=debug".to_string(),
                metrics_addr: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults; call
    /// [`Config::validate`] before use.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            remote: RemoteConfig {
                base_url: env::var("GATECHECK_API_BASE_URL")
                    .unwrap_or(defaults.remote.base_url),
                request_timeout: env::var("GATECHECK_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.remote.request_timeout),
                connect_timeout: env::var("GATECHECK_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.remote.connect_timeout),
                csrf_cookie: env::var("GATECHECK_CSRF_COOKIE")
                    .unwrap_or(defaults.remote.csrf_cookie),
                csrf_header: env::var("GATECHECK_CSRF_HEADER")
                    .unwrap_or(defaults.remote.csrf_header),
                csrf_path: env::var("GATECHECK_CSRF_PATH")
                    .unwrap_or(defaults.remote.csrf_path),
            },
            cache: CacheConfig {
                dir: env::var("GATECHECK_CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.cache.dir),
                slot: env::var("GATECHECK_CACHE_SLOT")
                    .unwrap_or(defaults.cache.slot),
            },
            verification: VerificationConfig {
                strict_uuid: env::var("GATECHECK_STRICT_UUID")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.verification.strict_uuid),
                skip_cache_on_not_found: env::var("GATECHECK_SKIP_CACHE_ON_NOT_FOUND")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.verification.skip_cache_on_not_found),
            },
            observability: ObservabilityConfig {
                log_level: env::var("RUST_LOG")
                    .unwrap_or(defaults.observability.log_level),
                metrics_addr: env::var("METRICS_ADDR").ok(),
            },
        }
    }

    /// Check values that have no safe fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unparsable base URL, a zero timeout or
    /// a slot name that is not a plain file name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.remote.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.remote.base_url.clone(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.remote.base_url.clone(),
                reason: "not a hierarchical URL".to_string(),
            });
        }

        if self.remote.request_timeout == 0 {
            return Err(ConfigError::ZeroTimeout("GATECHECK_REQUEST_TIMEOUT_SECS"));
        }
        if self.remote.connect_timeout == 0 {
            return Err(ConfigError::ZeroTimeout("GATECHECK_CONNECT_TIMEOUT_SECS"));
        }

        let slot = &self.cache.slot;
        if slot.is_empty() || slot.contains(['/', '\\']) || slot.starts_with('.') {
            return Err(ConfigError::InvalidSlot(slot.clone()));
        }

        Ok(())
    }
}
