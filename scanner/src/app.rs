//! Application wiring: configuration in, ready engine out.

use crate::config::Config;
use crate::engine::{EnginePolicy, VerificationEngine};
use crate::error::GateError;
use crate::remote::HttpTicketAuthority;
use crate::storage::FileSlotStorage;
use gatecheck_core::{Resolver, SystemClock, TicketCache};
use std::sync::Arc;

/// Gate scanner application.
///
/// Wires the HTTP authority, the file-backed cache and the system clock into
/// a [`VerificationEngine`].
#[derive(Debug)]
pub struct GateApp {
    config: Config,
    engine: Arc<VerificationEngine>,
}

impl GateApp {
    /// Build the application from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the configuration is invalid and
    /// [`GateError::Remote`] if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, GateError> {
        config.validate()?;

        let authority = HttpTicketAuthority::new(&config.remote)?;
        let storage = FileSlotStorage::new(config.cache.dir.clone());
        let cache = TicketCache::new(Arc::new(storage), config.cache.slot.clone());

        let policy = EnginePolicy {
            resolver: if config.verification.strict_uuid {
                Resolver::strict()
            } else {
                Resolver::new()
            },
            skip_cache_on_not_found: config.verification.skip_cache_on_not_found,
            remote_timeout: config.remote.request_timeout(),
        };

        tracing::debug!(
            base_url = %authority.base_url(),
            cache_dir = %config.cache.dir.display(),
            slot = %config.cache.slot,
            ?policy,
            "Wiring verification engine"
        );

        let engine = VerificationEngine::new(
            Arc::new(authority),
            Arc::new(cache),
            Arc::new(SystemClock),
        )
        .with_policy(policy);

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    /// The verification engine
    #[must_use]
    pub fn engine(&self) -> Arc<VerificationEngine> {
        Arc::clone(&self.engine)
    }

    /// Configuration the app was built from
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wires_policy_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.dir = dir.path().to_path_buf();
        config.verification.strict_uuid = true;
        config.verification.skip_cache_on_not_found = true;

        let app = GateApp::new(config).unwrap();
        let policy = *app.engine().policy();

        assert!(policy.resolver.is_strict());
        assert!(policy.skip_cache_on_not_found);
        assert_eq!(policy.remote_timeout, app.config().remote.request_timeout());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = Config::default();
        config.remote.connect_timeout = 0;
        assert!(matches!(GateApp::new(config), Err(GateError::Config(_))));
    }
}
