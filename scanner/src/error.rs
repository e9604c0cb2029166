//! Errors surfaced by the scanner outside the verification path.
//!
//! Verification and confirmation never fail; these cover startup, cache
//! refresh and the binary's own I/O.

use crate::config::ConfigError;
use crate::metrics::MetricsError;
use gatecheck_core::{CacheError, RemoteError};
use thiserror::Error;

/// Scanner error
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Ticket authority call failed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Metrics exporter setup failed
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// Terminal I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
