//! Prometheus metrics for the gate scanner.
//!
//! The engine records through the `metrics` facade unconditionally; nothing
//! is exported unless [`install_exporter`] is called.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The listener address does not parse
    #[error("Invalid metrics address '{0}'")]
    Address(String),
    /// Failed to build or install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Serve Prometheus metrics on `addr` and register descriptions.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if the exporter cannot be built or a
/// recorder is already installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .map_err(|e| MetricsError::Install(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    tracing::info!(addr = %addr, "Metrics available at http://{}/metrics", addr);
    Ok(())
}

/// Parse a listener address from configuration.
///
/// # Errors
///
/// Returns [`MetricsError::Address`] if `addr` is not `host:port`.
pub fn parse_addr(addr: &str) -> Result<SocketAddr, MetricsError> {
    addr.parse().map_err(|_| MetricsError::Address(addr.to_string()))
}

fn register_metrics() {
    describe_counter!(
        "gatecheck_verifications_total",
        "Verifications completed, by answering source"
    );
    describe_counter!(
        "gatecheck_fallback_total",
        "Remote failures that sent a verification or confirmation to the local cache"
    );
    describe_counter!(
        "gatecheck_confirmations_total",
        "Mark-used confirmations, by outcome"
    );
    describe_counter!(
        "gatecheck_scans_ignored_total",
        "Scans dropped because another operation was in flight"
    );
    describe_histogram!(
        "gatecheck_remote_duration_seconds",
        "Time taken by ticket authority requests"
    );
}
