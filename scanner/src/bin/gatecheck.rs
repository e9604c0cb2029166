//! Gate scanner terminal.
//!
//! Reads one scan per line on stdin and prints the verdict. A scan is the raw
//! text decoded from a QR code, or a JSON payload (`"..."` or `{"data": "..."}`).
//!
//! Commands:
//!
//! - `:confirm` marks the last valid ticket as used
//! - `:cancel` dismisses it
//! - `:sync` refreshes the offline cache from the ticket authority
//! - `:quit` exits
//!
//! # Usage
//!
//! ```bash
//! GATECHECK_API_BASE_URL=http://127.0.0.1:8000/api cargo run --bin gatecheck
//! ```

use gatecheck_core::ScanPayload;
use gatecheck_scanner::metrics::{install_exporter, parse_addr};
use gatecheck_scanner::{Config, Confirmation, GateApp, VerificationEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    // Logs go to stderr; stdout carries the verdicts
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.observability.log_level)
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(
        authority = %config.remote.base_url,
        cache_dir = %config.cache.dir.display(),
        strict_uuid = config.verification.strict_uuid,
        "Configuration loaded"
    );

    if let Some(addr) = &config.observability.metrics_addr {
        install_exporter(parse_addr(addr)?)?;
    }

    let app = GateApp::new(config)?;
    let engine = app.engine();
    tracing::info!("Gate scanner ready, waiting for scans");

    tokio::select! {
        result = run(&engine) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    tracing::info!("Shutting down");
    Ok(())
}

async fn run(engine: &VerificationEngine) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<Confirmation> = None;

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {},
            ":quit" | ":q" => break,
            ":confirm" => {
                let Some(confirmation) = pending.take() else {
                    println!("Nothing to confirm: scan a valid ticket first.");
                    continue;
                };
                let report = engine.confirm_used(confirmation).await;
                println!("{}", report.message());
                println!("{}", report.presentation());
            },
            ":cancel" => {
                if pending.take().is_some() {
                    println!("Dismissed.");
                }
            },
            ":sync" => match engine.refresh_cache().await {
                Ok(count) => println!("Offline cache holds {count} tickets."),
                Err(e) => {
                    tracing::warn!(error = %e, "Cache refresh failed");
                    println!("Sync failed: {e}");
                },
            },
            scan => {
                let report = engine.verify(ScanPayload::from_input(scan)).await;
                println!("{}", report.presentation());

                pending = report.confirmation();
                if pending.is_some() {
                    println!("  :confirm to mark as used, :cancel to dismiss");
                }
            },
        }
    }

    Ok(())
}
