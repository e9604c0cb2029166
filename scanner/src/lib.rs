//! # Gatecheck Scanner
//!
//! Gate-side ticket verification built on [`gatecheck_core`].
//!
//! A scanned QR payload is resolved to a ticket identifier and checked against
//! the remote ticket authority. When the authority cannot be reached, the
//! on-device cache of the signed-in user's tickets answers instead. Once a
//! ticket is shown valid, the operator may confirm entry, which marks the
//! ticket used through the same remote-then-cache path.
//!
//! ```text
//! scan ─▶ Resolver ─▶ VerificationEngine ─┬─▶ HttpTicketAuthority
//!                            │            └─▶ TicketCache (FileSlotStorage)
//!                            ▼
//!                       ScanReport ─▶ Presentation
//!                            │
//!                            └─ Confirmation ─▶ confirm_used ─▶ ConfirmReport
//! ```
//!
//! ## Example
//!
//! ```
//! use gatecheck_scanner::VerificationEngine;
//! use gatecheck_testing::{ScriptedAuthority, fixtures, test_clock};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! // Authority down: the cache answers
//! let engine = VerificationEngine::new(
//!     Arc::new(ScriptedAuthority::offline()),
//!     Arc::new(fixtures::cache_with(&[fixtures::valid("T-001")])),
//!     Arc::new(test_clock()),
//! );
//!
//! let report = engine.verify("T-001").await;
//! assert!(report.result().valid);
//! assert!(report.confirmation().is_some());
//! # });
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the verification engine, its phases and reports
//! - [`remote`]: HTTP client for the ticket authority
//! - [`csrf`]: anti-forgery token for mutations
//! - [`storage`]: file-backed cache slots
//! - [`presentation`]: the view model for rendering a result
//! - [`config`]: environment-driven configuration
//! - [`metrics`]: Prometheus exporter setup
//! - [`app`]: wiring for the `gatecheck` binary

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod csrf;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod presentation;
pub mod remote;
pub mod storage;

pub use app::GateApp;
pub use config::{Config, ConfigError};
pub use engine::{
    ConfirmOutcome, ConfirmReport, Confirmation, EnginePolicy, ScanPhase, ScanReport,
    VerificationEngine,
};
pub use error::GateError;
pub use presentation::Presentation;
pub use remote::HttpTicketAuthority;
pub use storage::FileSlotStorage;
