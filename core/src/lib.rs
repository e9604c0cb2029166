//! # Gatecheck Core
//!
//! Domain types and injected capabilities for verifying match tickets at the
//! venue gate.
//!
//! This crate owns everything that does not touch the network:
//!
//! - **Types**: [`Ticket`], [`TicketIdentifier`], [`VerificationResult`] and the
//!   tagged [`VerificationOutcome`] that records which source answered
//! - **Resolver**: turns decoded QR scanner output into a canonical identifier
//! - **Cache**: the on-device fallback store used when the ticket authority is
//!   unreachable
//! - **Environment**: the traits the verification engine is built against
//!   (`Clock`, `TicketAuthority`, `SlotStorage`)
//!
//! ## Data flow
//!
//! ```text
//! raw scan ─▶ resolver ─▶ engine ─┬─▶ TicketAuthority (remote, authoritative)
//!                                 └─▶ TicketCache     (local, only on failure)
//!                                          │
//!                                          ▼
//!                                 VerificationOutcome ─▶ presenter
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authority;
pub mod cache;
pub mod environment;
pub mod error;
pub mod resolver;
pub mod storage;
pub mod types;

pub use authority::{AuthorityFuture, TicketAuthority};
pub use cache::{CacheMatch, DEFAULT_SLOT, TicketCache};
pub use environment::{Clock, SystemClock};
pub use error::{CacheError, RemoteError, ResolveError};
pub use resolver::{Resolver, ScanPayload};
pub use storage::{InMemorySlotStorage, SlotStorage};
pub use types::*;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
