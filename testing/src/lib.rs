//! # Gatecheck Testing
//!
//! Testing utilities for gate verification.
//!
//! This crate provides:
//! - Deterministic clocks
//! - A scripted [`TicketAuthority`](gatecheck_core::TicketAuthority) double
//!   that can be switched offline and records every call
//! - Ticket and cache fixtures
//!
//! ## Example
//!
//! ```
//! use gatecheck_core::{TicketAuthority, TicketIdentifier};
//! use gatecheck_testing::{ScriptedAuthority, fixtures};
//!
//! # tokio_test::block_on(async {
//! let authority = ScriptedAuthority::new().with_ticket(fixtures::valid("T-001"));
//! let result = authority.lookup(&TicketIdentifier::new("T-001")).await.unwrap();
//! assert!(result.valid);
//! # });
//! ```

use chrono::{DateTime, Utc};
use gatecheck_core::Clock;

pub mod authority;

pub use authority::{AuthorityCall, AuthorityMode, ScriptedAuthority};

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use gatecheck_testing::mocks::FixedClock;
    /// use gatecheck_core::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Clock starting at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.lock().map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2024-07-01 10:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::fixtures::at(2024, 7, 1, 10, 0))
    }
}

/// Ticket and cache fixtures
pub mod fixtures {
    use super::{DateTime, Utc};
    use chrono::TimeZone;
    use gatecheck_core::{InMemorySlotStorage, Ticket, TicketCache, DEFAULT_SLOT};
    use std::sync::Arc;

    /// UTC timestamp at minute precision.
    ///
    /// Out-of-range components fall back to the Unix epoch.
    #[must_use]
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// A valid ticket keyed by a string id
    #[must_use]
    pub fn valid(id: &str) -> Ticket {
        Ticket::new(id).with_category("GOLD")
    }

    /// A ticket already used at `used_at`
    #[must_use]
    pub fn used(id: &str, used_at: DateTime<Utc>) -> Ticket {
        valid(id).used(used_at)
    }

    /// A cached ticket with a numeric id and a QR UUID, as the purchase app
    /// stores them
    #[must_use]
    pub fn numbered(id: i64, uuid: &str) -> Ticket {
        Ticket::new(id).with_uuid(uuid).with_category("SILVER")
    }

    /// In-memory storage whose default slot holds `tickets`.
    #[must_use]
    pub fn storage_with(tickets: &[Ticket]) -> Arc<InMemorySlotStorage> {
        let contents = serde_json::to_string(tickets).unwrap_or_else(|_| "[]".to_string());
        Arc::new(InMemorySlotStorage::with_slot(DEFAULT_SLOT, contents))
    }

    /// Cache in the default slot pre-filled with `tickets`.
    #[must_use]
    pub fn cache_with(tickets: &[Ticket]) -> TicketCache {
        TicketCache::with_default_slot(storage_with(tickets))
    }
}

/// Install a test log subscriber honoring `RUST_LOG`; repeat calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(fixtures::at(2024, 7, 1, 10, 0));
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), fixtures::at(2024, 7, 1, 10, 5));
    }

    #[test]
    fn test_cache_fixture_roundtrips() {
        let cache = fixtures::cache_with(&[fixtures::valid("T-001")]);
        assert_eq!(cache.load_all().map(|t| t.len()).unwrap_or_default(), 1);
    }
}
