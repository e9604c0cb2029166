//! Local fallback store.
//!
//! An on-device copy of the signed-in user's tickets, kept as a JSON array in
//! a single storage slot. It is only consulted when the remote authority
//! fails, never contacts the network, and is rewritten in full after a local
//! "mark used".
//!
//! # Identifier matching
//!
//! QR codes in circulation encode the ticket UUID, the bare numeric id, or a
//! longer string embedding the id, depending on which code path generated
//! them. A cached ticket therefore matches an identifier when any of these
//! holds, checked in order:
//!
//! 1. its `ticket_uuid` equals the identifier
//! 2. its stringified `id` equals the identifier
//! 3. its `ticket_uuid` contains the identifier
//! 4. the identifier contains its stringified `id`
//!
//! The first ticket in slot order that matches wins. An empty identifier
//! never matches (rule 3 would otherwise accept every ticket).
//!
//! Entries are decoded one by one: a record this crate cannot read is
//! skipped for matching and written back untouched.

use crate::error::CacheError;
use crate::storage::SlotStorage;
use crate::types::{Ticket, TicketIdentifier, TicketStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Default slot name for the cached ticket list
pub const DEFAULT_SLOT: &str = "user_tickets";

/// Which matching rule accepted a cached ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMatch {
    /// `ticket_uuid == identifier`
    ExactUuid,
    /// `id.to_string() == identifier`
    ExactId,
    /// `ticket_uuid` contains the identifier
    UuidContainsIdentifier,
    /// The identifier contains `id.to_string()`
    IdentifierContainsId,
}

impl CacheMatch {
    /// Evaluates the four rules against one ticket.
    #[must_use]
    pub fn evaluate(ticket: &Ticket, identifier: &str) -> Option<Self> {
        if identifier.is_empty() {
            return None;
        }

        let id = ticket.id.to_string();
        let uuid = ticket.ticket_uuid.as_deref().unwrap_or_default();

        if uuid == identifier {
            Some(Self::ExactUuid)
        } else if id == identifier {
            Some(Self::ExactId)
        } else if uuid.contains(identifier) {
            Some(Self::UuidContainsIdentifier)
        } else if identifier.contains(id.as_str()) {
            Some(Self::IdentifierContainsId)
        } else {
            None
        }
    }
}

/// The on-device ticket cache.
///
/// Every operation takes an internal lock, so a `mark_used` read-modify-write
/// never interleaves with another cache operation in the same process.
pub struct TicketCache {
    storage: Arc<dyn SlotStorage>,
    slot: String,
    lock: Mutex<()>,
}

impl TicketCache {
    /// Cache stored in `slot` of `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn SlotStorage>, slot: impl Into<String>) -> Self {
        Self {
            storage,
            slot: slot.into(),
            lock: Mutex::new(()),
        }
    }

    /// Cache stored in the default `user_tickets` slot.
    #[must_use]
    pub fn with_default_slot(storage: Arc<dyn SlotStorage>) -> Self {
        Self::new(storage, DEFAULT_SLOT)
    }

    /// Slot name
    #[must_use]
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// All cached tickets in slot order. A never-written slot is empty.
    ///
    /// Entries that do not decode as tickets are skipped.
    ///
    /// # Errors
    ///
    /// Storage failures, or [`CacheError::Corrupt`] if the slot does not hold
    /// a JSON array.
    pub fn load_all(&self) -> Result<Vec<Ticket>, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        let entries = self.read()?;
        Ok(Self::decode(&entries).into_iter().map(|(_, ticket)| ticket).collect())
    }

    /// Finds the first cached ticket matching `identifier`.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if nothing matches, or a storage/corruption
    /// error if the slot cannot be read.
    pub fn find_by_identifier(&self, identifier: &TicketIdentifier) -> Result<Ticket, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        let entries = self.read()?;

        Self::decode(&entries)
            .into_iter()
            .find(|(_, ticket)| CacheMatch::evaluate(ticket, identifier.as_str()).is_some())
            .map(|(_, ticket)| ticket)
            .ok_or_else(|| CacheError::NotFound {
                identifier: identifier.to_string(),
            })
    }

    /// Marks the matching cached ticket used at `at` and rewrites the slot.
    ///
    /// A ticket that is already used keeps its original timestamp and the
    /// slot is left untouched.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if nothing matches, or a storage/corruption
    /// error.
    pub fn mark_used(
        &self,
        identifier: &TicketIdentifier,
        at: DateTime<Utc>,
    ) -> Result<Ticket, CacheError> {
        self.mark_first(identifier.as_str(), at, |ticket| {
            CacheMatch::evaluate(ticket, identifier.as_str()).is_some()
        })
    }

    /// Marks used the cached ticket whose `id` or `ticket_uuid` equals one of
    /// `keys`. None of the loose matching rules apply.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if no ticket carries any of the keys, or a
    /// storage/corruption error.
    pub fn mark_used_exact(&self, keys: &[String], at: DateTime<Utc>) -> Result<Ticket, CacheError> {
        let label = keys.join(",");
        self.mark_first(&label, at, |ticket| {
            let id = ticket.id.to_string();
            keys.iter().any(|key| {
                !key.is_empty() && (*key == id || ticket.ticket_uuid.as_deref() == Some(key.as_str()))
            })
        })
    }

    /// Replaces the whole cache.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn replace_all(&self, tickets: &[Ticket]) -> Result<(), CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        self.write(&Self::encode_all(tickets)?)
    }

    /// Replaces the cache with a fresh snapshot from the authority, keeping
    /// local `USED` marks the snapshot has not caught up with.
    ///
    /// Returns how many tickets are cached afterwards.
    ///
    /// # Errors
    ///
    /// Storage failures. A corrupt slot is overwritten rather than reported.
    pub fn merge_snapshot(&self, fresh: Vec<Ticket>) -> Result<usize, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;

        let local_uses: HashMap<String, Option<DateTime<Utc>>> = match self.read() {
            Ok(entries) => Self::decode(&entries)
                .into_iter()
                .map(|(_, ticket)| ticket)
                .filter(Ticket::is_used)
                .map(|t| (t.id.to_string(), t.used_at))
                .collect(),
            Err(CacheError::Corrupt(reason)) => {
                debug!(reason = %reason, "Discarding corrupt cache slot during refresh");
                HashMap::new()
            },
            Err(e) => return Err(e),
        };

        let merged: Vec<Ticket> = fresh
            .into_iter()
            .map(|mut ticket| {
                if let Some(used_at) = local_uses.get(&ticket.id.to_string()) {
                    if ticket.status == TicketStatus::Valid {
                        ticket.status = TicketStatus::Used;
                        ticket.used_at = *used_at;
                    }
                }
                ticket
            })
            .collect();

        self.write(&Self::encode_all(&merged)?)?;
        Ok(merged.len())
    }

    /// Marks the first decodable ticket accepted by `matches`, rewriting only
    /// that entry. Undecodable entries are written back verbatim.
    fn mark_first(
        &self,
        identifier: &str,
        at: DateTime<Utc>,
        matches: impl Fn(&Ticket) -> bool,
    ) -> Result<Ticket, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        let mut entries = self.read()?;

        let Some((index, mut ticket)) =
            Self::decode(&entries).into_iter().find(|(_, ticket)| matches(ticket))
        else {
            return Err(CacheError::NotFound {
                identifier: identifier.to_string(),
            });
        };

        if ticket.mark_used(at) {
            entries[index] =
                serde_json::to_value(&ticket).map_err(|e| CacheError::Storage(e.to_string()))?;
            self.write(&entries)?;
            debug!(
                identifier = %identifier,
                ticket_id = %ticket.id,
                "Marked ticket used in local cache"
            );
        }

        Ok(ticket)
    }

    fn read(&self) -> Result<Vec<Value>, CacheError> {
        match self.storage.load(&self.slot)? {
            Some(contents) => Ok(serde_json::from_str(&contents)?),
            None => Ok(Vec::new()),
        }
    }

    /// Decodes each entry on its own, keeping its slot index.
    fn decode(entries: &[Value]) -> Vec<(usize, Ticket)> {
        entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match Ticket::deserialize(entry) {
                Ok(ticket) => Some((index, ticket)),
                Err(e) => {
                    warn!(index, error = %e, "Skipping undecodable cache entry");
                    None
                },
            })
            .collect()
    }

    fn encode_all(tickets: &[Ticket]) -> Result<Vec<Value>, CacheError> {
        tickets
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()
            .map_err(|e| CacheError::Storage(e.to_string()))
    }

    fn write(&self, entries: &[Value]) -> Result<(), CacheError> {
        let contents =
            serde_json::to_string(entries).map_err(|e| CacheError::Storage(e.to_string()))?;
        self.storage.store(&self.slot, &contents)
    }
}

impl std::fmt::Debug for TicketCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketCache").field("slot", &self.slot).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use crate::storage::InMemorySlotStorage;
    use proptest::prelude::*;
    use serde_json::json;

    const UUID: &str = "abcd1234-5e6f-4a7b-8c9d-0e1f2a3b4c5d";

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn cache_with(value: serde_json::Value) -> TicketCache {
        let storage = InMemorySlotStorage::with_slot(DEFAULT_SLOT, value.to_string());
        TicketCache::with_default_slot(Arc::new(storage))
    }

    fn id(s: &str) -> TicketIdentifier {
        TicketIdentifier::new(s)
    }

    #[test]
    fn test_match_rules_in_order() {
        let ticket = Ticket::new(57).with_uuid(UUID);

        assert_eq!(CacheMatch::evaluate(&ticket, UUID), Some(CacheMatch::ExactUuid));
        assert_eq!(CacheMatch::evaluate(&ticket, "57"), Some(CacheMatch::ExactId));
        assert_eq!(
            CacheMatch::evaluate(&ticket, "abcd1234"),
            Some(CacheMatch::UuidContainsIdentifier)
        );
        assert_eq!(
            CacheMatch::evaluate(&ticket, "TICKET-57-PARIS"),
            Some(CacheMatch::IdentifierContainsId)
        );
        assert_eq!(CacheMatch::evaluate(&ticket, "zzz"), None);
        assert_eq!(CacheMatch::evaluate(&ticket, ""), None);
    }

    #[test]
    fn test_ticket_without_uuid_matches_on_id_only() {
        let ticket = Ticket::new("T-002");
        assert_eq!(CacheMatch::evaluate(&ticket, "T-002"), Some(CacheMatch::ExactId));
        assert_eq!(CacheMatch::evaluate(&ticket, "T-00"), None);
    }

    #[test]
    fn test_find_full_uuid_bare_id_and_embedding_string() {
        let cache = cache_with(json!([
            {"id": "X-3", "ticket_uuid": "ffff0000-aaaa", "status": "VALID"},
            {"id": 57, "ticket_uuid": UUID, "status": "VALID"}
        ]));

        for query in [UUID, "57", "scan:57:end"] {
            let ticket = cache.find_by_identifier(&id(query)).unwrap();
            assert_eq!(ticket.id, crate::TicketKey::Number(57), "query {query}");
        }
    }

    #[test]
    fn test_first_match_in_slot_order_wins() {
        // "1" is contained in "100", so the first entry shadows the second
        let cache = cache_with(json!([
            {"id": 1, "status": "VALID"},
            {"id": 100, "status": "USED", "used_at": "2024-07-01T10:00:00Z"}
        ]));

        let ticket = cache.find_by_identifier(&id("100")).unwrap();
        assert_eq!(ticket.id, crate::TicketKey::Number(1));
    }

    #[test]
    fn test_missing_slot_is_empty() {
        let cache = TicketCache::with_default_slot(Arc::new(InMemorySlotStorage::new()));
        assert!(cache.load_all().unwrap().is_empty());
        let err = cache.find_by_identifier(&id("T-001")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_corrupt_slot_is_reported() {
        let storage = InMemorySlotStorage::with_slot(DEFAULT_SLOT, "{not a list");
        let cache = TicketCache::with_default_slot(Arc::new(storage));
        assert!(matches!(cache.find_by_identifier(&id("1")), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn test_mark_used_rewrites_slot() {
        let storage = Arc::new(InMemorySlotStorage::with_slot(
            DEFAULT_SLOT,
            json!([{"id": "T-001", "status": "VALID", "seat": "A1"}]).to_string(),
        ));
        let cache = TicketCache::with_default_slot(storage.clone());
        let now = at("2024-07-01T10:00:00Z");

        let ticket = cache.mark_used(&id("T-001"), now).unwrap();
        assert_eq!(ticket.status, TicketStatus::Used);
        assert_eq!(ticket.used_at, Some(now));

        let raw: serde_json::Value =
            serde_json::from_str(&storage.load(DEFAULT_SLOT).unwrap().unwrap()).unwrap();
        assert_eq!(raw[0]["status"], json!("USED"));
        assert_eq!(raw[0]["seat"], json!("A1"));
        assert!(raw[0]["used_at"].is_string());
    }

    #[test]
    fn test_mark_used_twice_keeps_first_timestamp() {
        let cache = cache_with(json!([{"id": "T-001", "status": "VALID"}]));
        let first = at("2024-07-01T10:00:00Z");

        cache.mark_used(&id("T-001"), first).unwrap();
        let again = cache.mark_used(&id("T-001"), at("2024-07-01T11:00:00Z")).unwrap();

        assert_eq!(again.status, TicketStatus::Used);
        assert_eq!(again.used_at, Some(first));
    }

    #[test]
    fn test_mark_used_unknown_identifier() {
        let cache = cache_with(json!([{"id": "T-001", "status": "VALID"}]));
        let err = cache.mark_used(&id("X-9"), Utc::now()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_merge_snapshot_never_revives_used_tickets() {
        let used_at = at("2024-07-01T10:00:00Z");
        let cache = cache_with(json!([
            {"id": 1, "status": "USED", "used_at": "2024-07-01T10:00:00Z"},
            {"id": 2, "status": "VALID"}
        ]));

        let fresh = vec![Ticket::new(1_i64), Ticket::new(2_i64), Ticket::new(3_i64)];
        assert_eq!(cache.merge_snapshot(fresh).unwrap(), 3);

        let tickets = cache.load_all().unwrap();
        assert_eq!(tickets[0].status, TicketStatus::Used);
        assert_eq!(tickets[0].used_at, Some(used_at));
        assert_eq!(tickets[1].status, TicketStatus::Valid);
        assert_eq!(tickets[2].id, crate::TicketKey::Number(3));
    }

    #[test]
    fn test_merge_snapshot_overwrites_corrupt_slot() {
        let storage = InMemorySlotStorage::with_slot(DEFAULT_SLOT, "garbage");
        let cache = TicketCache::with_default_slot(Arc::new(storage));
        assert_eq!(cache.merge_snapshot(vec![Ticket::new(5_i64)]).unwrap(), 1);
        assert_eq!(cache.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_undecodable_entry_does_not_hide_the_rest() {
        let storage = Arc::new(InMemorySlotStorage::with_slot(
            DEFAULT_SLOT,
            json!([
                {"id": "T-001", "status": "VALID"},
                {"id": "T-002", "status": "USED", "used_at": "2024-07-01 10:00"}
            ])
            .to_string(),
        ));
        let cache = TicketCache::with_default_slot(storage.clone());

        assert_eq!(cache.load_all().unwrap().len(), 1);
        assert!(cache.find_by_identifier(&id("T-002")).unwrap_err().is_not_found());

        let ticket = cache.mark_used(&id("T-001"), at("2024-07-01T10:05:00Z")).unwrap();
        assert!(ticket.is_used());

        let raw: serde_json::Value =
            serde_json::from_str(&storage.load(DEFAULT_SLOT).unwrap().unwrap()).unwrap();
        assert_eq!(raw[0]["status"], json!("USED"));
        assert_eq!(
            raw[1],
            json!({"id": "T-002", "status": "USED", "used_at": "2024-07-01 10:00"})
        );
    }

    #[test]
    fn test_mark_used_exact_ignores_loose_matches() {
        let cache = cache_with(json!([
            {"id": 1, "status": "VALID"},
            {"id": "T-100", "status": "VALID"},
            {"id": 100, "ticket_uuid": UUID, "status": "VALID"}
        ]));
        let now = at("2024-07-01T10:00:00Z");

        let ticket = cache.mark_used_exact(&["T-100".to_string()], now).unwrap();
        assert_eq!(ticket.id, crate::TicketKey::from("T-100"));

        let ticket = cache.mark_used_exact(&[UUID.to_string()], now).unwrap();
        assert_eq!(ticket.id, crate::TicketKey::Number(100));

        let tickets = cache.load_all().unwrap();
        assert_eq!(tickets[0].status, TicketStatus::Valid);
        assert_eq!(tickets[1].status, TicketStatus::Used);
        assert_eq!(tickets[2].status, TicketStatus::Used);
    }

    #[test]
    fn test_mark_used_exact_without_a_carrier_is_not_found() {
        let cache = cache_with(json!([{"id": 100, "status": "VALID"}]));
        let now = at("2024-07-01T10:00:00Z");

        // "10" and "" would match loosely, never exactly
        for keys in [vec!["10".to_string()], vec![String::new()], Vec::new()] {
            assert!(cache.mark_used_exact(&keys, now).unwrap_err().is_not_found());
        }
        assert_eq!(cache.load_all().unwrap()[0].status, TicketStatus::Valid);
    }

    #[test]
    fn test_merge_snapshot_keeps_use_only_on_the_same_id() {
        let used_at = at("2024-07-01T09:30:00Z");
        let cache = cache_with(json!([
            {"id": 100, "status": "USED", "used_at": "2024-07-01T09:30:00Z"},
            {"id": 1, "status": "VALID"},
            {"id": "T-100", "status": "VALID"}
        ]));

        let fresh = vec![
            Ticket::new(1_i64),
            Ticket::new("T-100"),
            Ticket::new(100_i64),
            Ticket::new(1000_i64),
        ];
        assert_eq!(cache.merge_snapshot(fresh).unwrap(), 4);

        let tickets = cache.load_all().unwrap();
        let status_of = |key: crate::TicketKey| {
            tickets.iter().find(|t| t.id == key).map(|t| (t.status, t.used_at)).unwrap()
        };
        assert_eq!(status_of(crate::TicketKey::Number(100)), (TicketStatus::Used, Some(used_at)));
        assert_eq!(status_of(crate::TicketKey::Number(1)), (TicketStatus::Valid, None));
        assert_eq!(status_of(crate::TicketKey::from("T-100")), (TicketStatus::Valid, None));
        assert_eq!(status_of(crate::TicketKey::Number(1000)), (TicketStatus::Valid, None));
    }

    proptest! {
        #[test]
        fn prop_numeric_id_found_inside_any_scan(n in 1_000i64..1_000_000, prefix in "[A-Z]{0,5}", suffix in "[a-z]{0,5}") {
            let ticket = Ticket::new(n).with_uuid(UUID);
            let scanned = format!("{prefix}{n}{suffix}");
            prop_assert!(CacheMatch::evaluate(&ticket, &scanned).is_some());
        }

        #[test]
        fn prop_any_uuid_substring_matches(start in 0usize..36, len in 1usize..36) {
            let end = (start + len).min(UUID.len());
            prop_assume!(start < end);
            let ticket = Ticket::new(-1_i64).with_uuid(UUID);
            prop_assert!(CacheMatch::evaluate(&ticket, &UUID[start..end]).is_some());
        }
    }
}
