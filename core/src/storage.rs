//! Named-slot persistence for the local cache.
//!
//! A slot holds one string value (the cache keeps a JSON array of tickets in
//! it). The file-backed implementation lives in `gatecheck-scanner`.

use crate::error::CacheError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Key/value storage addressed by slot name.
pub trait SlotStorage: Send + Sync {
    /// Read a slot; `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] when the backing store fails.
    fn load(&self, slot: &str) -> Result<Option<String>, CacheError>;

    /// Replace a slot's contents.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] when the backing store fails.
    fn store(&self, slot: &str, contents: &str) -> Result<(), CacheError>;
}

/// Process-local slot storage, for ephemeral devices and tests.
#[derive(Debug, Default)]
pub struct InMemorySlotStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl InMemorySlotStorage {
    /// Empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage with one slot pre-filled.
    #[must_use]
    pub fn with_slot(slot: impl Into<String>, contents: impl Into<String>) -> Self {
        let mut slots = HashMap::new();
        slots.insert(slot.into(), contents.into());
        Self {
            slots: Mutex::new(slots),
        }
    }
}

impl SlotStorage for InMemorySlotStorage {
    fn load(&self, slot: &str) -> Result<Option<String>, CacheError> {
        let slots = self.slots.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(slots.get(slot).cloned())
    }

    fn store(&self, slot: &str, contents: &str) -> Result<(), CacheError> {
        let mut slots = self.slots.lock().map_err(|_| CacheError::Poisoned)?;
        slots.insert(slot.to_string(), contents.to_string());
        Ok(())
    }
}
