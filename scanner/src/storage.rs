//! File-backed slot storage.
//!
//! Each slot is one `<slot>.json` file in a directory. Writes go to a
//! temporary file that is renamed over the slot, so a crash mid-write leaves
//! the previous contents intact.

use gatecheck_core::{CacheError, SlotStorage};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Slot storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileSlotStorage {
    dir: PathBuf,
}

impl FileSlotStorage {
    /// Storage in `dir`, created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a slot's file.
    ///
    /// # Errors
    ///
    /// Rejects slot names that would escape the directory.
    pub fn slot_path(&self, slot: &str) -> Result<PathBuf, CacheError> {
        if slot.is_empty() || slot.contains(['/', '\\']) || slot.starts_with('.') {
            return Err(CacheError::Storage(format!("invalid slot name '{slot}'")));
        }
        Ok(self.dir.join(format!("{slot}.json")))
    }
}

impl SlotStorage for FileSlotStorage {
    fn load(&self, slot: &str) -> Result<Option<String>, CacheError> {
        match fs::read_to_string(self.slot_path(slot)?) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, slot: &str, contents: &str) -> Result<(), CacheError> {
        let path = self.slot_path(slot)?;
        fs::create_dir_all(&self.dir)?;

        let tmp = path.with_extension("json.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
