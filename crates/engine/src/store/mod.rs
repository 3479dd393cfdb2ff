// Patch store: the active scope's desired-state list, one patch per key.

pub mod kv;
pub mod persist;
pub mod sqlite_kv;

use anyhow::{Context, Result};
use chrono::Utc;
use pagepatch_common::scope::PageScope;
use pagepatch_common::types::{storage_key, Patch, PatchKey, StoredPatchSet};
use tracing::{debug, warn};

pub use kv::{KeyValueStore, MemoryKv};
pub use persist::{PersistScheduler, PersistState};
pub use sqlite_kv::SqliteKv;

/// What an upsert did.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted,
    /// An entry with the same key existed; it now carries the new fields
    /// under its original id and creation time. `previous` is the entry as
    /// it was.
    Replaced { previous: Patch },
}

/// Patches for one scope, in insertion order.
#[derive(Debug, Clone)]
pub struct PatchStore {
    scope: PageScope,
    patches: Vec<Patch>,
}

impl PatchStore {
    pub fn new(scope: PageScope) -> Self {
        Self { scope, patches: Vec::new() }
    }

    /// Load the stored set for `scope`. A missing key is an empty set; an
    /// unreadable record is logged and treated as empty.
    pub fn load(kv: &dyn KeyValueStore, scope: PageScope) -> Result<Self> {
        let key = storage_key(&scope.key);
        let raw = kv.get(&key).with_context(|| format!("failed to load patch set `{key}`"))?;
        let patches = match raw {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<StoredPatchSet>(&raw) {
                Ok(stored) => stored.patches,
                Err(e) => {
                    warn!(key = %key, error = %e, "stored patch set is unreadable; starting empty");
                    Vec::new()
                }
            },
        };
        let mut store = Self::new(scope);
        store.replace_all(patches);
        debug!(scope = %store.scope.key, patches = store.len(), "loaded patch set");
        Ok(store)
    }

    /// Write the current set under the scope's storage key.
    pub fn persist(&self, kv: &mut dyn KeyValueStore) -> Result<()> {
        let record = StoredPatchSet {
            saved_at: Utc::now(),
            scope: self.scope.granularity,
            scope_key: self.scope.key.clone(),
            patches: self.patches.clone(),
        };
        let json = serde_json::to_string(&record).context("failed to serialize patch set")?;
        let key = self.storage_key();
        kv.set(&key, &json).with_context(|| format!("failed to save patch set `{key}`"))?;
        debug!(scope = %self.scope.key, patches = self.len(), "saved patch set");
        Ok(())
    }

    /// Remove the scope's storage key and empty the set.
    pub fn clear_persisted(&mut self, kv: &mut dyn KeyValueStore) -> Result<()> {
        let key = self.storage_key();
        kv.remove(&key).with_context(|| format!("failed to remove patch set `{key}`"))?;
        self.patches.clear();
        Ok(())
    }

    pub fn scope(&self) -> &PageScope {
        &self.scope
    }

    pub fn storage_key(&self) -> String {
        storage_key(&self.scope.key)
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Patch> {
        self.patches.iter().find(|p| p.id == id)
    }

    pub fn find_by_key(&self, key: &PatchKey) -> Option<&Patch> {
        self.patches.iter().find(|p| &p.key() == key)
    }

    /// Insert, or overwrite the entry with the same key keeping its id.
    pub fn upsert(&mut self, patch: Patch) -> UpsertOutcome {
        let key = patch.key();
        match self.patches.iter_mut().find(|p| p.key() == key) {
            Some(existing) => {
                let previous = existing.clone();
                *existing = Patch { id: previous.id.clone(), created_at: previous.created_at, ..patch };
                UpsertOutcome::Replaced { previous }
            }
            None => {
                self.patches.push(patch);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Put back an exact earlier entry (id included), replacing whatever
    /// currently holds its key.
    pub fn restore(&mut self, patch: Patch) {
        let key = patch.key();
        match self.patches.iter_mut().find(|p| p.key() == key) {
            Some(existing) => *existing = patch,
            None => self.patches.push(patch),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Patch> {
        let pos = self.patches.iter().position(|p| p.id == id)?;
        Some(self.patches.remove(pos))
    }

    pub fn remove_key(&mut self, key: &PatchKey) -> Option<Patch> {
        let pos = self.patches.iter().position(|p| &p.key() == key)?;
        Some(self.patches.remove(pos))
    }

    /// Replace the whole set. Entries sharing a key collapse into one, the
    /// later entry's fields under the earlier entry's id.
    pub fn replace_all(&mut self, patches: Vec<Patch>) {
        self.patches.clear();
        for patch in patches {
            self.upsert(patch);
        }
    }

    pub fn clear(&mut self) {
        self.patches.clear();
    }
}
