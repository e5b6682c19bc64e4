//! The environment registry seen by the release controller.

use tracing::info;

use switchyard_core::Slot;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::{ReleaseEvent, ReleaseRecord};

/// Single source of truth for which slot receives traffic.
///
/// Injected into the release controller so tests can substitute a
/// failing or in-memory registry.
pub trait SlotRegistry: Send + Sync {
    /// The recorded live slot; `None` before the first promotion.
    fn lookup(&self) -> StateResult<Option<Slot>>;

    /// Slot treated as live before the first promotion.
    fn default_slot(&self) -> Slot;

    /// The live slot, or the configured default before the first promotion.
    fn current(&self) -> StateResult<Slot> {
        Ok(self.lookup()?.unwrap_or(self.default_slot()))
    }

    /// Atomically overwrite the live slot.
    fn set_current(&self, slot: Slot) -> StateResult<()>;

    /// Record a successful release and make its slot live, atomically.
    fn promote(&self, release: &ReleaseRecord) -> StateResult<()>;

    /// Last successful release on `slot`.
    fn release_for(&self, slot: Slot) -> StateResult<Option<ReleaseRecord>>;

    /// Append a non-promotion event to the history.
    fn record_event(&self, event: ReleaseEvent) -> StateResult<()>;

    /// Most recent history entries, newest first.
    fn history(&self, limit: usize) -> StateResult<Vec<ReleaseEvent>>;
}

/// [`SlotRegistry`] over a redb [`StateStore`].
#[derive(Clone)]
pub struct EnvironmentRegistry {
    store: StateStore,
    default_slot: Slot,
}

impl EnvironmentRegistry {
    pub fn new(store: StateStore, default_slot: Slot) -> Self {
        Self {
            store,
            default_slot,
        }
    }

    /// Whether a slot has ever been promoted.
    pub fn is_initialized(&self) -> StateResult<bool> {
        Ok(self.lookup()?.is_some())
    }
}

impl SlotRegistry for EnvironmentRegistry {
    fn lookup(&self) -> StateResult<Option<Slot>> {
        self.store.current_slot()
    }

    fn default_slot(&self) -> Slot {
        self.default_slot
    }

    fn set_current(&self, slot: Slot) -> StateResult<()> {
        self.store.put_current_slot(slot)
    }

    fn promote(&self, release: &ReleaseRecord) -> StateResult<()> {
        let seq = self.store.promote(release)?;
        info!(slot = %release.slot, version = %release.version, seq, "registry now points at slot");
        Ok(())
    }

    fn release_for(&self, slot: Slot) -> StateResult<Option<ReleaseRecord>> {
        self.store.get_release(slot)
    }

    fn record_event(&self, event: ReleaseEvent) -> StateResult<()> {
        self.store.append_event(event).map(|_| ())
    }

    fn history(&self, limit: usize) -> StateResult<Vec<ReleaseEvent>> {
        self.store.list_history(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use switchyard_core::ReleaseVersion;

    fn registry(default_slot: Slot) -> EnvironmentRegistry {
        EnvironmentRegistry::new(StateStore::open_in_memory().unwrap(), default_slot)
    }

    #[test]
    fn current_defaults_before_first_promotion() {
        let reg = registry(Slot::Green);
        assert_eq!(reg.current().unwrap(), Slot::Green);
        assert_eq!(reg.lookup().unwrap(), None);
        assert!(!reg.is_initialized().unwrap());
    }

    #[test]
    fn set_current_overrides_default() {
        let reg = registry(Slot::Blue);
        reg.set_current(Slot::Green).unwrap();
        assert_eq!(reg.current().unwrap(), Slot::Green);
        assert!(reg.is_initialized().unwrap());
    }

    #[test]
    fn promote_is_visible_through_registry() {
        let reg = registry(Slot::Blue);
        let release = ReleaseRecord {
            slot: Slot::Green,
            version: ReleaseVersion::parse("v2").unwrap(),
            promoted_at: 42,
        };
        reg.promote(&release).unwrap();
        assert_eq!(reg.current().unwrap(), Slot::Green);
        assert_eq!(reg.release_for(Slot::Green).unwrap(), Some(release));
        assert_eq!(reg.history(10).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_record_is_not_replaced_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        {
            let db = redb::Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn.open_table(crate::tables::REGISTRY).unwrap();
                table
                    .insert(crate::tables::CURRENT_KEY, b"both".as_slice())
                    .unwrap();
            }
            txn.commit().unwrap();
        }
        let reg = EnvironmentRegistry::new(StateStore::open(&path).unwrap(), Slot::Blue);
        assert!(matches!(reg.current(), Err(StateError::RegistryCorrupt(_))));
    }
}
