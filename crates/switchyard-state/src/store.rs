//! StateStore — redb-backed persistence for the environment registry.
//!
//! Holds the current slot, the last successful release of each slot and
//! the release history. Values other than the current slot are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::debug;

use switchyard_core::Slot;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// History entries kept; older ones are pruned on append.
pub const HISTORY_RETENTION: u64 = 1000;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    retention: u64,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// redb holds an exclusive file lock while open, so a second process
    /// gets [`StateError::Locked`].
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => StateError::Locked {
                path: path.to_path_buf(),
                holder: "another switchyard process".to_string(),
            },
            other => StateError::Open(other.to_string()),
        })?;
        let store = Self {
            db: Arc::new(db),
            retention: HISTORY_RETENTION,
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            retention: HISTORY_RETENTION,
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Keep at most `entries` history events (at least one).
    pub fn with_history_retention(mut self, entries: u64) -> Self {
        self.retention = entries.max(1);
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(REGISTRY).map_err(map_err!(Table))?;
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Current slot ───────────────────────────────────────────────

    /// The stored current slot, or `None` before the first promotion.
    ///
    /// Anything other than a valid slot identifier is `RegistryCorrupt`.
    pub fn current_slot(&self) -> StateResult<Option<Slot>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REGISTRY).map_err(map_err!(Table))?;
        match table.get(CURRENT_KEY).map_err(map_err!(Read))? {
            Some(guard) => decode_slot(guard.value()).map(Some),
            None => Ok(None),
        }
    }

    /// Overwrite the current slot.
    pub fn put_current_slot(&self, slot: Slot) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        write_current(&txn, slot)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%slot, "current slot stored");
        Ok(())
    }

    /// Promote a release: current slot, the slot's release record and a
    /// `Promoted` history entry are committed together.
    ///
    /// Returns the history sequence number of the promotion.
    pub fn promote(&self, release: &ReleaseRecord) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        write_current(&txn, release.slot)?;
        {
            let value = serde_json::to_vec(release).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            table
                .insert(release.slot.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        let event = ReleaseEvent::new(
            release.slot,
            release.version.clone(),
            ReleaseOutcome::Promoted,
            None,
            release.promoted_at,
        );
        let seq = write_event(&txn, event, self.retention)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(slot = %release.slot, version = %release.version, seq, "release promoted");
        Ok(seq)
    }

    // ── Releases ───────────────────────────────────────────────────

    /// The last successful release on `slot`.
    pub fn get_release(&self, slot: Slot) -> StateResult<Option<ReleaseRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        match table.get(slot.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: ReleaseRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    // ── History ────────────────────────────────────────────────────

    /// Append a history entry. Returns its sequence number.
    pub fn append_event(&self, event: ReleaseEvent) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq = write_event(&txn, event, self.retention)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    /// Most recent history entries, newest first.
    pub fn list_history(&self, limit: usize) -> StateResult<Vec<ReleaseEvent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ReleaseEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(event);
        }
        Ok(results)
    }
}

fn write_current(txn: &WriteTransaction, slot: Slot) -> StateResult<()> {
    let mut table = txn.open_table(REGISTRY).map_err(map_err!(Table))?;
    table
        .insert(CURRENT_KEY, slot.as_str().as_bytes())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn write_event(
    txn: &WriteTransaction,
    mut event: ReleaseEvent,
    retention: u64,
) -> StateResult<u64> {
    let mut table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
    let seq = match table.last().map_err(map_err!(Read))? {
        Some((key, _)) => key.value() + 1,
        None => 1,
    };
    event.seq = seq;
    let value = serde_json::to_vec(&event).map_err(map_err!(Serialize))?;
    table.insert(seq, value.as_slice()).map_err(map_err!(Write))?;

    // Sequence numbers keep counting; only the oldest rows go.
    loop {
        let oldest = match table.first().map_err(map_err!(Read))? {
            Some((key, _)) => key.value(),
            None => break,
        };
        if seq - oldest < retention {
            break;
        }
        table.remove(oldest).map_err(map_err!(Write))?;
    }
    Ok(seq)
}

fn decode_slot(raw: &[u8]) -> StateResult<Slot> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<Slot>().ok())
        .ok_or_else(|| StateError::RegistryCorrupt(String::from_utf8_lossy(raw).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ReleaseVersion;

    fn release(slot: Slot, version: &str, at: u64) -> ReleaseRecord {
        ReleaseRecord {
            slot,
            version: ReleaseVersion::parse(version).unwrap(),
            promoted_at: at,
        }
    }

    fn write_raw_current(store: &StateStore, raw: &[u8]) {
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(REGISTRY).unwrap();
            table.insert(CURRENT_KEY, raw).unwrap();
        }
        txn.commit().unwrap();
    }

    // ── Current slot ───────────────────────────────────────────────

    #[test]
    fn fresh_store_has_no_current_slot() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.current_slot().unwrap(), None);
    }

    #[test]
    fn current_slot_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_current_slot(Slot::Green).unwrap();
        assert_eq!(store.current_slot().unwrap(), Some(Slot::Green));
        store.put_current_slot(Slot::Blue).unwrap();
        assert_eq!(store.current_slot().unwrap(), Some(Slot::Blue));
    }

    #[test]
    fn invalid_current_slot_is_corrupt() {
        let store = StateStore::open_in_memory().unwrap();
        write_raw_current(&store, b"purple");
        match store.current_slot() {
            Err(StateError::RegistryCorrupt(value)) => assert_eq!(value, "purple"),
            other => panic!("expected RegistryCorrupt, got {other:?}"),
        }

        write_raw_current(&store, &[0xff, 0xfe]);
        assert!(matches!(
            store.current_slot(),
            Err(StateError::RegistryCorrupt(_))
        ));
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        // Matches a file edited by hand with a trailing newline.
        let store = StateStore::open_in_memory().unwrap();
        write_raw_current(&store, b"green\n");
        assert_eq!(store.current_slot().unwrap(), Some(Slot::Green));
    }

    // ── Promotion ──────────────────────────────────────────────────

    #[test]
    fn promote_writes_slot_release_and_history() {
        let store = StateStore::open_in_memory().unwrap();
        let seq = store.promote(&release(Slot::Green, "v2", 1000)).unwrap();
        assert_eq!(seq, 1);

        assert_eq!(store.current_slot().unwrap(), Some(Slot::Green));
        assert_eq!(
            store.get_release(Slot::Green).unwrap(),
            Some(release(Slot::Green, "v2", 1000))
        );
        assert_eq!(store.get_release(Slot::Blue).unwrap(), None);

        let history = store.list_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].seq, 1);
        assert_eq!(history[0].outcome, ReleaseOutcome::Promoted);
        assert_eq!(history[0].version.as_str(), "v2");
    }

    #[test]
    fn promote_overwrites_previous_release_of_slot() {
        let store = StateStore::open_in_memory().unwrap();
        store.promote(&release(Slot::Blue, "v1", 1000)).unwrap();
        store.promote(&release(Slot::Blue, "v3", 3000)).unwrap();
        let record = store.get_release(Slot::Blue).unwrap().unwrap();
        assert_eq!(record.version.as_str(), "v3");
    }

    // ── History ────────────────────────────────────────────────────

    #[test]
    fn history_is_newest_first_and_limited() {
        let store = StateStore::open_in_memory().unwrap();
        store.promote(&release(Slot::Blue, "v1", 1000)).unwrap();
        store
            .append_event(ReleaseEvent::new(
                Slot::Green,
                ReleaseVersion::parse("v2").unwrap(),
                ReleaseOutcome::RolledBack,
                Some("health check exhausted".to_string()),
                2000,
            ))
            .unwrap();
        store.promote(&release(Slot::Green, "v3", 3000)).unwrap();

        let all = store.list_history(10).unwrap();
        let seqs: Vec<u64> = all.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 2, 1]);
        assert_eq!(all[1].outcome, ReleaseOutcome::RolledBack);
        assert_eq!(all[1].detail.as_deref(), Some("health check exhausted"));

        let latest = store.list_history(1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version.as_str(), "v3");
    }

    #[test]
    fn history_keeps_only_newest_entries() {
        let store = StateStore::open_in_memory()
            .unwrap()
            .with_history_retention(3);
        for (i, version) in ["v1", "v2", "v3", "v4", "v5"].into_iter().enumerate() {
            store.promote(&release(Slot::Blue, version, i as u64)).unwrap();
        }

        let history = store.list_history(10).unwrap();
        let seqs: Vec<u64> = history.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![5, 4, 3]);

        let seq = store
            .append_event(ReleaseEvent::new(
                Slot::Green,
                ReleaseVersion::parse("v6").unwrap(),
                ReleaseOutcome::RolledBack,
                None,
                6,
            ))
            .unwrap();
        assert_eq!(seq, 6);
        assert_eq!(store.list_history(10).unwrap().len(), 3);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.promote(&release(Slot::Green, "v7", 7000)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.current_slot().unwrap(), Some(Slot::Green));
        assert_eq!(store.list_history(5).unwrap().len(), 1);
    }

    #[test]
    fn open_creates_state_dir_and_rejects_second_opener() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("switchyard.redb");

        let _first = StateStore::open(&db_path).unwrap();
        assert!(matches!(
            StateStore::open(&db_path),
            Err(StateError::Locked { .. })
        ));
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_history(10).unwrap().is_empty());
        assert_eq!(store.get_release(Slot::Blue).unwrap(), None);
        assert_eq!(store.get_release(Slot::Green).unwrap(), None);
    }
}
