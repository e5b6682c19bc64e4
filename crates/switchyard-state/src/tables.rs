//! redb table definitions for the switchyard state store.

use redb::TableDefinition;

/// Single-row registry: `current` → slot identifier as UTF-8 bytes.
///
/// Stored raw rather than as JSON so a hand-edited or truncated value is
/// reported as corrupt instead of silently decoded.
pub const REGISTRY: TableDefinition<&str, &[u8]> = TableDefinition::new("registry");

/// Last successful release per slot, keyed by slot name.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Release events keyed by a monotonically increasing sequence number.
pub const HISTORY: TableDefinition<u64, &[u8]> = TableDefinition::new("history");

/// Key of the current-slot row in [`REGISTRY`].
pub const CURRENT_KEY: &str = "current";
