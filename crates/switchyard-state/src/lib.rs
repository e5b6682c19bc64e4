//! switchyard-state — the environment registry.
//!
//! Backed by [redb](https://docs.rs/redb). Persists which slot is live,
//! the last successful release of each slot, and an append-only release
//! history. Every promotion commits those three writes in a single
//! transaction, so an interrupted process leaves either the old or the
//! new record and never a mix.
//!
//! Deploy and rollback runs are serialized through [`RunLock`], a lock
//! file that sits next to the database.

pub mod error;
pub mod lock;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use lock::RunLock;
pub use registry::{EnvironmentRegistry, SlotRegistry};
pub use store::StateStore;
pub use types::*;
