//! switchyard-health — readiness probing for deployment slots.
//!
//! Provides a single HTTP readiness check and a bounded polling loop
//! around it. The loop is the gate in front of every promotion: a slot
//! only receives traffic after it reports full readiness.
//!
//! # Architecture
//!
//! ```text
//! Prober (trait, injected into the release controller)
//!   └── HttpProber
//!       └── poll_until_ready(policy)
//!           ├── http_check() → ProbeAttempt
//!           └── sleep(interval), bounded by max_attempts and timeout
//! ```
//!
//! # Readiness, not liveness
//!
//! A 2xx response passes only if its JSON `status` field, when present,
//! reads `"ready"`. A process that is listening but still running
//! migrations answers 503 or `{"status": "live"}` and fails the check.

pub mod checker;
pub mod prober;

pub use checker::{ProbeAttempt, ProbeResult, classify_readiness, http_check};
pub use prober::{HealthVerdict, HttpProber, ProbeFuture, ProbePolicy, Prober, poll_until_ready};
