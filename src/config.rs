//! Engine-wide configuration.
//!
//! Reference: teacher's `Store::new()` (`jotai-rs/src/store.rs`), which took
//! no configuration at all. SPEC_FULL.md §4.7 widens this to a real config
//! struct since the expanded engine actually has knobs (event log capacity,
//! default ttl policy, clock source) — but keeps the teacher's
//! `new()` / `Default` pairing as the entry point.

use crate::clock::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Default event log ring buffer capacity, per SPEC_FULL.md §6: "The log is
/// a bounded ring (capacity configurable; default 10k)".
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 10_000;

/// Configuration for an [`crate::Ecosystem`].
#[derive(Clone)]
pub struct EcosystemConfig {
    /// Capacity of the devtools event log ring buffer.
    pub event_log_capacity: usize,

    /// Default ttl applied to templates that don't specify their own,
    /// `None` meaning "never auto-destroy on zero dependents".
    pub default_ttl: Option<Duration>,

    /// The time source driving ttl scheduling. Swappable so tests can use
    /// [`crate::clock::VirtualClock`] instead of wall time.
    pub clock: Arc<dyn Clock>,
}

impl EcosystemConfig {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        EcosystemConfig {
            clock,
            ..Self::default()
        }
    }
}

impl Default for EcosystemConfig {
    fn default() -> Self {
        EcosystemConfig {
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            default_ttl: None,
            clock: Arc::new(SystemClock),
        }
    }
}
