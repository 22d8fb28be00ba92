//! Append-only devtools event log.
//!
//! Reference: SPEC_FULL.md §6 "Event log format" and the teacher's
//! `mount_callbacks` / `unmount_callbacks` queues in `jotai-rs/src/store.rs`
//! (a `Vec` behind a `Mutex`) — generalized here into a true bounded ring so
//! eviction drops the oldest event rather than growing forever, per the
//! spec's "capacity configurable; default 10k ... eviction drops oldest".

use crate::ids::{InstanceId, NodeId, TemplateKey};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// The payload of a single event. Mirrors SPEC_FULL.md §6's event `action`
/// types one-for-one.
#[derive(Clone, Debug)]
pub enum EventAction {
    EdgeCreated { from: NodeId, to: InstanceId },
    EdgeRemoved { from: NodeId, to: InstanceId },
    /// An edge created/destroyed as a side effect of the engine itself
    /// (e.g. a `Static` pin), as opposed to a caller's explicit `get`.
    GhostEdgeCreated { from: NodeId, to: InstanceId },
    GhostEdgeDestroyed { from: NodeId, to: InstanceId },
    InstanceActiveStateChanged {
        id: InstanceId,
        from: &'static str,
        to: &'static str,
    },
    InstanceStateChanged { id: InstanceId },
    InstanceDestroyed { id: InstanceId },
    OverrideApplied { template_key: TemplateKey },
    ListenerThrew { id: InstanceId, message: String },
    DestructorThrew { id: InstanceId, message: String },
}

/// A single entry in the event log.
#[derive(Clone, Debug)]
pub struct Event {
    pub id: u64,
    pub timestamp: Instant,
    pub action: EventAction,
}

/// Append-only ring buffer of [`Event`]s, snapshotted per reader per
/// SPEC_FULL.md §5 ("The event log is append-only and snapshotted per
/// reader").
pub struct EventLog {
    capacity: usize,
    next_id: AtomicU64,
    events: Mutex<VecDeque<Event>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        EventLog {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(0),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, action: EventAction, now: Instant) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(Event {
            id,
            timestamp: now,
            action,
        });
    }

    /// A snapshot of the log's current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let log = EventLog::new(2);
        let now = Instant::now();
        log.push(
            EventAction::InstanceStateChanged {
                id: InstanceId::from("a-0"),
            },
            now,
        );
        log.push(
            EventAction::InstanceStateChanged {
                id: InstanceId::from("b-0"),
            },
            now,
        );
        log.push(
            EventAction::InstanceStateChanged {
                id: InstanceId::from("c-0"),
            },
            now,
        );

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        match &snapshot[0].action {
            EventAction::InstanceStateChanged { id } => assert_eq!(id.as_str(), "b-0"),
            _ => panic!("unexpected action"),
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let log = EventLog::new(10);
        let now = Instant::now();
        for _ in 0..5 {
            log.push(
                EventAction::InstanceStateChanged {
                    id: InstanceId::from("a-0"),
                },
                now,
            );
        }
        let snapshot = log.snapshot();
        let ids: Vec<u64> = snapshot.iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
