//! The state-holder contract (SPEC_FULL.md §4.4) and the default
//! implementation the engine uses for plain-value atoms.
//!
//! Reference: teacher's `Store` (`jotai-rs/src/store.rs`) mixed the
//! "container for one atom's value" concern with "container for every
//! atom in the ecosystem". SPEC_FULL.md §1 explicitly carves the first
//! concern out as an external collaborator contract ("the core depends
//! only on its **state-holder contract**"), so it gets its own type here:
//! [`StateHolder`] is the trait a caller's custom store must implement to be
//! adopted by an atom instance (§4.3 step 5), and [`SimpleStateHolder`] is
//! the engine's own implementation, built the way the teacher's `Store`
//! tracked a single atom's value — a lock around the value plus a listener
//! list — just without the teacher's cross-atom bookkeeping mixed in.

use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Either a direct value or an updater over the previous value. Mirrors
/// SPEC_FULL.md §3's `SetStateAction<Value> = Value | ((prev) => Value)`,
/// kept from the teacher's `types::SetStateAction` but collapsed to a
/// boxed closure so it doesn't need a second type parameter.
pub enum Settable<T> {
    Value(T),
    Updater(Box<dyn FnOnce(T) -> T + Send>),
}

impl<T> From<T> for Settable<T> {
    fn from(value: T) -> Self {
        Settable::Value(value)
    }
}

pub type StateListener = Arc<dyn Fn() + Send + Sync>;
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// The minimal surface the engine requires from a store, per SPEC_FULL.md
/// §4.4 / §6. Object-safe so atom instances can adopt any caller-supplied
/// implementation behind a `Box<dyn StateHolder<T>>`.
pub trait StateHolder<T: Clone + Send + Sync + 'static>: Send + Sync {
    fn get_state(&self) -> T;

    /// Synchronous: the new state must be observable to `get_state` before
    /// this call returns (SPEC_FULL.md §4.4 invariants).
    fn set_state(&self, settable: Settable<T>) -> T;

    /// Dispatch an out-of-band action (the reducer/store primitive is an
    /// external collaborator per SPEC_FULL.md §1; this just forwards
    /// whatever the adopted holder wants to do with it).
    fn dispatch(&self, action: Box<dyn Any + Send>) -> T;

    /// Register a listener, invoked synchronously in subscription order
    /// after each commit. Returns an unsubscribe callback.
    fn subscribe(&self, listener: StateListener) -> Unsubscribe;
}

/// The engine's built-in state holder, used whenever a factory just returns
/// a plain value (SPEC_FULL.md §4.3 step 5, first case: "If the factory
/// returned a value, wrap in a state holder").
pub struct SimpleStateHolder<T: Clone + Send + Sync + 'static> {
    value: RwLock<T>,
    listeners: Arc<Mutex<Vec<(u64, StateListener)>>>,
    next_listener_id: AtomicU64,
    reducer: Option<Arc<dyn Fn(&T, &(dyn Any + Send)) -> T + Send + Sync>>,
    // Reentrancy guard: a listener that calls `set_state` on *this* holder
    // enqueues rather than recurses (SPEC_FULL.md §4.4: "a listener that
    // itself calls setState enqueues a new commit that runs after the
    // current listener pass completes").
    flushing: Mutex<bool>,
    pending: Mutex<VecDeque<Settable<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SimpleStateHolder<T> {
    pub fn new(initial: T) -> Self {
        SimpleStateHolder {
            value: RwLock::new(initial),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            reducer: None,
            flushing: Mutex::new(false),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_reducer<F>(initial: T, reducer: F) -> Self
    where
        F: Fn(&T, &(dyn Any + Send)) -> T + Send + Sync + 'static,
    {
        SimpleStateHolder {
            reducer: Some(Arc::new(reducer)),
            ..Self::new(initial)
        }
    }

    fn commit(&self, settable: Settable<T>) -> T {
        let new_value = {
            let mut guard = self.value.write();
            let computed = match settable {
                Settable::Value(v) => v,
                Settable::Updater(f) => f(guard.clone()),
            };
            *guard = computed.clone();
            computed
        };
        self.notify();
        new_value
    }

    fn notify(&self) {
        // Snapshot so a listener that subscribes/unsubscribes mid-pass
        // can't deadlock on `listeners`.
        let snapshot: Vec<StateListener> =
            self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StateHolder<T> for SimpleStateHolder<T> {
    fn get_state(&self) -> T {
        self.value.read().clone()
    }

    fn set_state(&self, settable: Settable<T>) -> T {
        {
            let mut flushing = self.flushing.lock();
            if *flushing {
                self.pending.lock().push_back(settable);
                return self.value.read().clone();
            }
            *flushing = true;
        }

        let result = self.commit(settable);

        loop {
            let next = self.pending.lock().pop_front();
            match next {
                Some(pending) => {
                    self.commit(pending);
                }
                None => break,
            }
        }
        *self.flushing.lock() = false;
        result
    }

    fn dispatch(&self, action: Box<dyn Any + Send>) -> T {
        match &self.reducer {
            Some(reducer) => {
                let current = self.get_state();
                let next = reducer(&current, action.as_ref());
                self.set_state(Settable::Value(next))
            }
            None => self.get_state(),
        }
    }

    fn subscribe(&self, listener: StateListener) -> Unsubscribe {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        let listeners = self.listeners.clone();
        Box::new(move || {
            listeners.lock().retain(|(existing, _)| *existing != id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn read_your_writes() {
        let holder = SimpleStateHolder::new(0);
        holder.set_state(Settable::Value(5));
        assert_eq!(holder.get_state(), 5);
    }

    #[test]
    fn updater_sees_previous_value() {
        let holder = SimpleStateHolder::new(1);
        holder.set_state(Settable::Updater(Box::new(|prev| prev + 2)));
        assert_eq!(holder.get_state(), 3);
    }

    #[test]
    fn listeners_invoked_in_subscription_order() {
        let holder = SimpleStateHolder::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        holder.subscribe(Arc::new(move || o1.lock().push(1)));
        let o2 = order.clone();
        holder.subscribe(Arc::new(move || o2.lock().push(2)));

        holder.set_state(Settable::Value(1));
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn reentrant_set_state_is_deferred_not_recursive() {
        let holder = Arc::new(SimpleStateHolder::new(0));
        let depth = Arc::new(AtomicUsize::new(0));
        let max_depth = Arc::new(AtomicUsize::new(0));

        let h = holder.clone();
        let d = depth.clone();
        let md = max_depth.clone();
        holder.subscribe(Arc::new(move || {
            d.fetch_add(1, Ordering::SeqCst);
            let current = d.load(Ordering::SeqCst);
            md.fetch_max(current, Ordering::SeqCst);
            if h.get_state() == 1 {
                // Reentrant call: must not recurse into `notify` again
                // synchronously on this stack frame.
                h.set_state(Settable::Value(2));
            }
            d.fetch_sub(1, Ordering::SeqCst);
        }));

        holder.set_state(Settable::Value(1));
        assert_eq!(holder.get_state(), 2);
        assert_eq!(max_depth.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_future_notifications() {
        let holder = SimpleStateHolder::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let unsub = holder.subscribe(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        holder.set_state(Settable::Value(1));
        unsub();
        holder.set_state(Settable::Value(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
