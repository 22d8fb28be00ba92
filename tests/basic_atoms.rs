//! End-to-end scenarios for primitive atoms and the notification flush.
//!
//! Covers SPEC_FULL.md §8 scenario 1 ("Counter") plus the uniqueness,
//! read-your-writes, and single-flush-per-turn invariants.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use atomix_engine::state_holder::Settable;
use atomix_engine::template::primitive;
use atomix_engine::{Ecosystem, EcosystemConfig};

#[test]
fn counter_scenario_notifies_subscriber_on_each_set() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let count = Arc::new(primitive::<(), i32>("count", 0));
    let instance = ecosystem.resolve_instance(&count, ()).unwrap();
    assert_eq!(instance.get(), 0);

    let observed = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(std::sync::Mutex::new(0i32));
    let o = observed.clone();
    let l = last.clone();
    let handle = instance.clone();
    let _unsub = ecosystem.subscribe(&instance.meta.id, move || {
        o.fetch_add(1, Ordering::SeqCst);
        *l.lock().unwrap() = handle.get();
    });

    ecosystem.set(&instance, Settable::Value(1)).unwrap();
    assert_eq!(instance.get(), 1);
    assert_eq!(*last.lock().unwrap(), 1);

    ecosystem.set(&instance, Settable::Updater(Box::new(|prev| prev + 2))).unwrap();
    assert_eq!(instance.get(), 3);
    assert_eq!(*last.lock().unwrap(), 3);
    assert_eq!(observed.load(Ordering::SeqCst), 2);
}

#[test]
fn get_node_is_idempotent_for_equal_params() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let count = Arc::new(primitive::<(), i32>("count", 0));

    let a = ecosystem.resolve_instance(&count, ()).unwrap();
    let b = ecosystem.resolve_instance(&count, ()).unwrap();
    assert_eq!(a.meta.id, b.meta.id);

    ecosystem.set(&a, Settable::Value(7)).unwrap();
    assert_eq!(b.get(), 7, "resolving the same template/params twice must yield the same instance");
}

#[test]
fn read_your_writes_is_immediate() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let count = Arc::new(primitive::<(), i32>("count", 0));
    let instance = ecosystem.resolve_instance(&count, ()).unwrap();

    let returned = ecosystem.set(&instance, Settable::Value(42)).unwrap();
    assert_eq!(returned, 42);
    assert_eq!(instance.get(), 42);
}

#[test]
fn independent_atoms_do_not_interfere() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let a = Arc::new(primitive::<(), i32>("a", 1));
    let b = Arc::new(primitive::<(), i32>("b", 2));

    let ia = ecosystem.resolve_instance(&a, ()).unwrap();
    let ib = ecosystem.resolve_instance(&b, ()).unwrap();

    ecosystem.set(&ia, Settable::Value(10)).unwrap();
    ecosystem.set(&ib, Settable::Value(20)).unwrap();

    assert_eq!(ia.get(), 10);
    assert_eq!(ib.get(), 20);
}

#[test]
fn each_subscriber_notified_at_most_once_per_flush() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let count = Arc::new(primitive::<(), i32>("count", 0));
    let instance = ecosystem.resolve_instance(&count, ()).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let c1 = calls.clone();
    let _unsub1 = ecosystem.subscribe(&instance.meta.id, move || {
        c1.fetch_add(1, Ordering::SeqCst);
    });
    let c2 = calls.clone();
    let _unsub2 = ecosystem.subscribe(&instance.meta.id, move || {
        c2.fetch_add(1, Ordering::SeqCst);
    });

    ecosystem.set(&instance, Settable::Value(1)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2, "both subscribers fire exactly once");
}

#[test]
fn unsubscribe_stops_further_notifications() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let count = Arc::new(primitive::<(), i32>("count", 0));
    let instance = ecosystem.resolve_instance(&count, ()).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let unsub = ecosystem.subscribe(&instance.meta.id, move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    ecosystem.set(&instance, Settable::Value(1)).unwrap();
    unsub();
    ecosystem.set(&instance, Settable::Value(2)).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
