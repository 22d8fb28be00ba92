//! End-to-end scenarios for read-only instances (SPEC_FULL.md §6's template
//! `readonly?` flag and §4.4's `store(initial, readonly?)` hook) and
//! deferred effect invocation (SPEC_FULL.md §4.5's "effect(fn): registers fn
//! to run after the factory returns").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use atomix_engine::error::EngineError;
use atomix_engine::state_holder::Settable;
use atomix_engine::template::{atom, primitive, AtomResult};
use atomix_engine::{Ecosystem, EcosystemConfig, Injection};

#[test]
fn a_template_level_readonly_atom_rejects_set() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let locked = Arc::new(primitive::<(), i32>("locked", 7).with_readonly(true));
    let instance = ecosystem.resolve_instance(&locked, ()).unwrap();

    let result = ecosystem.set(&instance, Settable::Value(8));
    assert!(matches!(result, Err(EngineError::ReadOnlyInstance { .. })));
    assert_eq!(instance.get(), 7, "the rejected set must not have committed");
}

#[test]
fn a_writable_atom_accepts_set() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let open = Arc::new(primitive::<(), i32>("open", 1));
    let instance = ecosystem.resolve_instance(&open, ()).unwrap();

    assert!(ecosystem.set(&instance, Settable::Value(2)).is_ok());
    assert_eq!(instance.get(), 2);
}

#[test]
fn store_with_readonly_true_makes_the_adopted_holder_unwritable() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let snapshot = Arc::new(atom("frozen-snapshot", |injection: &Injection, _: ()| {
        let holder = injection.store(10i32, true);
        Ok(AtomResult::Holder(Box::new(FrozenHolder(holder))))
    }));

    let instance = ecosystem.resolve_instance(&snapshot, ()).unwrap();
    let result = ecosystem.set(&instance, Settable::Value(20));
    assert!(matches!(result, Err(EngineError::ReadOnlyInstance { .. })));
    assert_eq!(instance.get(), 10);
}

#[test]
fn store_with_readonly_false_keeps_the_adopted_holder_writable() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let cell = Arc::new(atom("mutable-cell", |injection: &Injection, _: ()| {
        let holder = injection.store(0i32, false);
        Ok(AtomResult::Holder(Box::new(FrozenHolder(holder))))
    }));

    let instance = ecosystem.resolve_instance(&cell, ()).unwrap();
    assert!(ecosystem.set(&instance, Settable::Value(5)).is_ok());
    assert_eq!(instance.get(), 5);
}

/// Thin passthrough so the tests above can hand the engine a
/// `Box<dyn StateHolder<T>>` built from `injection.store`'s
/// `Arc<SimpleStateHolder<T>>`.
struct FrozenHolder<T: Clone + Send + Sync + 'static>(Arc<atomix_engine::state_holder::SimpleStateHolder<T>>);

impl<T: Clone + Send + Sync + 'static> atomix_engine::state_holder::StateHolder<T> for FrozenHolder<T> {
    fn get_state(&self) -> T {
        self.0.get_state()
    }
    fn set_state(&self, settable: Settable<T>) -> T {
        self.0.set_state(settable)
    }
    fn dispatch(&self, action: Box<dyn std::any::Any + Send>) -> T {
        self.0.dispatch(action)
    }
    fn subscribe(&self, listener: atomix_engine::state_holder::StateListener) -> atomix_engine::state_holder::Unsubscribe {
        self.0.subscribe(listener)
    }
}

#[test]
fn effect_body_does_not_run_until_after_the_factory_returns() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let seen_during_factory = Arc::new(AtomicUsize::new(99));
    let ran_total = Arc::new(AtomicUsize::new(0));

    let seen = seen_during_factory.clone();
    let total_for_effect = ran_total.clone();
    let total_for_check = ran_total.clone();
    let watcher = Arc::new(atom("effect-timing", move |injection: &Injection, _: ()| {
        let total_for_effect = total_for_effect.clone();
        injection.effect(&1u32, move || {
            total_for_effect.fetch_add(1, Ordering::SeqCst);
            None
        });
        // The effect must not have fired yet: it's deferred until after
        // this closure returns.
        seen.store(total_for_check.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(AtomResult::Value(0i32))
    }));

    let _instance = ecosystem.resolve_instance(&watcher, ()).unwrap();
    assert_eq!(seen_during_factory.load(Ordering::SeqCst), 0, "effect had not run while the factory was still executing");
    assert_eq!(ran_total.load(Ordering::SeqCst), 1, "effect runs exactly once after construction commits");
}

#[test]
fn effect_skips_rerun_when_deps_are_unchanged_but_reruns_with_cleanup_when_they_change() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let dep = Arc::new(primitive::<(), u32>("effect-dep", 1));
    let runs = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));

    let r = runs.clone();
    let c = cleanups.clone();
    let dep_for_factory = dep.clone();
    let watcher = Arc::new(atom("effect-rerun", move |injection: &Injection, _: ()| {
        let dep_value = injection.get(&dep_for_factory, ())?;
        let r = r.clone();
        let c = c.clone();
        injection.effect(&dep_value, move || {
            r.fetch_add(1, Ordering::SeqCst);
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
        });
        Ok(AtomResult::Value(dep_value))
    }));

    let instance = ecosystem.resolve_instance(&watcher, ()).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);

    let dep_instance = ecosystem.resolve_instance(&dep, ()).unwrap();
    ecosystem.set(&dep_instance, Settable::Value(1)).unwrap();
    // same value -> recompute still happens (set always notifies) but the
    // effect's own dep array is unchanged, so it must not rerun.
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);

    ecosystem.set(&dep_instance, Settable::Value(2)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2, "deps changed, effect reruns");
    assert_eq!(cleanups.load(Ordering::SeqCst), 1, "previous run's cleanup fires first");

    ecosystem.destroy(&instance.meta.id, true);
    assert_eq!(cleanups.load(Ordering::SeqCst), 2, "destroying the instance runs the last effect's cleanup too");
}
