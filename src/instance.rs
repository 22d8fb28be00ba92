//! Atom instances: the live materialization of a template for one set of
//! params.
//!
//! Reference: teacher's `Store` held a single untyped value per atom id
//! (`jotai-rs/src/store.rs`); SPEC_FULL.md §3/§4.3 needs considerably more
//! per-instance bookkeeping (lifecycle state, ttl, promise status,
//! destructors) that must be reachable *without* knowing the atom's value
//! type `T` — the ecosystem's registries, graph, and ttl scheduler all work
//! purely in terms of ids. This module splits that non-generic bookkeeping
//! ([`InstanceMeta`]) from the typed cell ([`Instance<P, T>`]), and erases
//! the latter behind the [`AnyInstance`] object-safe trait the same way
//! `state_holder::StateHolder` erases the caller's store.

use crate::clock::Clock;
use crate::ecosystem::Ecosystem;
use crate::error::Result;
use crate::ids::{InstanceId, ParamsHash, TemplateKey};
use crate::state_holder::{StateHolder, StateListener, Unsubscribe};
use crate::template::{AtomTemplate, Scope};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The instance lifecycle, per SPEC_FULL.md §3:
/// `Initializing -> Active <-> Stale -> Destroyed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveState {
    /// Factory is running for the first time; reads of this instance by
    /// another factory on the same call stack are a cyclic dependency.
    Initializing,
    /// Has a committed value and zero or more dependents.
    Active,
    /// Factory completed with a pending (unresolved) promise attached
    /// (SPEC_FULL.md §3: "factory completed with a deferred promise still
    /// unresolved"). Reads are still permitted; dynamic subscribers with
    /// `suspend != false` are expected to surface `promise` for host-side
    /// suspension. Distinct from ttl/dependent-count bookkeeping, which is
    /// tracked independently via `ttl_deadline` regardless of this state.
    Stale,
    Destroyed,
}

/// Advisory suspension state surfaced to injection factories and exports,
/// per SPEC_FULL.md §4.6. The engine never blocks on this itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromiseStatus {
    Idle,
    Loading,
    Success,
    Error,
}

pub type Destructor = Box<dyn FnOnce() + Send>;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "destructor panicked with a non-string payload".to_string()
    }
}

/// The non-generic bookkeeping every instance carries, independent of its
/// value type. This is what the graph, registry, and ttl scheduler operate
/// on; none of them ever need to know `T`.
pub struct InstanceMeta {
    pub id: InstanceId,
    pub template_key: TemplateKey,
    pub params_hash: ParamsHash,
    active_state: Mutex<ActiveState>,
    destructors: Mutex<Vec<Destructor>>,
    ttl: Mutex<Option<Duration>>,
    ttl_deadline: Mutex<Option<Instant>>,
    /// Whether this instance was constructed under an `Ecosystem::overrides`
    /// swap rather than the template's original factory (SPEC_FULL.md §7).
    pub overridden: bool,
    promise_status: Mutex<PromiseStatus>,
    /// The template's scope at construction time (SPEC_FULL.md §3/§6).
    /// `Global` pins the instance against ttl-based eviction regardless of
    /// dependent count.
    pub scope: Scope,
    /// The template's `TemplateFlags::manual_destroy` at construction time:
    /// never auto-destroy on zero dependents, destruction is caller-driven
    /// only (`Ecosystem::destroy(id, force)`).
    pub manual_destroy: bool,
}

impl InstanceMeta {
    pub fn new(
        id: InstanceId,
        template_key: TemplateKey,
        params_hash: ParamsHash,
        ttl: Option<Duration>,
        overridden: bool,
        scope: Scope,
        manual_destroy: bool,
    ) -> Self {
        InstanceMeta {
            id,
            template_key,
            params_hash,
            active_state: Mutex::new(ActiveState::Initializing),
            destructors: Mutex::new(Vec::new()),
            ttl: Mutex::new(ttl),
            ttl_deadline: Mutex::new(None),
            overridden,
            promise_status: Mutex::new(PromiseStatus::Idle),
            scope,
            manual_destroy,
        }
    }

    /// Whether this instance may be automatically destroyed by the ttl
    /// sweep at all. `Scope::Global` instances and `manual_destroy`
    /// templates are pinned regardless of dependent count or ttl deadline
    /// (SPEC_FULL.md §3 "Atom template" row, §6 template descriptor's
    /// `scope` field).
    pub fn auto_destroy_eligible(&self) -> bool {
        self.scope != Scope::Global && !self.manual_destroy
    }

    pub fn active_state(&self) -> ActiveState {
        *self.active_state.lock()
    }

    pub fn set_active_state(&self, state: ActiveState) {
        *self.active_state.lock() = state;
    }

    pub fn ttl(&self) -> Option<Duration> {
        *self.ttl.lock()
    }

    /// Override this instance's ttl, per the `injection.ttl()` hook.
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.lock() = Some(ttl);
    }

    pub fn ttl_deadline(&self) -> Option<Instant> {
        *self.ttl_deadline.lock()
    }

    /// Called by the ecosystem when this instance drops to zero dependents
    /// (arms the ttl) or gains one (disarms it), per SPEC_FULL.md §4.5.
    pub fn arm_ttl(&self, clock: &dyn Clock) {
        if let Some(ttl) = self.ttl() {
            *self.ttl_deadline.lock() = Some(clock.now() + ttl);
        }
    }

    pub fn disarm_ttl(&self) {
        *self.ttl_deadline.lock() = None;
    }

    pub fn promise_status(&self) -> PromiseStatus {
        *self.promise_status.lock()
    }

    pub fn set_promise_status(&self, status: PromiseStatus) {
        *self.promise_status.lock() = status;
    }

    pub fn push_destructor(&self, destructor: Destructor) {
        self.destructors.lock().push(destructor);
    }

    /// Run and clear every registered destructor, in reverse registration
    /// order (last-registered effect tears down first), per SPEC_FULL.md
    /// §4.5: "destructors run in reverse registration order". A destructor
    /// that panics is caught so one bad cleanup doesn't stop the rest from
    /// running; its message is returned for the caller to log as
    /// `DestructorThrew`.
    pub fn run_destructors(&self) -> Vec<String> {
        let mut failures = Vec::new();
        let destructors: Vec<Destructor> = self.destructors.lock().drain(..).collect();
        for destructor in destructors.into_iter().rev() {
            if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(destructor))
            {
                failures.push(panic_message(payload));
            }
        }
        failures
    }
}

/// Object-safe handle to an atom instance, erasing its value type `T` so
/// the ecosystem can hold `Arc<dyn AnyInstance>` in its registry.
pub trait AnyInstance: Send + Sync {
    fn meta(&self) -> &InstanceMeta;

    /// Re-run this instance's factory under a fresh injection context,
    /// diff the dependency edges it records against the previous run, and
    /// commit the resulting value into its own state holder.
    fn recompute(&self, ecosystem: &Ecosystem) -> Result<()>;

    /// A type-erased snapshot of the current value, for devtools/export use.
    fn get_state_any(&self) -> Box<dyn Any + Send>;

    /// Type-erased subscribe, used by external subscribers that only care
    /// "did this change", not the value itself (the value is re-read
    /// through the ecosystem on notification).
    fn subscribe_raw(&self, listener: StateListener) -> Unsubscribe;

    /// Whether this instance was constructed with a writable holder
    /// (`AtomApi::set` available) as opposed to a read-only derived value.
    fn is_writable(&self) -> bool;
}

/// The typed half of an atom instance: the template it was constructed
/// from, its resolved params, the state holder/cell holding its current
/// value, and any exports the factory returned alongside it.
pub struct Instance<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub meta: InstanceMeta,
    pub params: P,
    pub template: Arc<AtomTemplate<P, T>>,
    pub cell: Box<dyn StateHolder<T>>,
    pub exports: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
    writable: bool,
}

impl<P, T> Instance<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        meta: InstanceMeta,
        params: P,
        template: Arc<AtomTemplate<P, T>>,
        cell: Box<dyn StateHolder<T>>,
        writable: bool,
    ) -> Self {
        Instance {
            meta,
            params,
            template,
            cell,
            exports: RwLock::new(None),
            writable,
        }
    }

    pub fn set_exports(&self, exports: Arc<dyn Any + Send + Sync>) {
        *self.exports.write() = Some(exports);
    }

    pub fn exports(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.exports.read().clone()
    }

    pub fn get(&self) -> T {
        self.cell.get_state()
    }
}

impl<P, T> AnyInstance for Instance<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn meta(&self) -> &InstanceMeta {
        &self.meta
    }

    fn recompute(&self, ecosystem: &Ecosystem) -> Result<()> {
        ecosystem.recompute_instance(self)
    }

    fn get_state_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.get())
    }

    fn subscribe_raw(&self, listener: StateListener) -> Unsubscribe {
        self.cell.subscribe(listener)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    fn meta() -> InstanceMeta {
        InstanceMeta::new(
            InstanceId::from("count-0"),
            TemplateKey::from("count"),
            0,
            Some(Duration::from_secs(30)),
            false,
            Scope::App,
            false,
        )
    }

    #[test]
    fn starts_initializing() {
        assert_eq!(meta().active_state(), ActiveState::Initializing);
    }

    #[test]
    fn global_scope_and_manual_destroy_opt_out_of_auto_destroy() {
        assert!(meta().auto_destroy_eligible());

        let global = InstanceMeta::new(
            InstanceId::from("singleton-0"),
            TemplateKey::from("singleton"),
            0,
            Some(Duration::from_secs(30)),
            false,
            Scope::Global,
            false,
        );
        assert!(!global.auto_destroy_eligible());

        let manual = InstanceMeta::new(
            InstanceId::from("handle-0"),
            TemplateKey::from("handle"),
            0,
            Some(Duration::from_secs(30)),
            false,
            Scope::App,
            true,
        );
        assert!(!manual.auto_destroy_eligible());
    }

    #[test]
    fn ttl_arms_relative_to_the_supplied_clock() {
        let m = meta();
        let clock = VirtualClock::new();
        assert!(m.ttl_deadline().is_none());
        m.arm_ttl(&clock);
        assert!(m.ttl_deadline().is_some());
        m.disarm_ttl();
        assert!(m.ttl_deadline().is_none());
    }

    #[test]
    fn destructors_run_in_reverse_registration_order() {
        let m = meta();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        m.push_destructor(Box::new(move || o1.lock().push(1)));
        let o2 = order.clone();
        m.push_destructor(Box::new(move || o2.lock().push(2)));
        m.run_destructors();
        assert_eq!(*order.lock(), vec![2, 1]);
    }
}
