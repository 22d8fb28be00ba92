//! The ecosystem: the root container tying the registry, graph, instances,
//! overrides, and event log together.
//!
//! Reference: teacher's `Store` (`jotai-rs/src/store.rs`) is the closest
//! analog — a single struct owning `DashMap`s of per-atom state plus
//! mount/unmount callback bookkeeping — generalized here per SPEC_FULL.md
//! §5 into the full root object: construction/resolution, the
//! notification flush, ttl sweeping, and overrides all live here because
//! the teacher put the equivalent single-atom versions of each of those
//! concerns directly on `Store` too.

use crate::clock::Clock;
use crate::config::EcosystemConfig;
use crate::error::{EngineError, Result};
use crate::event_log::{EventAction, EventLog};
use crate::flags::EdgeFlags;
use crate::graph::Graph;
use crate::ids::{hash_params, InstanceId, NodeId, ParamsHash, TemplateKey};
use crate::injection::{Injection, InjectionSlots};
use crate::instance::{ActiveState, AnyInstance, Instance, InstanceMeta, PromiseStatus};
use crate::registry::{NodeKind, NodeRegistry};
use crate::state_holder::{SimpleStateHolder, StateListener};
use crate::template::{AtomResult, AtomTemplate};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::task::Poll;

/// The root reactive container. Cheap to clone (an `Arc` internally would
/// be redundant — callers are expected to hold `Arc<Ecosystem>` themselves,
/// the same way the teacher's `Store` was always used behind an `Arc` from
/// `jotai-rs/src/lib.rs`).
pub struct Ecosystem {
    config: EcosystemConfig,
    registry: NodeRegistry,
    graph: Graph,
    /// Object-safe view of every live instance, keyed by id.
    instances: DashMap<InstanceId, Arc<dyn AnyInstance>>,
    /// The same instances, additionally reachable as `dyn Any` so
    /// `resolve_instance::<P, T>` can downcast back to `Instance<P, T>`.
    typed: DashMap<InstanceId, Arc<dyn Any + Send + Sync>>,
    /// Hook slots, persisted across an instance's recomputes.
    slots: DashMap<InstanceId, Arc<InjectionSlots>>,
    /// Live promises attached via `injection.promise`, polled by `tick`.
    promises: DashMap<InstanceId, Mutex<Option<crate::injection::BoxedPromise>>>,
    /// Overridden templates, keyed by the key they stand in for
    /// (SPEC_FULL.md §7).
    overrides: DashMap<TemplateKey, Arc<dyn Any + Send + Sync>>,
    event_log: EventLog,
    /// Ids currently under construction on this call stack, for cyclic
    /// dependency detection (SPEC_FULL.md §3 invariant 3). The engine's
    /// single-threaded cooperative concurrency model (SPEC_FULL.md §5)
    /// means one stack suffices; there is never a second factory running
    /// concurrently on the same ecosystem.
    construction_stack: Mutex<Vec<InstanceId>>,
    /// Global flush reentrancy guard: a `stateChanged` notification raised
    /// while a flush is already running is queued rather than recursed
    /// into, the ecosystem-wide counterpart to `SimpleStateHolder`'s
    /// per-holder guard (SPEC_FULL.md §4.2: "single flush per turn").
    flushing: Mutex<bool>,
    pending_flushes: Mutex<VecDeque<InstanceId>>,
}

impl Ecosystem {
    pub fn new(config: EcosystemConfig) -> Arc<Self> {
        Arc::new(Ecosystem {
            event_log: EventLog::new(config.event_log_capacity),
            config,
            registry: NodeRegistry::new(),
            graph: Graph::new(),
            instances: DashMap::new(),
            typed: DashMap::new(),
            slots: DashMap::new(),
            promises: DashMap::new(),
            overrides: DashMap::new(),
            construction_stack: Mutex::new(Vec::new()),
            flushing: Mutex::new(false),
            pending_flushes: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &EcosystemConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.config.clock
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    fn now(&self) -> std::time::Instant {
        self.config.clock.now()
    }

    /// How many live instances currently exist for a template key. Used to
    /// enforce `max_instances`.
    fn count_instances_of(&self, key: &TemplateKey) -> usize {
        self.instances
            .iter()
            .filter(|entry| &entry.value().meta().template_key == key)
            .count()
    }

    /// Public counterpart of [`Ecosystem::count_instances_of`], for callers
    /// (e.g. `utils::atom_family`'s tests) outside the crate's `resolve`
    /// path that just want a census, not construction.
    pub fn count_instances_of_key(&self, key: &TemplateKey) -> usize {
        self.count_instances_of(key)
    }

    /// Destroy the instance of `key` materialized for the params whose hash
    /// is `params_hash`, without constructing it if it doesn't already
    /// exist. Used by `utils::atom_family::remove`, which only has the
    /// public (`TemplateKey`, `ParamsHash`) pair to go on, not a generic
    /// `Instance<P, T>` handle.
    pub fn destroy_by_key_and_hash(&self, key: &TemplateKey, params_hash: ParamsHash) {
        let id = InstanceId::new(key, params_hash);
        self.destroy(&id, true);
    }

    /// Resolve (constructing if necessary) the instance of `template` for
    /// `params`. This is the entry point for both top-level reads
    /// (`Ecosystem::get`) and nested reads from within another factory
    /// (`Injection::get`/`get_instance`).
    pub fn resolve_instance<P, T>(
        &self,
        template: &Arc<AtomTemplate<P, T>>,
        params: P,
    ) -> Result<Arc<Instance<P, T>>>
    where
        P: Clone + Send + Sync + Hash + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let effective_template = self.effective_template(template);
        let params_hash: ParamsHash = hash_params(&params);
        let id = InstanceId::new(&effective_template.key, params_hash);

        if let Some(existing) = self.typed.get(&id) {
            return existing
                .clone()
                .downcast::<Instance<P, T>>()
                .map_err(|_| EngineError::DuplicateTemplateKey(effective_template.key.clone()));
        }

        {
            let mut stack = self.construction_stack.lock();
            if stack.contains(&id) {
                return Err(EngineError::CyclicDependency {
                    instance_id: id.clone(),
                    chain: stack.clone(),
                });
            }
            if let Some(max) = effective_template.max_instances {
                if self.count_instances_of(&effective_template.key) >= max {
                    return Err(EngineError::MaxInstancesExceeded {
                        template_key: effective_template.key.clone(),
                        limit: max,
                    });
                }
            }
            stack.push(id.clone());
        }

        let slots = Arc::new(InjectionSlots::new());
        let injection = Injection::new(self, id.clone(), slots.clone());
        let outcome = (effective_template.factory)(&injection, params.clone());
        self.construction_stack.lock().pop();
        let outcome = outcome?;

        let overridden = self.overrides.contains_key(&effective_template.key);
        let (cell, holder_writable) = match outcome {
            AtomResult::Value(v) => (
                Box::new(SimpleStateHolder::new(v)) as Box<dyn crate::state_holder::StateHolder<T>>,
                false,
            ),
            AtomResult::Holder(h) => (h, true),
        };
        let writable =
            holder_writable && !effective_template.readonly && !injection.take_pending_readonly();
        let meta = InstanceMeta::new(
            id.clone(),
            effective_template.key.clone(),
            params_hash,
            effective_template.ttl.or(self.config.default_ttl),
            overridden,
            effective_template.scope,
            effective_template.flags.manual_destroy,
        );
        meta.set_active_state(ActiveState::Active);
        let instance = Arc::new(Instance::new(meta, params, effective_template, cell, writable));

        tracing::debug!(instance = %id, template = %effective_template.key, "instance constructed");
        self.registry.register(NodeId::Instance(id.clone()), NodeKind::AtomInstance);
        self.instances.insert(id.clone(), instance.clone() as Arc<dyn AnyInstance>);
        self.typed.insert(id.clone(), instance.clone() as Arc<dyn Any + Send + Sync>);
        self.slots.insert(id.clone(), slots);

        self.commit_construction_edges(&id, injection.take_recorded());
        if let Some(ttl) = injection.take_pending_ttl() {
            instance.meta.set_ttl(ttl);
        }
        if let Some(exports) = injection.take_pending_exports() {
            instance.set_exports(exports);
        }
        if let Some(promise) = injection.take_pending_promise() {
            self.promises.insert(id.clone(), Mutex::new(Some(promise)));
            // Per SPEC_FULL.md §4.3 step 6: "transition to Active (or Stale
            // if a pending promise was registered)".
            instance.meta.set_active_state(ActiveState::Stale);
            self.event_log.push(
                EventAction::InstanceActiveStateChanged { id: id.clone(), from: "Active", to: "Stale" },
                self.now(),
            );
        }
        self.sync_ttl_state(&id);
        let effect_slots = self.slots.get(&id).map(|s| s.clone());
        if let Some(effect_slots) = effect_slots {
            self.commit_pending_effects(&instance.meta, &effect_slots, injection.take_pending_effects());
        }

        Ok(instance)
    }

    fn effective_template<P, T>(&self, template: &Arc<AtomTemplate<P, T>>) -> Arc<AtomTemplate<P, T>>
    where
        P: 'static,
        T: 'static,
    {
        match self.overrides.get(&template.key) {
            Some(erased) => erased
                .clone()
                .downcast::<AtomTemplate<P, T>>()
                .unwrap_or_else(|_| template.clone()),
            None => template.clone(),
        }
    }

    /// Re-run `instance`'s factory and commit the result, per SPEC_FULL.md
    /// §4.3/§4.5. Called through [`AnyInstance::recompute`] during a
    /// `stateChanged` flush.
    pub(crate) fn recompute_instance<P, T>(&self, instance: &Instance<P, T>) -> Result<()>
    where
        P: Clone + Send + Sync + Hash + 'static,
        T: Clone + Send + Sync + 'static,
    {
        instance.meta.set_active_state(ActiveState::Initializing);
        let slots = self
            .slots
            .get(&instance.meta.id)
            .map(|s| s.clone())
            .unwrap_or_else(|| Arc::new(InjectionSlots::new()));
        let injection = Injection::new(self, instance.meta.id.clone(), slots.clone());
        let outcome = (instance.template.factory)(&injection, instance.params.clone());

        match outcome {
            Ok(AtomResult::Value(v)) => {
                instance.meta.set_active_state(ActiveState::Active);
                instance.cell.set_state(crate::state_holder::Settable::Value(v));
            }
            Ok(AtomResult::Holder(_)) => {
                // Adopting a fresh holder mid-life isn't supported; the
                // original holder from construction keeps being used.
                instance.meta.set_active_state(ActiveState::Active);
            }
            Err(e) => {
                tracing::warn!(instance = %instance.meta.id, error = %e, "factory threw during recompute");
                self.event_log.push(
                    EventAction::ListenerThrew {
                        id: instance.meta.id.clone(),
                        message: e.to_string(),
                    },
                    self.now(),
                );
                self.destroy(&instance.meta.id, true);
                return Err(e);
            }
        }

        self.commit_construction_edges(&instance.meta.id, injection.take_recorded());
        if let Some(ttl) = injection.take_pending_ttl() {
            instance.meta.set_ttl(ttl);
        }
        if let Some(exports) = injection.take_pending_exports() {
            instance.set_exports(exports);
        }
        if let Some(promise) = injection.take_pending_promise() {
            self.promises.insert(instance.meta.id.clone(), Mutex::new(Some(promise)));
            if instance.meta.active_state() != ActiveState::Stale {
                instance.meta.set_active_state(ActiveState::Stale);
                self.event_log.push(
                    EventAction::InstanceActiveStateChanged {
                        id: instance.meta.id.clone(),
                        from: "Active",
                        to: "Stale",
                    },
                    self.now(),
                );
            }
        }
        self.commit_pending_effects(&instance.meta, &slots, injection.take_pending_effects());
        Ok(())
    }

    /// Apply any `injection.effect(..)` calls queued during a factory run,
    /// once its value/edges/ttl/exports/promise are all committed, per
    /// SPEC_FULL.md §4.5. The previous run's cleanup (if any) fires right
    /// before the new effect body; the first time a given slot fires, its
    /// eventual cleanup is also wired into the instance's own destructor
    /// list so it runs on instance destruction too.
    fn commit_pending_effects(
        &self,
        meta: &InstanceMeta,
        slots: &Arc<InjectionSlots>,
        pending: Vec<crate::injection::PendingEffect>,
    ) {
        for effect in pending {
            let idx = effect.idx;
            let is_first_time = idx >= slots.effects.lock().len();
            let old_cleanup = slots.effects.lock().get_mut(idx).and_then(|slot| slot.1.take());
            if let Some(cleanup) = old_cleanup {
                cleanup();
            }
            let new_destructor = (effect.run)();
            {
                let mut effects = slots.effects.lock();
                if idx < effects.len() {
                    effects[idx] = (effect.dep_hash, new_destructor);
                } else {
                    effects.push((effect.dep_hash, new_destructor));
                }
            }
            if is_first_time {
                let slots_for_teardown = slots.clone();
                meta.push_destructor(Box::new(move || {
                    if let Some(cleanup) = slots_for_teardown
                        .effects
                        .lock()
                        .get_mut(idx)
                        .and_then(|slot| slot.1.take())
                    {
                        cleanup();
                    }
                }));
            }
        }
    }

    /// Diff `recorded` (this run's dependency reads) against the edges
    /// already on record for `id`, removing stale ones and adding new
    /// ones, per SPEC_FULL.md §4.3 step 4.
    fn commit_construction_edges(&self, id: &InstanceId, recorded: Vec<crate::injection::RecordedEdge>) {
        let to_node = NodeId::Instance(id.clone());
        let previous = self.graph.dependencies_of(&to_node);

        let still_present: std::collections::HashSet<InstanceId> =
            recorded.iter().map(|edge| edge.to.clone()).collect();

        for edge in &previous {
            if !still_present.contains(&edge.from) {
                self.graph.remove_edge(&edge.from, &to_node);
                let action = if edge.flags.is_static() {
                    EventAction::GhostEdgeDestroyed {
                        from: NodeId::Instance(edge.from.clone()),
                        to: id.clone(),
                    }
                } else {
                    EventAction::EdgeRemoved {
                        from: NodeId::Instance(edge.from.clone()),
                        to: id.clone(),
                    }
                };
                self.event_log.push(action, self.now());
                self.sync_ttl_state(&edge.from);
            }
        }

        for recorded_edge in recorded {
            let already_existed = previous.iter().any(|edge| edge.from == recorded_edge.to);
            self.graph
                .add_edge(recorded_edge.to.clone(), to_node.clone(), recorded_edge.flags, "get");
            if !already_existed {
                // A `Static` edge pins lifetime only — it carries no
                // `stateChanged` subscription, so devtools sees it as a
                // "ghost" edge distinct from a real dynamic dependency
                // (SPEC_FULL.md §6's `ghostEdgeCreated`/`ghostEdgeDestroyed`
                // event types).
                let action = if recorded_edge.flags.is_static() {
                    EventAction::GhostEdgeCreated {
                        from: NodeId::Instance(recorded_edge.to.clone()),
                        to: id.clone(),
                    }
                } else {
                    EventAction::EdgeCreated {
                        from: NodeId::Instance(recorded_edge.to.clone()),
                        to: id.clone(),
                    }
                };
                self.event_log.push(action, self.now());
            }
            self.sync_ttl_state(&recorded_edge.to);
        }
    }

    /// Recompute an instance's ttl-armed bookkeeping from its current
    /// dependent count. Idempotent, so it can be called liberally after
    /// every edge mutation rather than reasoned about in terms of ordering.
    ///
    /// This only arms/disarms the ttl deadline (SPEC_FULL.md §3 invariant
    /// 6); it never touches `ActiveState`. `ActiveState::Stale` is reserved
    /// for "has a pending promise" (§3 Lifecycle), a separate axis from
    /// "zero dependents, ttl counting down" — an instance can be `Active`
    /// with an armed ttl, or `Stale` with plenty of dependents.
    fn sync_ttl_state(&self, id: &InstanceId) {
        let instance = match self.instances.get(id) {
            Some(i) => i.clone(),
            None => return,
        };
        let meta = instance.meta();
        if meta.active_state() == ActiveState::Destroyed {
            return;
        }
        if !meta.auto_destroy_eligible() {
            // `Scope::Global` / `manual_destroy` templates are pinned
            // regardless of dependent count (SPEC_FULL.md §6 template
            // descriptor's `scope`/`readonly`-adjacent flags).
            meta.disarm_ttl();
            return;
        }
        if self.graph.dependent_count(id) == 0 {
            meta.arm_ttl(self.config.clock.as_ref());
        } else {
            meta.disarm_ttl();
        }
    }

    /// Synchronously commit a new value into a writable atom's cell and run
    /// the notification flush, per SPEC_FULL.md §4.4 invariants ("the new
    /// state must be observable... before the call returns"). Returns
    /// `Err(ReadOnlyInstance)` without committing anything if `instance`
    /// isn't writable (a derived atom, or a template/`store` marked
    /// `readonly`).
    pub fn set<P, T>(
        &self,
        instance: &Instance<P, T>,
        settable: crate::state_holder::Settable<T>,
    ) -> Result<T>
    where
        P: Clone + Send + Sync + Hash + 'static,
        T: Clone + Send + Sync + 'static,
    {
        if !instance.is_writable() {
            return Err(EngineError::ReadOnlyInstance {
                instance_id: instance.meta.id.clone(),
            });
        }
        let result = instance.cell.set_state(settable);
        self.notify_state_changed(&instance.meta.id);
        Ok(result)
    }

    /// Subscribe an external (host-framework) listener to `id`'s
    /// `stateChanged` notifications. Returns an unsubscribe callback. Takes
    /// `self` as `Arc<Ecosystem>` (rather than `&self`) so the returned
    /// closure can keep the ecosystem alive and reach back into it to tear
    /// the edge down, the same way `SimpleStateHolder::subscribe` closes
    /// over its own `Arc<Mutex<..>>` listener list.
    pub fn subscribe(
        self: &Arc<Self>,
        id: &InstanceId,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> crate::state_holder::Unsubscribe {
        let external_id = crate::ids::ExternalId::next();
        let node = NodeId::External(external_id.clone());
        self.registry.register(node.clone(), NodeKind::ExternalSubscriber);
        self.graph.add_edge_with_notify(
            id.clone(),
            node,
            EdgeFlags::EXTERNAL,
            "subscribe",
            Some(Arc::new(callback)),
        );

        let ecosystem = self.clone();
        let dependency_id = id.clone();
        Box::new(move || {
            ecosystem.unsubscribe(&dependency_id, external_id);
        })
    }

    /// Remove a subscription created by [`Ecosystem::subscribe`].
    pub fn unsubscribe(&self, id: &InstanceId, external_id: crate::ids::ExternalId) {
        let node = NodeId::External(external_id);
        self.graph.remove_edge(id, &node);
        self.registry.unregister(&node);
        self.sync_ttl_state(id);
    }

    /// Run the BFS-ordered notification flush starting from `id`, per
    /// SPEC_FULL.md §4.2. Reentrant calls (a listener that reads/writes
    /// another atom mid-flush) are queued rather than recursed into.
    pub fn notify_state_changed(&self, id: &InstanceId) {
        {
            let mut flushing = self.flushing.lock();
            if *flushing {
                self.pending_flushes.lock().push_back(id.clone());
                return;
            }
            *flushing = true;
        }

        self.run_flush(id);
        loop {
            let next = self.pending_flushes.lock().pop_front();
            match next {
                Some(next_id) => self.run_flush(&next_id),
                None => break,
            }
        }
        *self.flushing.lock() = false;
    }

    fn run_flush(&self, changed: &InstanceId) {
        tracing::trace!(instance = %changed, "flush started");
        self.event_log.push(
            EventAction::InstanceStateChanged { id: changed.clone() },
            self.now(),
        );
        for node in self.graph.affected_order(changed) {
            match node {
                NodeId::Instance(iid) => {
                    let instance = match self.instances.get(&iid) {
                        Some(i) => i.clone(),
                        None => continue,
                    };
                    match instance.recompute(self) {
                        Ok(()) => {
                            self.event_log.push(
                                EventAction::InstanceStateChanged { id: iid.clone() },
                                self.now(),
                            );
                        }
                        Err(e) => {
                            self.event_log.push(
                                EventAction::ListenerThrew {
                                    id: iid.clone(),
                                    message: e.to_string(),
                                },
                                self.now(),
                            );
                        }
                    }
                }
                NodeId::External(_) => {
                    if let Some(notify) = self.graph.notify_callback(&node) {
                        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| notify())).is_err() {
                            self.event_log.push(
                                EventAction::ListenerThrew {
                                    id: changed.clone(),
                                    message: "external listener panicked".to_string(),
                                },
                                self.now(),
                            );
                        }
                    }
                }
            }
        }
    }

    /// Whether `id` is currently eligible to be destroyed by natural causes
    /// (ttl expiry), i.e. what `force: false` gates on: the template must
    /// allow auto-destroy, it must have no live dependents, and its armed
    /// ttl deadline must already have passed.
    fn eligible_for_natural_destroy(&self, id: &InstanceId) -> bool {
        let instance = match self.instances.get(id) {
            Some(i) => i,
            None => return false,
        };
        let meta = instance.meta();
        if !meta.auto_destroy_eligible() {
            return false;
        }
        if self.graph.dependent_count(id) != 0 {
            return false;
        }
        match meta.ttl_deadline() {
            Some(deadline) => self.now() >= deadline,
            None => false,
        }
    }

    /// Destroy an instance: run its destructors, remove it from every
    /// registry/graph structure, and cascade to any dependent that reached
    /// it only through a `Static` ("required parent") edge, per
    /// SPEC_FULL.md §4.5 and §9's "Static edge lifetime policy".
    ///
    /// `force=true` destroys unconditionally (explicit caller request,
    /// override rebuild, cascade). `force=false` only destroys if
    /// [`Ecosystem::eligible_for_natural_destroy`] holds, matching the same
    /// eligibility check `sweep_ttl` uses, and returns whether it destroyed
    /// anything.
    pub fn destroy(&self, id: &InstanceId, force: bool) -> bool {
        let instance = match self.instances.get(id) {
            Some(i) => i.clone(),
            None => return false,
        };
        if instance.meta().active_state() == ActiveState::Destroyed {
            return false;
        }
        if !force && !self.eligible_for_natural_destroy(id) {
            return false;
        }

        tracing::debug!(instance = %id, "instance destroyed");
        let dependents = self.graph.direct_dependents_for_destroy(id);
        // This instance's own dependencies (the things *it* reads) each lose
        // a dependent here too; capture them before the edges are torn down
        // so their ttl/Stale bookkeeping can be resynced afterward (4.5's
        // "losing its last dependent" isn't only reachable via edge
        // retraction — destroying the dependent is the same event).
        let dependencies: Vec<InstanceId> = self
            .graph
            .dependencies_of(&NodeId::Instance(id.clone()))
            .into_iter()
            .map(|edge| edge.from)
            .collect();
        instance.meta().set_active_state(ActiveState::Destroyed);

        for message in instance.meta().run_destructors() {
            self.event_log.push(
                EventAction::DestructorThrew { id: id.clone(), message },
                self.now(),
            );
        }

        self.registry.unregister(&NodeId::Instance(id.clone()));
        self.instances.remove(id);
        self.typed.remove(id);
        self.slots.remove(id);
        self.promises.remove(id);
        self.graph.remove_all_edges_of(id);
        self.event_log
            .push(EventAction::InstanceDestroyed { id: id.clone() }, self.now());

        for dependency_id in &dependencies {
            self.sync_ttl_state(dependency_id);
        }

        for edge in dependents {
            match &edge.to {
                NodeId::Instance(dependent_id) if edge.flags.is_static() => {
                    self.destroy(dependent_id, true);
                }
                // A dynamic (non-Static) atom-instance dependent re-evaluates
                // against whatever its factory resolves now — typically a
                // freshly (re)constructed instance of the same template, the
                // override's replacement among them. Per SPEC_FULL.md §4.5
                // step 3 / §4.6: "destroyed ... dependents ... re-evaluate".
                NodeId::Instance(dependent_id) => {
                    if let Some(dependent) = self.instances.get(dependent_id) {
                        let dependent = dependent.clone();
                        match dependent.recompute(self) {
                            // `notify_state_changed` both logs this recompute
                            // and cascades to whatever *this* dependent's own
                            // dependents are.
                            Ok(()) => self.notify_state_changed(dependent_id),
                            Err(e) => {
                                self.event_log.push(
                                    EventAction::ListenerThrew {
                                        id: dependent_id.clone(),
                                        message: e.to_string(),
                                    },
                                    self.now(),
                                );
                            }
                        }
                    }
                }
                NodeId::External(_) => {
                    if let Some(notify) = &edge.notify {
                        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| notify()));
                    }
                }
            }
        }
        true
    }

    /// Swap a template's factory for a different one, destroying and
    /// forcing a rebuild of every live instance registered under its key,
    /// per SPEC_FULL.md §7.
    pub fn set_override<P, T>(&self, template: Arc<AtomTemplate<P, T>>)
    where
        P: Clone + Send + Sync + Hash + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.overrides(vec![OverrideChange::set(template)]);
    }

    pub fn clear_override(&self, key: &TemplateKey) {
        self.overrides(vec![OverrideChange::clear(key.clone())]);
    }

    /// Apply a batch of override changes atomically: every change in
    /// `changes` is installed (or removed) into the override table before
    /// any affected instance is destroyed/recomputed, so a multi-key batch
    /// never has dependents rebuilding against a half-applied set of
    /// overrides, per SPEC_FULL.md §7.
    pub fn overrides(&self, changes: Vec<OverrideChange>) {
        let mut affected_keys: Vec<TemplateKey> = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                OverrideChange::Set { key, template } => {
                    tracing::info!(template = %key, "override applied");
                    self.overrides.insert(key.clone(), template);
                    affected_keys.push(key);
                }
                OverrideChange::Clear { key } => {
                    self.overrides.remove(&key);
                    affected_keys.push(key);
                }
            }
        }

        let mut affected_instances: Vec<InstanceId> = Vec::new();
        for key in &affected_keys {
            for entry in self.instances.iter() {
                if &entry.value().meta().template_key == key {
                    affected_instances.push(entry.key().clone());
                }
            }
        }
        affected_instances.sort();
        affected_instances.dedup();
        for id in affected_instances {
            self.destroy(&id, true);
        }

        for key in affected_keys {
            self.event_log
                .push(EventAction::OverrideApplied { template_key: key }, self.now());
        }
    }

    /// Drive ttl-based destruction and poll any attached promises forward
    /// by one step, without spawning an executor (SPEC_FULL.md §5: the
    /// engine never suspends on its own). A host integration calls this
    /// once per frame/tick.
    pub fn tick(&self) {
        self.sweep_ttl();
        self.poll_promises();
    }

    fn sweep_ttl(&self) {
        let now = self.now();
        let expired: Vec<InstanceId> = self
            .instances
            .iter()
            .filter_map(|entry| {
                let meta = entry.value().meta();
                if !meta.auto_destroy_eligible() {
                    return None;
                }
                match meta.ttl_deadline() {
                    Some(deadline) if now >= deadline && self.graph.dependent_count(entry.key()) == 0 => {
                        Some(entry.key().clone())
                    }
                    _ => None,
                }
            })
            .collect();
        for id in expired {
            self.destroy(&id, true);
        }
    }

    fn poll_promises(&self) {
        let ids: Vec<InstanceId> = self.promises.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            let outcome = {
                let entry = match self.promises.get(&id) {
                    Some(e) => e,
                    None => continue,
                };
                let mut guard = entry.lock();
                match guard.as_mut() {
                    Some(future) => {
                        let waker = futures::task::noop_waker();
                        let mut cx = std::task::Context::from_waker(&waker);
                        match std::future::Future::poll(future.as_mut(), &mut cx) {
                            Poll::Ready(result) => Some(result),
                            Poll::Pending => None,
                        }
                    }
                    None => None,
                }
            };

            let Some(result) = outcome else {
                if let Some(instance) = self.instances.get(&id) {
                    if instance.meta().promise_status() == PromiseStatus::Idle {
                        instance.meta().set_promise_status(PromiseStatus::Loading);
                    }
                }
                continue;
            };

            if let Some(instance) = self.instances.get(&id) {
                match result {
                    Ok(()) => instance.meta().set_promise_status(PromiseStatus::Success),
                    Err(e) => {
                        instance.meta().set_promise_status(PromiseStatus::Error);
                        self.event_log.push(
                            EventAction::ListenerThrew {
                                id: id.clone(),
                                message: e.to_string(),
                            },
                            self.now(),
                        );
                    }
                }
                // Per SPEC_FULL.md §3: "Active <-> Stale governed by
                // promise state" — a settled promise (success or error)
                // clears the Stale state the pending promise put it in.
                if instance.meta().active_state() == ActiveState::Stale {
                    instance.meta().set_active_state(ActiveState::Active);
                    self.event_log.push(
                        EventAction::InstanceActiveStateChanged { id: id.clone(), from: "Stale", to: "Active" },
                        self.now(),
                    );
                }
            }
            self.promises.remove(&id);
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.registry.contains(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Type-erased lookup of a live instance by node id, per SPEC_FULL.md
    /// §4.1's `getNodeById`. Returns `None` for external-subscriber nodes —
    /// those aren't instances, they're callbacks — and for unknown/
    /// already-destroyed instance ids.
    pub fn get_node_by_id(&self, id: &NodeId) -> Option<Arc<dyn AnyInstance>> {
        match id {
            NodeId::Instance(iid) => self.instances.get(iid).map(|entry| entry.clone()),
            NodeId::External(_) => None,
        }
    }

    /// Append an event directly to the devtools event log, per
    /// SPEC_FULL.md §4.1's `log` passthrough. Used by host integrations
    /// that want to interleave their own events (e.g. a router navigation)
    /// with the engine's own.
    pub fn log(&self, action: EventAction) {
        self.event_log.push(action, self.now());
    }
}

/// One entry in a batch passed to [`Ecosystem::overrides`]: either install a
/// replacement template under a key, or clear whatever override currently
/// sits on that key.
pub enum OverrideChange {
    Set {
        key: TemplateKey,
        template: Arc<dyn Any + Send + Sync>,
    },
    Clear {
        key: TemplateKey,
    },
}

impl OverrideChange {
    pub fn set<P, T>(template: Arc<AtomTemplate<P, T>>) -> Self
    where
        P: Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        OverrideChange::Set {
            key: template.key.clone(),
            template: template as Arc<dyn Any + Send + Sync>,
        }
    }

    pub fn clear(key: impl Into<TemplateKey>) -> Self {
        OverrideChange::Clear { key: key.into() }
    }
}
