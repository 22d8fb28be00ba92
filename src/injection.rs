//! The injection context: the per-factory-run API (`get`, `get_instance`,
//! `store`, `effect`, `reference`, `memo`, `ttl`, `promise`, `exports`),
//! per SPEC_FULL.md §4.4.
//!
//! Reference: teacher's `Getter`/`Setter` traits in `jotai-rs/src/types.rs`
//! declared *generic* trait methods (`fn get<T>(&self, atom: &Atom<T>) ->
//! T`), which makes them non-object-safe — the teacher's own code never
//! actually constructs a `&dyn Getter`, because it can't. [`Injection`]
//! fixes this by being a concrete struct with generic methods rather than
//! a trait at all: there's no need to erase it behind `dyn`, since every
//! factory is always called with a concrete, fully-typed one.

use crate::ecosystem::Ecosystem;
use crate::error::Result;
use crate::flags::EdgeFlags;
use crate::ids::{hash_params, InstanceId};
use crate::instance::{Destructor, Instance};
use crate::state_holder::SimpleStateHolder;
use crate::template::AtomTemplate;
use parking_lot::Mutex;
use std::any::Any;
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// An edge recorded during one factory run, committed by the ecosystem once
/// the factory returns (SPEC_FULL.md §4.3 step 4).
pub struct RecordedEdge {
    pub to: InstanceId,
    pub flags: EdgeFlags,
}

/// `reference`/`memo`/`effect` slots, persisted across recomputes of the
/// same instance. Matched to calls by position, the same contract as
/// React's Rules of Hooks: these must be called unconditionally and in the
/// same order on every run of a given factory.
#[derive(Default)]
pub struct InjectionSlots {
    refs: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
    memos: Mutex<Vec<(u64, Arc<dyn Any + Send + Sync>)>>,
    pub(crate) effects: Mutex<Vec<(u64, Option<Destructor>)>>,
}

impl InjectionSlots {
    pub fn new() -> Self {
        Self::default()
    }
}

/// An `injection.effect(..)` call queued during a factory run, applied by
/// the ecosystem once the factory's value/edges/ttl/exports/promise are all
/// committed, per SPEC_FULL.md §4.5's "effect(fn): registers fn to run
/// after the factory returns".
pub(crate) struct PendingEffect {
    pub(crate) idx: usize,
    pub(crate) dep_hash: u64,
    pub(crate) run: Box<dyn FnOnce() -> Option<Destructor>>,
}

/// Future type used by [`Injection::promise`]. Already boxed/pinned since a
/// single instance may attach at most one live promise and type erasure is
/// unavoidable once it's stored outside the generic factory call.
pub type BoxedPromise = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

pub struct Injection<'a> {
    ecosystem: &'a Ecosystem,
    instance_id: InstanceId,
    recorded: Mutex<Vec<RecordedEdge>>,
    slots: Arc<InjectionSlots>,
    ref_cursor: Cell<usize>,
    memo_cursor: Cell<usize>,
    effect_cursor: Cell<usize>,
    pending_ttl: Mutex<Option<Duration>>,
    pending_exports: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    pending_promise: Mutex<Option<BoxedPromise>>,
    pending_readonly: Mutex<bool>,
    pending_effects: Mutex<Vec<PendingEffect>>,
}

impl<'a> Injection<'a> {
    pub(crate) fn new(ecosystem: &'a Ecosystem, instance_id: InstanceId, slots: Arc<InjectionSlots>) -> Self {
        Injection {
            ecosystem,
            instance_id,
            recorded: Mutex::new(Vec::new()),
            slots,
            ref_cursor: Cell::new(0),
            memo_cursor: Cell::new(0),
            effect_cursor: Cell::new(0),
            pending_ttl: Mutex::new(None),
            pending_exports: Mutex::new(None),
            pending_promise: Mutex::new(None),
            pending_readonly: Mutex::new(false),
            pending_effects: Mutex::new(Vec::new()),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Resolve (constructing if necessary) `template`'s instance for
    /// `params`, read its current value, and record an `Explicit` edge:
    /// this instance recomputes whenever the dependency's value changes.
    pub fn get<P, T>(&self, template: &Arc<AtomTemplate<P, T>>, params: P) -> Result<T>
    where
        P: Clone + Send + Sync + std::hash::Hash + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let instance = self.ecosystem.resolve_instance(template, params)?;
        self.recorded.lock().push(RecordedEdge {
            to: instance.meta.id.clone(),
            flags: EdgeFlags::EXPLICIT,
        });
        Ok(instance.get())
    }

    /// Resolve `template`'s instance for `params` without subscribing to
    /// its value: records a `Static` edge, so this instance is notified of
    /// the dependency's existence/destruction but not its `stateChanged`
    /// events, and pins the dependency's lifetime symmetrically while this
    /// edge exists (SPEC_FULL.md §9, "Static edge lifetime policy").
    pub fn get_instance<P, T>(
        &self,
        template: &Arc<AtomTemplate<P, T>>,
        params: P,
    ) -> Result<Arc<Instance<P, T>>>
    where
        P: Clone + Send + Sync + std::hash::Hash + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let instance = self.ecosystem.resolve_instance(template, params)?;
        self.recorded.lock().push(RecordedEdge {
            to: instance.meta.id.clone(),
            flags: EdgeFlags::STATIC,
        });
        Ok(instance)
    }

    /// Hand the factory a pre-built state holder it can adopt as its own
    /// (by returning `AtomResult::Holder(..)`) instead of letting the
    /// engine wrap a plain value, per SPEC_FULL.md §4.4's
    /// `store(initial, readonly?)` hook. `readonly=true` forces the
    /// resulting instance non-writable even though it adopts a holder —
    /// `Ecosystem::set` checks this the same way it checks a template-level
    /// `readonly` flag.
    pub fn store<T: Clone + Send + Sync + 'static>(
        &self,
        initial: T,
        readonly: bool,
    ) -> Arc<SimpleStateHolder<T>> {
        if readonly {
            *self.pending_readonly.lock() = true;
        }
        Arc::new(SimpleStateHolder::new(initial))
    }

    /// A value that persists across recomputes of this instance,
    /// initialized once on the first call at this position. Mirrors
    /// `useRef`, the closest established prior art for "state that
    /// survives a recompute but isn't itself reactive".
    pub fn reference<T, F>(&self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let idx = self.ref_cursor.get();
        self.ref_cursor.set(idx + 1);
        let mut refs = self.slots.refs.lock();
        if idx < refs.len() {
            refs[idx]
                .clone()
                .downcast::<T>()
                .expect("reference() type must stay stable across recomputes at the same call position")
        } else {
            let value: Arc<T> = Arc::new(init());
            refs.push(value.clone());
            value
        }
    }

    /// A value recomputed only when `deps` changes from the previous run
    /// (structural hash comparison), per SPEC_FULL.md §4.4's `memo` hook.
    pub fn memo<D, T, F>(&self, deps: &D, compute: F) -> Arc<T>
    where
        D: std::hash::Hash,
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let idx = self.memo_cursor.get();
        self.memo_cursor.set(idx + 1);
        let dep_hash = hash_params(deps);
        let mut memos = self.slots.memos.lock();
        if idx < memos.len() {
            if memos[idx].0 == dep_hash {
                return memos[idx]
                    .1
                    .clone()
                    .downcast::<T>()
                    .expect("memo() type must stay stable across recomputes at the same call position");
            }
            let value: Arc<T> = Arc::new(compute());
            memos[idx] = (dep_hash, value.clone());
            value
        } else {
            let value: Arc<T> = Arc::new(compute());
            memos.push((dep_hash, value.clone()));
            value
        }
    }

    /// Register a side effect that reruns only when `deps` changes from the
    /// previous run (the same dependency-array contract as React's
    /// `useEffect`). Per SPEC_FULL.md §4.5 ("effect(fn): registers fn to
    /// run after the factory returns"), `f` itself is NOT invoked here —
    /// it's queued and only applied once the ecosystem has committed this
    /// run's value/edges/ttl/exports/promise, the same way `ttl`/`exports`/
    /// `promise` are staged via `pending_*` and drained post-commit. The
    /// previous run's cleanup (if any) runs immediately before the new
    /// effect body at that point. The first time a given effect slot fires,
    /// its eventual cleanup is additionally wired into the instance's own
    /// destructor list, so it also runs on instance destruction.
    pub fn effect<D, F>(&self, deps: &D, f: F)
    where
        D: std::hash::Hash,
        F: FnOnce() -> Option<Destructor> + 'static,
    {
        let idx = self.effect_cursor.get();
        self.effect_cursor.set(idx + 1);
        let dep_hash = hash_params(deps);

        let unchanged = self
            .slots
            .effects
            .lock()
            .get(idx)
            .map(|(prev_hash, _)| *prev_hash == dep_hash)
            .unwrap_or(false);
        if unchanged {
            return;
        }

        self.pending_effects.lock().push(PendingEffect {
            idx,
            dep_hash,
            run: Box::new(f),
        });
    }

    /// Override this instance's ttl for the remainder of its life (applied
    /// once the factory returns), per SPEC_FULL.md §4.4's `ttl` hook.
    pub fn ttl(&self, duration: Duration) {
        *self.pending_ttl.lock() = Some(duration);
    }

    /// Attach arbitrary exported data alongside this instance's value,
    /// retrievable via `Ecosystem::exports_of`.
    pub fn exports<T: Send + Sync + 'static>(&self, value: T) {
        *self.pending_exports.lock() = Some(Arc::new(value));
    }

    /// Attach a future this instance's `promiseStatus` tracks
    /// (idle -> loading -> success/error), advisory only — the engine
    /// never blocks waiting on it; it only advances when `Ecosystem::tick`
    /// polls it. The future is responsible for committing whatever value
    /// it resolves to (typically by capturing this instance's own state
    /// holder), per SPEC_FULL.md §4.6.
    pub fn promise<F>(&self, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        *self.pending_promise.lock() = Some(Box::pin(future));
    }

    pub(crate) fn take_recorded(&self) -> Vec<RecordedEdge> {
        std::mem::take(&mut self.recorded.lock())
    }

    pub(crate) fn take_pending_ttl(&self) -> Option<Duration> {
        self.pending_ttl.lock().take()
    }

    pub(crate) fn take_pending_exports(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.pending_exports.lock().take()
    }

    pub(crate) fn take_pending_promise(&self) -> Option<BoxedPromise> {
        self.pending_promise.lock().take()
    }

    pub(crate) fn take_pending_readonly(&self) -> bool {
        std::mem::replace(&mut *self.pending_readonly.lock(), false)
    }

    pub(crate) fn take_pending_effects(&self) -> Vec<PendingEffect> {
        std::mem::take(&mut *self.pending_effects.lock())
    }
}
