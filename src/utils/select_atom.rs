//! Selector memoization, the idiomatic-Rust counterpart of
//! `jotai/src/vanilla/utils/selectAtom.ts`.
//!
//! Reference: the teacher's own `select_atom` (`jotai-rs/src/utils/select_atom.rs`)
//! was a `todo!()` stub reasoning through the same self-referential-atom
//! problem the TypeScript original solves with `derivedAtom.init = EMPTY`.
//! This engine doesn't need that hack: SPEC_FULL.md §3 already models a
//! "SelectorCacheNode" as an ordinary atom instance, and [`Injection::reference`]
//! gives a factory a slot that survives recomputes — exactly the "previous
//! slice" storage selectAtom needs, without any atom-specific special case.

use crate::error::Result;
use crate::ids::TemplateKey;
use crate::template::{atom, AtomResult, AtomTemplate};
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;

/// Build a derived template that reads `source` (with fixed `source_params`),
/// applies `selector`, and only lets the resulting slice change (by
/// `==`-style identity under `equality_fn`) when it's genuinely unequal to
/// the previous one — consumers doing their own reference/equality checks
/// downstream see a stable value across source changes that don't affect
/// this particular slice.
pub fn select_atom<P, T, S, F, E>(
    key: impl Into<TemplateKey>,
    source: Arc<AtomTemplate<P, T>>,
    source_params: P,
    selector: F,
    equality_fn: E,
) -> AtomTemplate<(), S>
where
    P: Clone + Send + Sync + Hash + 'static,
    T: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    F: Fn(&T) -> S + Send + Sync + 'static,
    E: Fn(&S, &S) -> bool + Send + Sync + 'static,
{
    atom(key, move |injection, _params: ()| {
        let value = injection.get(&source, source_params.clone())?;
        let slice = selector(&value);

        let previous = injection.reference(|| Mutex::new(None::<S>));
        let mut previous = previous.lock();
        let stable = match previous.as_ref() {
            Some(prev) if equality_fn(prev, &slice) => prev.clone(),
            _ => slice,
        };
        *previous = Some(stable.clone());
        Ok(AtomResult::Value(stable))
    })
}

/// [`select_atom`] with `PartialEq`-based equality, the common case.
pub fn select_atom_default<P, T, S, F>(
    key: impl Into<TemplateKey>,
    source: Arc<AtomTemplate<P, T>>,
    source_params: P,
    selector: F,
) -> AtomTemplate<(), S>
where
    P: Clone + Send + Sync + Hash + 'static,
    T: Clone + Send + Sync + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&T) -> S + Send + Sync + 'static,
{
    select_atom(key, source, source_params, selector, |a, b| a == b)
}
