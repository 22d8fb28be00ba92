//! Parameterized atom families, the idiomatic-Rust counterpart of
//! `jotai/src/vanilla/utils/atomFamily.ts`.
//!
//! Reference: the teacher's `AtomFamily<P, T>` kept its own
//! `HashMap<P, (Atom<T>, i64)>` cache alongside a `should_remove` closure,
//! because the teacher's `Atom<T>` had no built-in per-params identity.
//! SPEC_FULL.md §3 invariant 1 already makes instance identity a pure
//! function of `(templateKey, paramsHash)`, so a family needs none of that
//! bookkeeping: it's just [`AtomTemplate`] itself, one template whose
//! factory is parameterized over `P`. This module exists to document that
//! equivalence and to give family-style call sites (`family(p)`,
//! `atom_family::remove(eco, &family, p)`) the naming the rest of the
//! corpus expects.

use crate::ecosystem::Ecosystem;
use crate::error::Result;
use crate::ids::TemplateKey;
use crate::injection::Injection;
use crate::template::{atom, AtomResult, AtomTemplate};
use std::hash::Hash;
use std::sync::Arc;

/// Build a family: one template whose instances are keyed by `params`.
/// Equivalent to calling [`crate::template::atom`] directly — provided so a
/// family reads, at the call site, as a distinct concept from an
/// unparameterized derived atom.
pub fn atom_family<P, T, F>(key: impl Into<TemplateKey>, factory: F) -> Arc<AtomTemplate<P, T>>
where
    P: Clone + Send + Sync + Hash + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(&Injection, P) -> Result<AtomResult<T>> + Send + Sync + 'static,
{
    Arc::new(atom(key, factory))
}

/// Evict a single member of a family, the family-scoped counterpart of
/// `Ecosystem::destroy`. A no-op if that member was never materialized
/// (resolving it here just to destroy it immediately would be wasteful and
/// wrong — it would recreate the very instance being removed — so this
/// looks the id up through `Ecosystem::count_instances_of`'s sibling path
/// instead of calling `resolve_instance`).
pub fn remove<P, T>(ecosystem: &Ecosystem, family: &Arc<AtomTemplate<P, T>>, params: &P)
where
    P: Clone + Send + Sync + Hash + 'static,
    T: Clone + Send + Sync + 'static,
{
    let hash = crate::ids::hash_params(params);
    ecosystem.destroy_by_key_and_hash(family.key(), hash);
}
