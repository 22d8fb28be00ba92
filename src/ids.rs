//! Identifiers and parameter hashing.
//!
//! Reference: teacher's `jotai-rs/src/atom.rs` (`AtomId = usize`, a global
//! atomic counter) and `jotai-rs/src/types.rs` (`AtomId`, `EpochNumber`).
//! SPEC_FULL.md §3 replaces the bare integer id with a structured one —
//! `"{templateKey}-{paramsHash}"` — because instance identity here is a pure
//! function of (template, params), not of allocation order.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// The key a template is registered under. Stable across the ecosystem's
/// lifetime; chosen by the caller (e.g. `"count"`, `"todos/{id}"`), not
/// generated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateKey(pub(crate) String);

impl TemplateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateKey {
    fn from(s: &str) -> Self {
        TemplateKey(s.to_owned())
    }
}

impl From<String> for TemplateKey {
    fn from(s: String) -> Self {
        TemplateKey(s)
    }
}

/// A stable hash of a template's params, per SPEC_FULL.md §9 "Parameter
/// hashing": structural for plain data (anything `Hash + Eq`), identity for
/// opaque values (see [`ByPointer`]).
pub type ParamsHash = u64;

/// Hash `()` (the no-params case) to a fixed sentinel so unparameterized
/// templates always resolve to the same id.
pub fn hash_params<P: Hash>(params: &P) -> ParamsHash {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    params.hash(&mut hasher);
    hasher.finish()
}

/// Wrap a value that should be hashed/compared by pointer identity rather
/// than structural equality — e.g. a closure or a host object passed as an
/// atom parameter. Mirrors SPEC_FULL.md §9: "functions and opaque host
/// objects are hashed by identity. Document this; users must not use
/// anonymous closures as parameters [directly]."
#[derive(Clone)]
pub struct ByPointer<T: ?Sized>(pub std::sync::Arc<T>);

impl<T: ?Sized> PartialEq for ByPointer<T> {
    fn eq(&self, other: &Self) -> bool {
        std::sync::Arc::ptr_eq(&self.0, &other.0)
    }
}
impl<T: ?Sized> Eq for ByPointer<T> {}

impl<T: ?Sized> Hash for ByPointer<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (std::sync::Arc::as_ptr(&self.0) as *const () as usize).hash(state)
    }
}

/// The id of a live atom instance: `"{templateKey}-{paramsHash}"`, per
/// SPEC_FULL.md §3 invariant 1 ("Instance id is a pure function of
/// (templateKey, paramsHash)").
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) String);

impl InstanceId {
    pub(crate) fn new(template_key: &TemplateKey, params_hash: ParamsHash) -> Self {
        InstanceId(format!("{}-{:x}", template_key.0, params_hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The template key this instance was constructed from, recovered from
    /// the id's prefix. Used by the registry to resolve an id back to its
    /// template without a second lookup table.
    pub(crate) fn template_key_prefix(&self) -> &str {
        self.0.rsplit_once('-').map(|(k, _)| k).unwrap_or(&self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        InstanceId(s.to_owned())
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        InstanceId(s)
    }
}

/// Id for an external (host-framework) subscriber node. These never carry a
/// template, so they get a simple monotonic counter, matching the teacher's
/// `ATOM_ID_COUNTER` pattern in `atom.rs`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalId(pub(crate) u64);

static EXTERNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

impl ExternalId {
    pub(crate) fn next() -> Self {
        ExternalId(EXTERNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "external{}", self.0)
    }
}

/// Any node in the graph: an atom instance or an external subscriber.
/// `SelectorCacheNode` from SPEC_FULL.md §3 is modeled as an ordinary atom
/// instance whose template happens to memoize via equality (see
/// `utils::select_atom`) rather than as a third id kind — it needs no
/// distinct identity scheme, only distinct construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Instance(InstanceId),
    External(ExternalId),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Instance(id) => write!(f, "{id}"),
            NodeId::External(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_is_pure_function_of_template_and_hash() {
        let key = TemplateKey::from("count");
        let a = InstanceId::new(&key, hash_params(&()));
        let b = InstanceId::new(&key, hash_params(&()));
        assert_eq!(a, b);
    }

    #[test]
    fn different_params_hash_differently() {
        assert_ne!(hash_params(&1i32), hash_params(&2i32));
    }

    #[test]
    fn by_pointer_compares_identity_not_value() {
        let a = std::sync::Arc::new(42);
        let b = std::sync::Arc::new(42);
        assert!(ByPointer(a.clone()) != ByPointer(b));
        assert!(ByPointer(a.clone()) == ByPointer(a));
    }
}
