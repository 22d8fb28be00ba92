//! Atom templates: the immutable descriptor atoms are created from.
//!
//! Reference: teacher's `atom()`/`atom_writable()` constructors and `Atom<T>`
//! struct in `jotai-rs/src/atom.rs` — kept as the entry-point shape
//! (free functions returning a handle you register), generalized per
//! SPEC_FULL.md §3 to add params (`P`), scope, flags, and a factory that
//! runs under an injection context instead of a bare read/compute closure.

use crate::error::Result;
use crate::injection::Injection;
use std::sync::Arc;
use std::time::Duration;

/// Where a template's instances are cached, per SPEC_FULL.md §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// One instance per (template, params) in this ecosystem. The default.
    App,
    /// Never evicted by ttl regardless of dependent count; used for
    /// ecosystem-wide singletons.
    Global,
    /// Reserved for a future per-subtree scoping mechanism (SPEC_FULL.md
    /// §3 lists `Local` alongside `App`/`Global` without specifying subtree
    /// semantics beyond "narrower than App"); treated as `App` until a
    /// scoping mechanism is designed. See DESIGN.md, "Scope::Local".
    Local,
}

/// Per-template behavior flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateFlags {
    /// If true, instances never auto-destroy on zero dependents regardless
    /// of ttl (overrides `Scope::Global`'s implicit pin too, for templates
    /// that want App scope but manual lifetime control via `get_instance`
    /// + explicit `ecosystem.destroy`).
    pub manual_destroy: bool,
}

/// What a factory hands back to the engine, per SPEC_FULL.md §4.3 step 5.
pub enum AtomResult<T> {
    /// A plain value: the engine wraps it in its own
    /// [`crate::state_holder::SimpleStateHolder`].
    Value(T),
    /// The factory brought its own state holder (e.g. adopting an external
    /// store), which the engine uses as-is.
    Holder(Box<dyn crate::state_holder::StateHolder<T>>),
}

impl<T> From<T> for AtomResult<T> {
    fn from(value: T) -> Self {
        AtomResult::Value(value)
    }
}

pub type Factory<P, T> =
    Arc<dyn Fn(&Injection, P) -> Result<AtomResult<T>> + Send + Sync>;

/// The immutable descriptor an atom's instances are materialized from.
/// Templates are registered once with the ecosystem and never mutated
/// after that (an `Ecosystem::overrides` swap replaces the whole template,
/// it doesn't mutate this struct in place).
pub struct AtomTemplate<P, T> {
    pub key: crate::ids::TemplateKey,
    pub scope: Scope,
    pub flags: TemplateFlags,
    pub ttl: Option<Duration>,
    pub max_instances: Option<usize>,
    /// Declares every instance of this template non-writable regardless of
    /// whether its factory adopts a holder via [`AtomResult::Holder`], per
    /// SPEC_FULL.md §6's template descriptor `readonly?: bool` field.
    /// Enforced by `Ecosystem::set`.
    pub readonly: bool,
    pub factory: Factory<P, T>,
}

impl<P, T> AtomTemplate<P, T> {
    pub fn key(&self) -> &crate::ids::TemplateKey {
        &self.key
    }
}

/// Build a read-only (or self-contained-writable-via-holder) template, the
/// generalized counterpart of the teacher's `atom(initial)` /
/// `atom(|get| ...)` constructors.
pub fn atom<P, T, F>(key: impl Into<crate::ids::TemplateKey>, factory: F) -> AtomTemplate<P, T>
where
    F: Fn(&Injection, P) -> Result<AtomResult<T>> + Send + Sync + 'static,
{
    AtomTemplate {
        key: key.into(),
        scope: Scope::App,
        flags: TemplateFlags::default(),
        ttl: None,
        max_instances: None,
        readonly: false,
        factory: Arc::new(factory),
    }
}

/// Convenience constructor for a primitive (non-derived) atom: the factory
/// ignores `Injection` entirely and just returns a plain starting value.
/// Mirrors the teacher's `atom(initial_value)` overload in `atom.rs`.
pub fn primitive<P, T>(key: impl Into<crate::ids::TemplateKey>, initial: T) -> AtomTemplate<P, T>
where
    P: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    let initial = Arc::new(initial);
    atom(key, move |_injection, _params: P| {
        Ok(AtomResult::Value((*initial).clone()))
    })
}

impl<P, T> AtomTemplate<P, T> {
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = Some(max);
        self
    }

    pub fn with_flags(mut self, flags: TemplateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_factory_ignores_params_and_injection() {
        let template: AtomTemplate<(), i32> = primitive("count", 0);
        assert_eq!(template.key().as_str(), "count");
        assert!(matches!(template.scope, Scope::App));
    }

    #[test]
    fn builder_methods_set_fields() {
        let template: AtomTemplate<(), i32> = primitive("count", 0)
            .with_scope(Scope::Global)
            .with_ttl(Duration::from_secs(5))
            .with_max_instances(10);
        assert!(matches!(template.scope, Scope::Global));
        assert_eq!(template.ttl, Some(Duration::from_secs(5)));
        assert_eq!(template.max_instances, Some(10));
    }

    #[test]
    fn templates_default_to_writable_but_can_opt_into_readonly() {
        let template: AtomTemplate<(), i32> = primitive("count", 0);
        assert!(!template.readonly);

        let readonly_template: AtomTemplate<(), i32> = primitive("count", 0).with_readonly(true);
        assert!(readonly_template.readonly);
    }
}
