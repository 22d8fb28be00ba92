//! # Atomix Engine
//!
//! A reactive atomic state engine: an [`Ecosystem`] materializes
//! [`AtomTemplate`]s into live [`instance::Instance`]s on demand, tracks the
//! dependency graph those reads create, and replays a topologically-ordered
//! notification flush whenever a writable atom changes.
//!
//! **Reference**: this crate started life as a from-scratch Rust port of
//! Jotai's vanilla store; it has since grown a full instance lifecycle,
//! ttl-based eviction, overrides, and an append-only devtools event log on
//! top of that foundation.
//!
//! ## Core Concepts
//!
//! - **Templates**: immutable descriptors (`AtomTemplate<P, T>`) atoms are
//!   materialized from, keyed by a caller-chosen string and indexed by
//!   params.
//! - **Instances**: the live materialization of a template for one set of
//!   params, with its own lifecycle (`Initializing -> Active <-> Stale ->
//!   Destroyed`).
//! - **Ecosystem**: the root container — resolution, the dependency graph,
//!   the notification flush, ttl sweeping, and overrides.
//! - **Injection**: the API a template's factory runs under (`get`,
//!   `get_instance`, `store`, `reference`, `memo`, `effect`, `ttl`,
//!   `exports`, `promise`).
//!
//! ## Example
//!
//! ```
//! use atomix_engine::{Ecosystem, EcosystemConfig};
//! use atomix_engine::template::{atom, primitive};
//! use atomix_engine::state_holder::Settable;
//! use std::sync::Arc;
//!
//! let ecosystem = Ecosystem::new(EcosystemConfig::default());
//!
//! let count = Arc::new(primitive::<(), i32>("count", 0));
//! let double = Arc::new(atom("double", {
//!     let count = count.clone();
//!     move |injection, _params: ()| {
//!         let value = injection.get(&count, ())?;
//!         Ok((value * 2).into())
//!     }
//! }));
//!
//! let count_instance = ecosystem.resolve_instance(&count, ()).unwrap();
//! let double_instance = ecosystem.resolve_instance(&double, ()).unwrap();
//! assert_eq!(double_instance.get(), 0);
//!
//! ecosystem.set(&count_instance, Settable::Value(5)).unwrap();
//! assert_eq!(double_instance.get(), 10);
//! ```

pub mod clock;
pub mod config;
pub mod ecosystem;
pub mod error;
pub mod event_log;
pub mod flags;
pub mod graph;
pub mod ids;
pub mod injection;
pub mod instance;
pub mod registry;
pub mod state_holder;
pub mod template;
pub mod utils;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::EcosystemConfig;
pub use ecosystem::{Ecosystem, OverrideChange};
pub use error::{EngineError, Result};
pub use injection::Injection;
pub use instance::{ActiveState, Instance, PromiseStatus};
pub use template::{atom, primitive, AtomResult, AtomTemplate, Scope, TemplateFlags};

pub use utils::{atom_family::atom_family, select_atom::select_atom};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_holder::Settable;

    #[test]
    fn end_to_end_counter_and_derived_atom() {
        let ecosystem = Ecosystem::new(EcosystemConfig::default());

        let count = std::sync::Arc::new(primitive::<(), i32>("count", 0));
        let double = std::sync::Arc::new(atom("double", {
            let count = count.clone();
            move |injection: &Injection, _params: ()| {
                let value = injection.get(&count, ())?;
                Ok((value * 2).into())
            }
        }));

        let count_instance = ecosystem.resolve_instance(&count, ()).unwrap();
        let double_instance = ecosystem.resolve_instance(&double, ()).unwrap();
        assert_eq!(double_instance.get(), 0);

        ecosystem.set(&count_instance, Settable::Value(5)).unwrap();
        assert_eq!(count_instance.get(), 5);
        assert_eq!(double_instance.get(), 10);
    }
}
