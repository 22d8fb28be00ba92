//! Error types for the engine.
//!
//! Reference: teacher's `jotai-rs/src/error.rs` (`AtomError`). The taxonomy is
//! widened here to the full error surface of SPEC_FULL.md §7, but the shape
//! — a single `thiserror`-backed enum plus a crate-wide `Result` alias — is
//! kept exactly as the teacher built it.

use crate::ids::{InstanceId, TemplateKey};
use thiserror::Error;

/// Errors surfaced by [`crate::Ecosystem`] and the types it hands out.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A template requires params and the caller supplied none, or the
    /// supplied params failed the template's own validation.
    #[error("template '{template_key}' requires params: {reason}")]
    InvalidParams {
        template_key: TemplateKey,
        reason: String,
    },

    /// An injection primitive (`get`, `store`, `effect`, ...) was called
    /// outside of an active factory run.
    #[error("injection primitive used outside of an active factory run")]
    InjectionOutOfScope,

    /// An operation targeted an instance that has already transitioned to
    /// `Destroyed`.
    #[error("instance '{instance_id}' has been destroyed")]
    InstanceDestroyed { instance_id: InstanceId },

    /// `Ecosystem::set` was called on an instance whose template returned a
    /// derived value (or whose holder/template was explicitly marked
    /// `readonly`) rather than an adopted writable holder.
    #[error("instance '{instance_id}' is read-only and cannot be set directly")]
    ReadOnlyInstance { instance_id: InstanceId },

    /// A factory, while resolving its own dependencies, transitively read
    /// an atom that is still `Initializing` and sits on the current
    /// injection stack.
    #[error("cyclic dependency detected while resolving '{instance_id}': {chain:?}")]
    CyclicDependency {
        instance_id: InstanceId,
        chain: Vec<InstanceId>,
    },

    /// A template's factory function returned an error. The instance is
    /// destroyed immediately and this error is rethrown to the original
    /// `get_node` caller.
    #[error("factory for '{instance_id}' failed: {message}")]
    FactoryThrew {
        instance_id: InstanceId,
        message: String,
    },

    /// A subscriber listener panicked or returned an error. Recorded in the
    /// event log; never rethrown, and never stops other listeners from
    /// running.
    #[error("listener for '{instance_id}' failed: {message}")]
    ListenerThrew {
        instance_id: InstanceId,
        message: String,
    },

    /// An instance's attached promise resolved with an error.
    #[error("promise for '{instance_id}' was rejected: {message}")]
    PromiseRejected {
        instance_id: InstanceId,
        message: String,
    },

    /// Two distinct factories were registered under the same template key
    /// without going through `Ecosystem::overrides`.
    #[error("template key '{0}' is already registered with a different factory")]
    DuplicateTemplateKey(TemplateKey),

    /// A template's `max_instances` cap was reached.
    #[error("template '{template_key}' has reached its max_instances cap of {limit}")]
    MaxInstancesExceeded { template_key: TemplateKey, limit: usize },

    /// Generic wrapper, used sparingly for user-supplied factory errors that
    /// don't need a structured variant.
    #[error("{0}")]
    Generic(String),
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn factory_threw(instance_id: InstanceId, error: impl std::fmt::Display) -> Self {
        EngineError::FactoryThrew {
            instance_id,
            message: error.to_string(),
        }
    }

    pub fn listener_threw(instance_id: InstanceId, error: impl std::fmt::Display) -> Self {
        EngineError::ListenerThrew {
            instance_id,
            message: error.to_string(),
        }
    }

    pub fn promise_rejected(instance_id: InstanceId, error: impl std::fmt::Display) -> Self {
        EngineError::PromiseRejected {
            instance_id,
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_threw_formats_instance_and_message() {
        let err = EngineError::factory_threw(InstanceId::from("count-0"), "boom");
        assert!(err.to_string().contains("count-0"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn cyclic_dependency_carries_chain() {
        let err = EngineError::CyclicDependency {
            instance_id: InstanceId::from("a-0"),
            chain: vec![InstanceId::from("a-0"), InstanceId::from("b-0")],
        };
        assert!(err.to_string().contains("cyclic dependency"));
    }
}
