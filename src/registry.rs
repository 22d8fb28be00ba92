//! The node registry: a keyed table of every live graph node.
//!
//! Reference: teacher's `Store.atom_states: DashMap<AtomId, ...>`
//! (`jotai-rs/src/store.rs`) for the "concurrent table keyed by id" shape —
//! generalized per SPEC_FULL.md §2 "Node registry" from a single per-atom
//! value slot into a lightweight kind tag covering every node variant the
//! spec names (atom instances and external subscribers; selector-cache
//! nodes are atom instances constructed a particular way, see
//! `utils::select_atom`).

use crate::ids::NodeId;
use dashmap::DashMap;

/// What kind of node this id refers to. Bookkeeping for the node's payload
/// (state holder, edges, active-state machine, ...) lives in
/// [`crate::instance::Instance`] / [`crate::ecosystem::ExternalSubscriber`];
/// the registry only needs to answer "does this id exist, and as what".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    AtomInstance,
    ExternalSubscriber,
}

/// Keyed table of live nodes. Owned exclusively by the
/// [`crate::ecosystem::Ecosystem`] (SPEC_FULL.md §5: "Consumers never
/// mutate them directly; all mutation flows through Ecosystem methods").
#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<NodeId, NodeKind>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry {
            nodes: DashMap::new(),
        }
    }

    pub fn register(&self, id: NodeId, kind: NodeKind) {
        self.nodes.insert(id, kind);
    }

    pub fn unregister(&self, id: &NodeId) -> Option<NodeKind> {
        self.nodes.remove(id).map(|(_, kind)| kind)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn kind_of(&self, id: &NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ExternalId, InstanceId};

    #[test]
    fn register_and_look_up_roundtrips() {
        let registry = NodeRegistry::new();
        let id = NodeId::Instance(InstanceId::from("count-0"));
        registry.register(id.clone(), NodeKind::AtomInstance);
        assert!(registry.contains(&id));
        assert_eq!(registry.kind_of(&id), Some(NodeKind::AtomInstance));
    }

    #[test]
    fn unregister_removes_the_entry() {
        let registry = NodeRegistry::new();
        let id = NodeId::External(ExternalId::next());
        registry.register(id.clone(), NodeKind::ExternalSubscriber);
        assert!(registry.unregister(&id).is_some());
        assert!(!registry.contains(&id));
    }
}
