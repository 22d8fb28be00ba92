//! The dependency graph: edges between nodes, weights, and the BFS that
//! orders a notification flush.
//!
//! Reference: the teacher has no cross-atom graph at all (`jotai-rs` only
//! tracks mount/unmount callback lists per atom in `store.rs`); this module
//! is grounded instead on `examples/other_examples/.../reactor.rs`'s
//! subscriber-fanout shape and on SPEC_FULL.md §3/§4.2, generalized from a
//! flat callback list into a real directed graph with weighted ordering.
//!
//! ## Edge direction (resolving an ambiguity in the distilled spec)
//!
//! SPEC_FULL.md §4.3 describes construction as recording "an incoming edge
//! from the callee into the caller", and its weight formula is "1 + sum of
//! weights of incoming atom-instance edges". Taking `from` as the callee
//! (the dependency) and `to` as the caller (the dependent) is the only
//! reading under which that weight formula comes out topologically
//! sensible: a node's weight must grow with the depth of *its own*
//! dependencies, not with how many things depend on it, or the ascending-
//! weight tiebreak in notification order would fire a derived atom before
//! the thing it derives from. This module commits to that reading:
//!
//! - `from`: the dependency (the atom being read)
//! - `to`: the dependent (an atom instance, or an external subscriber)
//!
//! which also makes the `Static`/`External` edge flags cohere: both
//! describe the `to` (receiving) endpoint, never `from`. See DESIGN.md,
//! "Edge direction".

use crate::ids::{InstanceId, NodeId};
use crate::flags::EdgeFlags;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A callback invoked when the edge's `to` endpoint should react to a
/// `stateChanged` notification. Atom-to-atom edges leave this `None` — a
/// dependent atom instance reacts via its own `recompute`, found through the
/// node registry rather than stored on the edge. External-subscriber edges
/// always carry one: it's the callback the host passed to
/// `Ecosystem::subscribe`.
pub type EdgeNotify = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct Edge {
    pub from: InstanceId,
    pub to: NodeId,
    pub flags: EdgeFlags,
    pub operation: String,
    pub notify: Option<EdgeNotify>,
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("flags", &self.flags)
            .field("operation", &self.operation)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

/// Directed, weighted dependency graph. Owned by the
/// [`crate::ecosystem::Ecosystem`]; every atom instance and external
/// subscriber is a node, every `injection.get`/`get_instance`/`subscribe`
/// call is an edge.
#[derive(Default)]
pub struct Graph {
    /// `outgoing[from]` = edges where `from` is the dependency, i.e. the
    /// dependents of `from`.
    outgoing: DashMap<InstanceId, HashMap<NodeId, Edge>>,
    /// `incoming[to]` = edges where `to` is the dependent, i.e. the
    /// dependencies of `to`.
    incoming: DashMap<NodeId, HashMap<InstanceId, Edge>>,
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            outgoing: DashMap::new(),
            incoming: DashMap::new(),
        }
    }

    /// Add (or strengthen, if it already exists) an edge. Per SPEC_FULL.md
    /// §4.2: re-adding an existing edge merges flags rather than
    /// duplicating the edge.
    pub fn add_edge(
        &self,
        from: InstanceId,
        to: NodeId,
        flags: EdgeFlags,
        operation: impl Into<String>,
    ) {
        self.add_edge_with_notify(from, to, flags, operation, None)
    }

    /// Same as [`Graph::add_edge`], additionally attaching a notify callback
    /// on first insert. Used for external-subscriber edges, where `notify`
    /// is the host's callback. Per SPEC_FULL.md §4.2: re-adding an existing
    /// edge OR-merges its flags but never replaces its notify callback.
    pub fn add_edge_with_notify(
        &self,
        from: InstanceId,
        to: NodeId,
        flags: EdgeFlags,
        operation: impl Into<String>,
        notify: Option<EdgeNotify>,
    ) {
        let mut out = self.outgoing.entry(from.clone()).or_default();
        if let Some(existing) = out.get_mut(&to) {
            existing.flags |= flags;
            if let Some(mut inc) = self.incoming.get_mut(&to) {
                if let Some(existing) = inc.get_mut(&from) {
                    existing.flags |= flags;
                }
            }
            return;
        }
        let edge = Edge {
            from: from.clone(),
            to: to.clone(),
            flags,
            operation: operation.into(),
            notify,
        };
        out.insert(to.clone(), edge.clone());
        drop(out);
        self.incoming.entry(to).or_default().insert(from, edge);
    }

    /// Remove a single edge. Returns `true` if it existed.
    pub fn remove_edge(&self, from: &InstanceId, to: &NodeId) -> bool {
        let removed = self
            .outgoing
            .get_mut(from)
            .map(|mut m| m.remove(to).is_some())
            .unwrap_or(false);
        if let Some(mut m) = self.incoming.get_mut(to) {
            m.remove(from);
        }
        removed
    }

    /// Remove every edge touching `id`, in either direction. Used on
    /// instance destruction (SPEC_FULL.md §4.5 step 2: "remove all of its
    /// edges, in both directions").
    pub fn remove_all_edges_of(&self, id: &InstanceId) {
        let node_id = NodeId::Instance(id.clone());
        if let Some((_, outs)) = self.outgoing.remove(id) {
            for to in outs.keys() {
                if let Some(mut m) = self.incoming.get_mut(to) {
                    m.remove(id);
                }
            }
        }
        if let Some((_, ins)) = self.incoming.remove(&node_id) {
            for from in ins.keys() {
                if let Some(mut m) = self.outgoing.get_mut(from) {
                    m.remove(&node_id);
                }
            }
        }
    }

    /// The direct dependents of `id` (nodes with an edge `id -> dependent`).
    pub fn dependents_of(&self, id: &InstanceId) -> Vec<Edge> {
        self.outgoing
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The notify callback attached to whichever incoming edge of `to`
    /// carries one. Used to deliver a `stateChanged` notification to an
    /// external subscriber node once its atom dependency has changed.
    pub fn notify_callback(&self, to: &NodeId) -> Option<EdgeNotify> {
        self.incoming
            .get(to)
            .and_then(|m| m.values().find_map(|edge| edge.notify.clone()))
    }

    /// The direct dependencies of `id` (nodes with an edge `dependency ->
    /// id`).
    pub fn dependencies_of(&self, id: &NodeId) -> Vec<Edge> {
        self.incoming
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// How many nodes currently depend on `id`. Zero means `id` is eligible
    /// for ttl scheduling (SPEC_FULL.md §4.5).
    pub fn dependent_count(&self, id: &InstanceId) -> usize {
        self.outgoing.get(id).map(|m| m.len()).unwrap_or(0)
    }

    /// `1 + sum(weight(dep))` over `id`'s own atom-instance dependencies.
    /// Memoized per call since the graph is acyclic by construction
    /// (SPEC_FULL.md §3 invariant 3): a cycle could only form if a
    /// factory read an atom that itself (transitively) wasn't constructed
    /// yet, which the single-threaded construction order forbids.
    pub fn weight(&self, id: &InstanceId) -> u32 {
        let mut memo = HashMap::new();
        self.weight_memo(id, &mut memo)
    }

    fn weight_memo(&self, id: &InstanceId, memo: &mut HashMap<InstanceId, u32>) -> u32 {
        if let Some(w) = memo.get(id) {
            return *w;
        }
        // Insert a provisional value before recursing so a malformed graph
        // (should never happen, see above) degrades to a bounded weight
        // rather than a stack overflow.
        memo.insert(id.clone(), 1);
        let sum: u32 = self
            .dependencies_of(&NodeId::Instance(id.clone()))
            .iter()
            .map(|edge| self.weight_memo(&edge.from, memo))
            .sum();
        let weight = 1 + sum;
        memo.insert(id.clone(), weight);
        weight
    }

    /// Direct dependents of `id`, for `destroyed` propagation (SPEC_FULL.md
    /// §4.5): each dependent decides individually how to react (recompute,
    /// retract the edge, or self-destruct under `Static`/required-parent
    /// semantics), so no transitive BFS is needed here.
    pub fn direct_dependents_for_destroy(&self, id: &InstanceId) -> Vec<Edge> {
        self.dependents_of(id)
    }

    /// Transitive dependents of `id` reachable via non-`Static` edges,
    /// ordered for a `stateChanged` flush: atom instances ascending by
    /// weight, external subscribers last (SPEC_FULL.md §4.2 "Notification
    /// ordering"). A `Static` edge is a dead end for this traversal — its
    /// receiver doesn't react to `stateChanged`, so nothing downstream of
    /// it through *this* change can have changed either.
    pub fn affected_order(&self, changed: &InstanceId) -> Vec<NodeId> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<InstanceId> = VecDeque::new();
        let mut atom_weights: Vec<(InstanceId, u32)> = Vec::new();
        let mut externals: Vec<NodeId> = Vec::new();

        for edge in self.dependents_of(changed) {
            if edge.flags.is_static() {
                continue;
            }
            if let NodeId::Instance(iid) = &edge.to {
                if visited.insert(edge.to.clone()) {
                    queue.push_back(iid.clone());
                }
            } else if visited.insert(edge.to.clone()) {
                externals.push(edge.to.clone());
            }
        }

        while let Some(iid) = queue.pop_front() {
            atom_weights.push((iid.clone(), self.weight(&iid)));
            for edge in self.dependents_of(&iid) {
                if edge.flags.is_static() {
                    continue;
                }
                if visited.insert(edge.to.clone()) {
                    match edge.to {
                        NodeId::Instance(next) => queue.push_back(next),
                        NodeId::External(_) => externals.push(edge.to),
                    }
                }
            }
        }

        atom_weights.sort_by_key(|(_, w)| *w);
        let mut order: Vec<NodeId> = atom_weights
            .into_iter()
            .map(|(id, _)| NodeId::Instance(id))
            .collect();
        order.extend(externals);
        order
    }
}
