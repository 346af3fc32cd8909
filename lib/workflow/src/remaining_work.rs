//! Remaining work tracking for one execution.
//!
//! Every node starts PENDING with the set of distinct upstream nodes it
//! waits on:
//! - Nodes waiting on nothing are READY
//! - Completing a node releases its successors; a successor whose wait set
//!   empties becomes READY
//! - Failing a node SKIPS every node reachable from it; skipped nodes never
//!   become ready
//!
//! The ready set is ordered by node id so dispatch order is deterministic.

use crate::graph::WorkflowGraph;
use crate::node::NodeId;
use std::collections::{BTreeMap, BTreeSet};

/// The scheduling state of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for upstream nodes.
    Pending,
    /// Every upstream node completed; waiting for a slot.
    Ready,
    /// Dispatched, not yet finished.
    Running,
    Completed,
    Failed,
    /// Unreachable because an upstream node failed.
    Skipped,
}

impl NodeState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Ready/in-flight/done bookkeeping for one execution.
#[derive(Debug, Clone)]
pub struct RemainingWork {
    states: BTreeMap<NodeId, NodeState>,
    /// Upstream nodes not yet completed, per node.
    waiting_on: BTreeMap<NodeId, BTreeSet<NodeId>>,
    successors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Every node reachable from each node, for skip propagation.
    descendants: BTreeMap<NodeId, BTreeSet<NodeId>>,
    ready: BTreeSet<NodeId>,
    in_flight: BTreeSet<NodeId>,
}

impl RemainingWork {
    /// Creates the initial state: nodes without inbound edges are ready.
    #[must_use]
    pub fn from_graph(graph: &WorkflowGraph) -> Self {
        let mut states = BTreeMap::new();
        let mut waiting_on = BTreeMap::new();
        let mut successors = BTreeMap::new();
        let mut descendants = BTreeMap::new();
        let mut ready = BTreeSet::new();

        for node in graph.nodes() {
            let upstream = graph.predecessors(&node.id);
            if upstream.is_empty() {
                ready.insert(node.id.clone());
                states.insert(node.id.clone(), NodeState::Ready);
            } else {
                states.insert(node.id.clone(), NodeState::Pending);
            }
            waiting_on.insert(node.id.clone(), upstream);
            successors.insert(node.id.clone(), graph.successors(&node.id));
            descendants.insert(node.id.clone(), graph.descendants(&node.id));
        }

        Self {
            states,
            waiting_on,
            successors,
            descendants,
            ready,
            in_flight: BTreeSet::new(),
        }
    }

    /// Returns the ready set in dispatch order.
    #[must_use]
    pub fn ready(&self) -> &BTreeSet<NodeId> {
        &self.ready
    }

    /// Returns the nodes currently dispatched.
    #[must_use]
    pub fn in_flight(&self) -> &BTreeSet<NodeId> {
        &self.in_flight
    }

    /// Moves up to `limit` ready nodes, lowest ids first, to in-flight.
    pub fn take_ready(&mut self, limit: usize) -> Vec<NodeId> {
        let batch: Vec<NodeId> = self.ready.iter().take(limit).cloned().collect();
        for node_id in &batch {
            self.ready.remove(node_id);
            self.in_flight.insert(node_id.clone());
            self.states.insert(node_id.clone(), NodeState::Running);
        }
        batch
    }

    /// Marks an in-flight node completed and returns the nodes that became
    /// ready because of it, in ascending id order.
    pub fn mark_completed(&mut self, node_id: &NodeId) -> Vec<NodeId> {
        self.in_flight.remove(node_id);
        self.states.insert(node_id.clone(), NodeState::Completed);

        let mut released = Vec::new();
        let successors = self.successors.get(node_id).cloned().unwrap_or_default();
        for successor in successors {
            if self.states.get(&successor) != Some(&NodeState::Pending) {
                continue;
            }
            let Some(waiting) = self.waiting_on.get_mut(&successor) else {
                continue;
            };
            waiting.remove(node_id);
            if waiting.is_empty() {
                self.states.insert(successor.clone(), NodeState::Ready);
                self.ready.insert(successor.clone());
                released.push(successor);
            }
        }
        released
    }

    /// Marks an in-flight node failed and returns the nodes newly skipped
    /// because of it, in ascending id order.
    pub fn mark_failed(&mut self, node_id: &NodeId) -> Vec<NodeId> {
        self.in_flight.remove(node_id);
        self.states.insert(node_id.clone(), NodeState::Failed);

        let mut skipped = Vec::new();
        let downstream = self.descendants.get(node_id).cloned().unwrap_or_default();
        for descendant in downstream {
            let state = self.states.get(&descendant).copied();
            if matches!(state, Some(NodeState::Pending | NodeState::Ready)) {
                self.ready.remove(&descendant);
                self.states.insert(descendant.clone(), NodeState::Skipped);
                skipped.push(descendant);
            }
        }
        skipped
    }

    /// Returns the state of a node.
    #[must_use]
    pub fn state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.states.get(node_id).copied()
    }

    /// Returns the nodes currently in the given state, in ascending id order.
    #[must_use]
    pub fn nodes_in(&self, state: NodeState) -> Vec<NodeId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Returns true if any node failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.states.values().any(|s| *s == NodeState::Failed)
    }

    /// Returns true when nothing is ready and nothing is in flight.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty()
    }
}
