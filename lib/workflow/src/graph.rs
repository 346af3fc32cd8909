//! Workflow graph model using petgraph.
//!
//! The graph is a read-only view built once per execution from the persisted
//! definition:
//! - Nodes and connections live in contiguous arenas, addressed by index
//! - A petgraph `DiGraph` mirrors the connections whose endpoints both exist
//!
//! Connections referencing unknown nodes are kept in the arena so the
//! validator can report them, but they never become graph edges.

use crate::connection::{Connection, ResolvedConnection};
use crate::error::GraphError;
use crate::node::{Node, NodeId};
use crate::port::{InputPort, OutputPort};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use std::collections::{BTreeSet, HashMap};

/// A read-only workflow graph.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    /// Node weights are arena indices; edge weights are connection indices.
    graph: DiGraph<usize, usize>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Builds a graph from nodes and connections.
    ///
    /// # Errors
    ///
    /// Returns an error if two nodes share an id.
    pub fn from_parts(nodes: Vec<Node>, connections: Vec<Connection>) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(nodes.len(), connections.len());
        let mut node_index_map = HashMap::with_capacity(nodes.len());

        for (arena_index, node) in nodes.iter().enumerate() {
            if node_index_map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode {
                    node_id: node.id.clone(),
                });
            }
            let index = graph.add_node(arena_index);
            node_index_map.insert(node.id.clone(), index);
        }

        for (connection_index, connection) in connections.iter().enumerate() {
            let (Some(&source), Some(&target)) = (
                node_index_map.get(&connection.source_node_id),
                node_index_map.get(&connection.target_node_id),
            ) else {
                continue;
            };
            graph.add_edge(source, target, connection_index);
        }

        Ok(Self {
            nodes,
            connections,
            graph,
            node_index_map,
        })
    }

    /// Returns all nodes in definition order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns all connections in definition order, including dangling ones.
    #[must_use]
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Returns a node by its ID.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        let arena_index = self.graph.node_weight(*index)?;
        self.nodes.get(*arena_index)
    }

    /// Returns true if the graph contains the node.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.node_index_map.contains_key(node_id)
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of data edges (connections with both endpoints present).
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the connections arriving at a node, in definition order.
    #[must_use]
    pub fn inbound_edges(&self, node_id: &NodeId) -> Vec<&Connection> {
        self.edges(node_id, Direction::Incoming)
    }

    /// Returns the connections leaving a node, in definition order.
    #[must_use]
    pub fn outbound_edges(&self, node_id: &NodeId) -> Vec<&Connection> {
        self.edges(node_id, Direction::Outgoing)
    }

    fn edges(&self, node_id: &NodeId, direction: Direction) -> Vec<&Connection> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };
        let mut indices: Vec<usize> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| *edge.weight())
            .collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .filter_map(|i| self.connections.get(i))
            .collect()
    }

    /// Returns the declared inputs of a node (empty if the node is unknown).
    #[must_use]
    pub fn inputs_of(&self, node_id: &NodeId) -> &[InputPort] {
        self.node(node_id).map_or(&[], |node| node.inputs.as_slice())
    }

    /// Returns the declared outputs of a node (empty if the node is unknown).
    #[must_use]
    pub fn outputs_of(&self, node_id: &NodeId) -> &[OutputPort] {
        self.node(node_id).map_or(&[], |node| node.outputs.as_slice())
    }

    /// Returns the nodes with no inbound data edges, in ascending id order.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<&NodeId> {
        let mut entries: Vec<&NodeId> = self
            .nodes
            .iter()
            .map(|node| &node.id)
            .filter(|id| self.inbound_edges(id).is_empty())
            .collect();
        entries.sort();
        entries
    }

    /// Returns the distinct upstream nodes feeding a node.
    #[must_use]
    pub fn predecessors(&self, node_id: &NodeId) -> BTreeSet<NodeId> {
        self.inbound_edges(node_id)
            .into_iter()
            .map(|c| c.source_node_id.clone())
            .collect()
    }

    /// Returns the distinct downstream nodes fed by a node.
    #[must_use]
    pub fn successors(&self, node_id: &NodeId) -> BTreeSet<NodeId> {
        self.outbound_edges(node_id)
            .into_iter()
            .map(|c| c.target_node_id.clone())
            .collect()
    }

    /// Returns every node transitively reachable from `node_id`, excluding
    /// the node itself.
    #[must_use]
    pub fn descendants(&self, node_id: &NodeId) -> BTreeSet<NodeId> {
        let Some(&start) = self.node_index_map.get(node_id) else {
            return BTreeSet::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut reached = BTreeSet::new();
        while let Some(index) = dfs.next(&self.graph) {
            if index != start {
                reached.extend(self.id_at(index));
            }
        }
        reached
    }

    /// Returns every node from which `node_id` is reachable, excluding the
    /// node itself.
    #[must_use]
    pub fn ancestors(&self, node_id: &NodeId) -> BTreeSet<NodeId> {
        let Some(&start) = self.node_index_map.get(node_id) else {
            return BTreeSet::new();
        };
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut reached = BTreeSet::new();
        while let Some(index) = dfs.next(reversed) {
            if index != start {
                reached.extend(self.id_at(index));
            }
        }
        reached
    }

    fn id_at(&self, index: NodeIndex) -> Option<NodeId> {
        let arena_index = self.graph.node_weight(index)?;
        self.nodes.get(*arena_index).map(|node| node.id.clone())
    }

    /// Resolves the source output name of a connection.
    ///
    /// An unnamed port resolves to the node's single output; a named port
    /// must be declared.
    #[must_use]
    pub fn source_port<'a>(&'a self, connection: &'a Connection) -> Option<&'a str> {
        let node = self.node(&connection.source_node_id)?;
        match &connection.source_output {
            Some(name) => node.output_port(name).map(|p| p.name.as_str()),
            None => single(&node.outputs).map(|p| p.name.as_str()),
        }
    }

    /// Resolves the target input name of a connection.
    #[must_use]
    pub fn target_port<'a>(&'a self, connection: &'a Connection) -> Option<&'a str> {
        let node = self.node(&connection.target_node_id)?;
        match &connection.target_input {
            Some(name) => node.input_port(name).map(|p| p.name.as_str()),
            None => single(&node.inputs).map(|p| p.name.as_str()),
        }
    }

    /// Resolves both endpoints of a connection.
    #[must_use]
    pub fn resolve(&self, connection: &Connection) -> Option<ResolvedConnection> {
        Some(ResolvedConnection {
            source_node_id: connection.source_node_id.clone(),
            source_output: self.source_port(connection)?.to_string(),
            target_node_id: connection.target_node_id.clone(),
            target_input: self.target_port(connection)?.to_string(),
        })
    }
}

fn single<T>(ports: &[T]) -> Option<&T> {
    match ports {
        [only] => Some(only),
        _ => None,
    }
}
