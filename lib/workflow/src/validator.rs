//! Structural checks run before any execution starts.
//!
//! Checks run category by category and stop at the first category that
//! reports anything, but every error within that category is collected:
//! 1. Connection endpoints reference existing nodes
//! 2. Connection ports resolve, and no input has two connections
//! 3. The data edges are acyclic
//! 4. At least one node has no inbound data edge
//! 5. Connected ports have compatible types

use crate::error::{Endpoint, ValidationError};
use crate::graph::WorkflowGraph;
use crate::node::NodeId;
use std::collections::{BTreeMap, HashMap, btree_set};

/// Success, or the non-empty list of errors from the first failing category.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validates that a graph is schedulable.
///
/// # Errors
///
/// Returns every error of the first failing category.
pub fn validate(graph: &WorkflowGraph) -> ValidationResult {
    let checks: [fn(&WorkflowGraph) -> Vec<ValidationError>; 5] = [
        dangling_references,
        unresolved_ports,
        cycles,
        missing_entry_point,
        port_type_mismatches,
    ];
    for check in checks {
        let errors = check(graph);
        if !errors.is_empty() {
            return Err(errors);
        }
    }
    Ok(())
}

fn dangling_references(graph: &WorkflowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (index, connection) in graph.connections().iter().enumerate() {
        for (endpoint, node_id) in [
            (Endpoint::Source, &connection.source_node_id),
            (Endpoint::Target, &connection.target_node_id),
        ] {
            if !graph.contains(node_id) {
                errors.push(ValidationError::DanglingReference {
                    connection: index,
                    endpoint,
                    node_id: node_id.clone(),
                });
            }
        }
    }
    errors
}

fn unresolved_ports(graph: &WorkflowGraph) -> Vec<ValidationError> {
    // Snapshots render outputs as `node.output`.
    let mut errors: Vec<ValidationError> = graph
        .nodes()
        .iter()
        .filter(|node| node.id.as_str().contains('.'))
        .map(|node| ValidationError::InvalidNodeId {
            node_id: node.id.clone(),
        })
        .collect();
    let mut inbound: BTreeMap<(NodeId, String), usize> = BTreeMap::new();

    for (index, connection) in graph.connections().iter().enumerate() {
        if graph.source_port(connection).is_none() {
            errors.push(ValidationError::PortNotFound {
                connection: index,
                endpoint: Endpoint::Source,
                node_id: connection.source_node_id.clone(),
                port: connection.source_output.clone(),
            });
        }
        match graph.target_port(connection) {
            Some(port) => {
                *inbound
                    .entry((connection.target_node_id.clone(), port.to_string()))
                    .or_default() += 1;
            }
            None => errors.push(ValidationError::PortNotFound {
                connection: index,
                endpoint: Endpoint::Target,
                node_id: connection.target_node_id.clone(),
                port: connection.target_input.clone(),
            }),
        }
    }

    errors.extend(
        inbound
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((node_id, port), _)| ValidationError::InputAlreadyConnected { node_id, port }),
    );
    errors
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    /// On the active recursion stack.
    Active,
    Finished,
}

/// Depth-first search in ascending id order; every back edge to a node on
/// the active stack is reported as the path from that node back to itself.
fn cycles(graph: &WorkflowGraph) -> Vec<ValidationError> {
    let mut roots: Vec<&NodeId> = graph.nodes().iter().map(|n| &n.id).collect();
    roots.sort();

    let mut visits: HashMap<NodeId, Visit> = HashMap::new();
    let mut errors = Vec::new();

    for root in roots {
        if visits.contains_key(root) {
            continue;
        }
        visits.insert(root.clone(), Visit::Active);
        let mut path: Vec<NodeId> = vec![root.clone()];
        let mut pending: Vec<btree_set::IntoIter<NodeId>> = vec![graph.successors(root).into_iter()];

        loop {
            let next = match pending.last_mut() {
                Some(children) => children.next(),
                None => break,
            };
            match next {
                Some(child) => match visits.get(&child) {
                    None => {
                        visits.insert(child.clone(), Visit::Active);
                        pending.push(graph.successors(&child).into_iter());
                        path.push(child);
                    }
                    Some(Visit::Active) => {
                        let start = path.iter().position(|n| *n == child).unwrap_or(0);
                        let mut nodes = path[start..].to_vec();
                        nodes.push(child);
                        errors.push(ValidationError::Cycle { nodes });
                    }
                    Some(Visit::Finished) => {}
                },
                None => {
                    pending.pop();
                    if let Some(done) = path.pop() {
                        visits.insert(done, Visit::Finished);
                    }
                }
            }
        }
    }
    errors
}

fn missing_entry_point(graph: &WorkflowGraph) -> Vec<ValidationError> {
    if graph.entry_nodes().is_empty() {
        vec![ValidationError::NoEntryPoint]
    } else {
        Vec::new()
    }
}

fn port_type_mismatches(graph: &WorkflowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for connection in graph.connections() {
        let Some(resolved) = graph.resolve(connection) else {
            continue;
        };
        let source = graph
            .node(&resolved.source_node_id)
            .and_then(|n| n.output_port(&resolved.source_output));
        let target = graph
            .node(&resolved.target_node_id)
            .and_then(|n| n.input_port(&resolved.target_input));
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };
        if !source.port_type.is_compatible_with(target.port_type) {
            errors.push(ValidationError::PortTypeMismatch {
                source_node: resolved.source_node_id,
                source_output: resolved.source_output,
                source_type: source.port_type,
                target_node: resolved.target_node_id,
                target_input: resolved.target_input,
                target_type: target.port_type,
            });
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::node::{ActionConfig, ManualConfig, Node, NodeConfig, TransformConfig};
    use crate::port::{InputPort, OutputPort, PortType};

    fn manual(id: &str) -> Node {
        Node::new(id, id, NodeConfig::Manual(ManualConfig::default()))
    }

    fn transform(id: &str) -> Node {
        Node::new(id, id, NodeConfig::Transform(TransformConfig::default()))
    }

    fn action(id: &str) -> Node {
        Node::new(id, id, NodeConfig::Action(ActionConfig::default()))
    }

    fn graph(nodes: Vec<Node>, connections: Vec<Connection>) -> WorkflowGraph {
        WorkflowGraph::from_parts(nodes, connections).expect("graph")
    }

    #[test]
    fn valid_chain_passes() {
        let g = graph(
            vec![manual("a"), transform("b"), action("c")],
            vec![Connection::new("a", "b"), Connection::new("b", "c")],
        );
        assert_eq!(validate(&g), Ok(()));
    }

    #[test]
    fn reports_every_dangling_reference() {
        let g = graph(
            vec![manual("a")],
            vec![Connection::new("a", "x"), Connection::new("y", "a")],
        );
        let errors = validate(&g).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .all(|e| matches!(e, ValidationError::DanglingReference { .. }))
        );
    }

    #[test]
    fn dangling_short_circuits_later_categories() {
        // Also cyclic, but only the dangling reference is reported.
        let g = graph(
            vec![action("a"), action("b")],
            vec![
                Connection::new("a", "b"),
                Connection::new("b", "a"),
                Connection::new("a", "ghost"),
            ],
        );
        let errors = validate(&g).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::DanglingReference { .. }));
    }

    #[test]
    fn dotted_node_id_is_rejected() {
        let g = graph(
            vec![manual("a"), transform("a.b")],
            vec![Connection::new("a", "a.b")],
        );
        let errors = validate(&g).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidNodeId {
                node_id: "a.b".into()
            }]
        );
        assert_eq!(errors[0].to_string(), "node id 'a.b' must not contain '.'");
    }

    #[test]
    fn named_port_must_exist() {
        let g = graph(
            vec![manual("a"), transform("b")],
            vec![Connection::between("a", "missing", "b", "input")],
        );
        let errors = validate(&g).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::PortNotFound {
                connection: 0,
                endpoint: Endpoint::Source,
                node_id: "a".into(),
                port: Some("missing".to_string()),
            }]
        );
    }

    #[test]
    fn unnamed_port_needs_single_port() {
        let two_inputs = action("b").with_inputs(vec![
            InputPort::optional("left", PortType::Any),
            InputPort::optional("right", PortType::Any),
        ]);
        let g = graph(vec![manual("a"), two_inputs], vec![Connection::new("a", "b")]);
        let errors = validate(&g).unwrap_err();
        assert!(matches!(
            &errors[0],
            ValidationError::PortNotFound {
                endpoint: Endpoint::Target,
                port: None,
                ..
            }
        ));
    }

    #[test]
    fn input_accepts_one_connection() {
        let g = graph(
            vec![manual("a"), manual("b"), transform("c")],
            vec![Connection::new("a", "c"), Connection::new("b", "c")],
        );
        let errors = validate(&g).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InputAlreadyConnected {
                node_id: "c".into(),
                port: "input".to_string(),
            }]
        );
    }

    #[test]
    fn detects_cycle_with_sequence() {
        let joined = action("a").with_inputs(vec![
            InputPort::optional("input", PortType::Any),
            InputPort::optional("loop", PortType::Any),
        ]);
        let g = graph(
            vec![manual("start"), joined, action("b"), action("c")],
            vec![
                Connection::between("start", "output", "a", "input"),
                Connection::new("a", "b"),
                Connection::new("b", "c"),
                Connection::between("c", "output", "a", "loop"),
            ],
        );
        let errors = validate(&g).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::Cycle {
                nodes: vec!["a".into(), "b".into(), "c".into(), "a".into()],
            }]
        );
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let g = graph(
            vec![manual("a"), action("b")],
            vec![
                Connection::new("a", "b"),
                Connection::between("b", "output", "b", "input"),
            ],
        );
        // Two connections target b:input, which is caught first.
        assert!(matches!(
            validate(&g).unwrap_err()[0],
            ValidationError::InputAlreadyConnected { .. }
        ));

        let g = graph(
            vec![action("b")],
            vec![Connection::between("b", "output", "b", "input")],
        );
        assert_eq!(
            validate(&g).unwrap_err(),
            vec![ValidationError::Cycle {
                nodes: vec!["b".into(), "b".into()],
            }]
        );
    }

    #[test]
    fn empty_graph_has_no_entry_point() {
        let g = graph(vec![], vec![]);
        assert_eq!(validate(&g), Err(vec![ValidationError::NoEntryPoint]));
    }

    #[test]
    fn reports_type_mismatch() {
        let producer = manual("a").with_outputs(vec![OutputPort::new("output", PortType::String)]);
        let consumer = transform("b").with_inputs(vec![InputPort::required("input", PortType::Number)]);
        let g = graph(vec![producer, consumer], vec![Connection::new("a", "b")]);
        let errors = validate(&g).unwrap_err();
        assert!(matches!(
            &errors[0],
            ValidationError::PortTypeMismatch {
                source_type: PortType::String,
                target_type: PortType::Number,
                ..
            }
        ));
    }
}
