//! Dead-node removal: a graph is only useful through what it outputs, so any
//! node not on a path backward from an [NodeKind::Output] is unreferenced and
//! safe to drop. Grounded on the reachability sweep described alongside
//! `examples/original_source/source/compiler/optimizer.h`'s pass list.
//! `spec.md` §4.4 phase 1.

use crate::graph::node::NodeKind;
use crate::graph::{NativeModuleGraph, NodeHandle};
use std::collections::HashSet;

/// Remove every node not reachable backward from an output, always retaining
/// [NodeKind::Input] nodes regardless of reachability so a graph's declared
/// input arity survives even when a particular input goes unused. Returns
/// `true` if anything was removed.
pub fn remove_dead_nodes(graph: &mut NativeModuleGraph) -> bool {
    let live = reachable_from_outputs(graph);
    let dead: Vec<NodeHandle> = graph.node_handles().filter(|h| !live.contains(h)).collect();
    if dead.is_empty() {
        return false;
    }

    // Edges first, in a separate pass: a dead node may share an edge with
    // another dead node, whose own removal already cleared it, so a missing
    // edge here is expected and not an error.
    for &handle in &dead {
        let (incoming, outgoing) = match graph.get_node(handle) {
            Ok(node) => (node.incoming_edges().to_vec(), node.outgoing_edges().to_vec()),
            Err(_) => continue,
        };
        for from in incoming {
            let _ = graph.remove_edge(from, handle);
        }
        for to in outgoing {
            let _ = graph.remove_edge(handle, to);
        }
    }
    for handle in dead {
        let _ = graph.remove_node(handle);
    }
    true
}

fn reachable_from_outputs(graph: &NativeModuleGraph) -> HashSet<NodeHandle> {
    let mut live = HashSet::new();
    let mut stack: Vec<NodeHandle> = Vec::new();
    for handle in graph.node_handles() {
        let keep_unconditionally = matches!(
            graph.get_node(handle).map(|n| &n.kind),
            Ok(NodeKind::Output { .. }) | Ok(NodeKind::Input { .. })
        );
        if keep_unconditionally {
            stack.push(handle);
        }
    }
    while let Some(handle) = stack.pop() {
        if !live.insert(handle) {
            continue;
        }
        if let Ok(node) = graph.get_node(handle) {
            stack.extend(node.incoming_edges().iter().copied());
        }
    }
    live
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputIndex;
    use crate::types::{DataType, PrimitiveKind, QualifiedDataType};

    #[test]
    fn unreferenced_constant_is_removed() {
        let mut graph = NativeModuleGraph::new();
        let _unused = graph.add_constant_real(1.0, 1);
        let kept = graph.add_constant_real(2.0, 1);
        let out = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_edge(kept, out).unwrap();

        assert!(remove_dead_nodes(&mut graph));
        assert_eq!(graph.node_count(), 2);
        assert!(graph.get_node(kept).is_ok());
    }

    #[test]
    fn unused_input_node_is_retained() {
        let mut graph = NativeModuleGraph::new();
        let input = graph.add_input_node(0, QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)));
        let constant = graph.add_constant_real(0.0, 1);
        let out = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_edge(constant, out).unwrap();

        remove_dead_nodes(&mut graph);
        assert!(graph.get_node(input).is_ok());
    }

    #[test]
    fn no_change_when_everything_live() {
        let mut graph = NativeModuleGraph::new();
        let c = graph.add_constant_real(1.0, 1);
        let out = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_edge(c, out).unwrap();
        assert!(!remove_dead_nodes(&mut graph));
    }
}
