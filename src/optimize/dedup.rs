//! Deduplication: collapses structurally identical constant, array, and
//! native-module-call nodes onto a single shared node, redirecting every
//! duplicate's consumers onto the first-seen instance. Grounded on
//! `examples/original_source/source/compiler/optimizer.h`'s common
//! subexpression pass. `spec.md` §4.4 phase 3.

use super::applicator::redirect_consumers;
use crate::graph::node::{ConstantData, NodeKind};
use crate::graph::{NativeModuleGraph, NodeHandle};
use crate::registry::NativeModuleHandle;
use crate::types::DataType;
use std::collections::HashMap;

/// Merge constant nodes with identical values, and array/native-module-call
/// nodes with identical operands. Returns `true` if anything was merged.
/// Repeated calls can each find new opportunities exposed by the previous
/// one (e.g. two calls become identical once their own duplicate inputs were
/// just merged), so the optimizer's outer loop calls this every pass.
pub fn dedup(graph: &mut NativeModuleGraph) -> bool {
    let a = dedup_constants(graph);
    let b = dedup_structural(graph);
    a || b
}

#[derive(PartialEq, Eq, Hash)]
enum ConstantKey {
    Real(u64, u32),
    Bool(bool),
    Str(String),
}

fn dedup_constants(graph: &mut NativeModuleGraph) -> bool {
    let mut seen: HashMap<ConstantKey, NodeHandle> = HashMap::new();
    let mut merged = false;
    for handle in graph.node_handles().collect::<Vec<_>>() {
        let node = match graph.get_node(handle) {
            Ok(n) => n,
            Err(_) => continue,
        };
        let key = match &node.kind {
            NodeKind::Constant(ConstantData::Real(v)) => {
                let upsample_factor = node.data_type.map(|qdt| qdt.data_type.upsample_factor).unwrap_or(1);
                ConstantKey::Real(v.to_bits(), upsample_factor)
            }
            NodeKind::Constant(ConstantData::Bool(v)) => ConstantKey::Bool(*v),
            NodeKind::Constant(ConstantData::StringOffset(offset)) => {
                ConstantKey::Str(graph.string_table().get(*offset).to_string())
            }
            _ => continue,
        };
        match seen.get(&key) {
            Some(&first) if first != handle => {
                redirect_consumers(graph, handle, first);
                merged = true;
            }
            _ => {
                seen.insert(key, handle);
            }
        }
    }
    merged
}

#[derive(PartialEq, Eq, Hash)]
enum StructuralKey {
    Array(DataType, Vec<NodeHandle>),
    Call(NativeModuleHandle, u32, Vec<NodeHandle>),
}

fn dedup_structural(graph: &mut NativeModuleGraph) -> bool {
    let mut seen: HashMap<StructuralKey, NodeHandle> = HashMap::new();
    let mut merged = false;
    for handle in graph.node_handles().collect::<Vec<_>>() {
        let node = match graph.get_node(handle) {
            Ok(n) => n,
            Err(_) => continue,
        };
        let key = match &node.kind {
            NodeKind::Array => {
                let data_type = match node.data_type {
                    Some(qdt) => qdt.data_type,
                    None => continue,
                };
                StructuralKey::Array(data_type, node.incoming_edges().to_vec())
            }
            NodeKind::NativeModuleCall { native_module, upsample_factor } => {
                let producers: Option<Vec<NodeHandle>> = node
                    .incoming_edges()
                    .iter()
                    .map(|input| graph.get_node(*input).ok().and_then(|n| n.incoming_edges().first().copied()))
                    .collect();
                match producers {
                    Some(producers) => StructuralKey::Call(*native_module, *upsample_factor, producers),
                    None => continue,
                }
            }
            _ => continue,
        };
        match seen.get(&key) {
            Some(&first) if first != handle => {
                if matches!(node.kind, NodeKind::NativeModuleCall { .. }) {
                    redirect_call_outputs(graph, handle, first);
                } else {
                    redirect_consumers(graph, handle, first);
                }
                merged = true;
            }
            _ => {
                seen.insert(key, handle);
            }
        }
    }
    merged
}

/// A call node's own `outgoing_edges()` are its indexed-output children, not
/// external consumers, so merging two calls means pairwise-redirecting each
/// of their corresponding outputs rather than the call nodes themselves.
fn redirect_call_outputs(graph: &mut NativeModuleGraph, duplicate: NodeHandle, first: NodeHandle) {
    let (dup_outputs, first_outputs) = match (graph.get_node(duplicate), graph.get_node(first)) {
        (Ok(d), Ok(f)) => (d.outgoing_edges().to_vec(), f.outgoing_edges().to_vec()),
        _ => return,
    };
    for (dup_output, first_output) in dup_outputs.into_iter().zip(first_outputs) {
        redirect_consumers(graph, dup_output, first_output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputIndex;
    use crate::types::{PrimitiveKind, QualifiedDataType};

    #[test]
    fn duplicate_real_constants_merge() {
        let mut graph = NativeModuleGraph::new();
        let a = graph.add_constant_real(3.0, 1);
        let b = graph.add_constant_real(3.0, 1);
        let out_a = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        let out_b = graph.add_output_node(
            OutputIndex::Ordinary(1),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_edge(a, out_a).unwrap();
        graph.add_edge(b, out_b).unwrap();

        assert!(dedup(&mut graph));
        let out_a_node = graph.get_node(out_a).unwrap();
        let out_b_node = graph.get_node(out_b).unwrap();
        assert_eq!(out_a_node.incoming_edges(), out_b_node.incoming_edges());
    }

    #[test]
    fn distinct_constants_do_not_merge() {
        let mut graph = NativeModuleGraph::new();
        let a = graph.add_constant_real(1.0, 1);
        let b = graph.add_constant_real(2.0, 1);
        let out_a = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        let out_b = graph.add_output_node(
            OutputIndex::Ordinary(1),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_edge(a, out_a).unwrap();
        graph.add_edge(b, out_b).unwrap();
        assert!(!dedup(&mut graph));
    }
}
