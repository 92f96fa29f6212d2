//! Matches an [crate::optimize::rule::OptimizationRule]'s source pattern
//! against a live graph subtree and, on a match, rebuilds the target pattern
//! and rewires the matched subtree's consumers onto it. Grounded on
//! `examples/original_source/source/compiler/optimization_rule_applicator.h`/
//! `.cpp`. That original walks the pattern with an explicit stack machine
//! (`s_match_state`, `s_advance`, `s_graph_location`) to support backtracking
//! over ambiguous leading symbols in a general pattern trie; the patterns
//! here are always simple nested call trees with no such ambiguity, so a
//! plain recursive walk is equivalent and considerably simpler.
//! `spec.md` §4.4.1.

use super::rule::{OptimizationRule, OptimizationSymbol};
use crate::graph::node::{ConstantData, NodeKind};
use crate::graph::{NativeModuleGraph, NodeHandle};
use crate::registry::NativeModuleRegistry;
use crate::types::QualifiedDataType;

/// Try to rewrite the subtree rooted at `call_handle` (a live
/// [NodeKind::NativeModuleCall] node) using `rule`. Returns `true` if the
/// rule's source pattern matched and the rewrite was applied; `false` leaves
/// the graph untouched.
pub fn try_apply_optimization_rule(
    graph: &mut NativeModuleGraph,
    registry: &dyn NativeModuleRegistry,
    rule: &OptimizationRule,
    call_handle: NodeHandle,
) -> bool {
    let (root_value, upsample_factor) = match root_value_of(graph, call_handle) {
        Some(v) => v,
        None => return false,
    };

    let mut matcher = Matcher { symbols: &rule.source, pos: 0, bindings: Vec::new() };
    if !matcher.match_value(graph, registry, root_value) || matcher.pos != rule.source.len() {
        return false;
    }

    let mut builder =
        TargetBuilder { symbols: &rule.target, pos: 0, bindings: &matcher.bindings, upsample_factor };
    let new_value = match builder.build_value(graph, registry) {
        Some(v) if builder.pos == rule.target.len() => v,
        _ => return false,
    };

    redirect_consumers(graph, root_value, new_value);
    true
}

/// A pattern-eligible call (validated at rule-registration time to have
/// `out_arg_count() == 0`) has exactly one value: its return, carried by its
/// sole indexed output. Also reports the call's upsample factor, which the
/// rewrite reuses for every fresh node it materializes.
fn root_value_of(graph: &NativeModuleGraph, call_handle: NodeHandle) -> Option<(NodeHandle, u32)> {
    let node = graph.get_node(call_handle).ok()?;
    let upsample_factor = match node.kind {
        NodeKind::NativeModuleCall { upsample_factor, .. } => upsample_factor,
        _ => return None,
    };
    let output = node.outgoing_edges().first().copied()?;
    Some((output, upsample_factor))
}

/// Rewires every external consumer of `from` onto `to`, leaving `from`'s own
/// subtree orphaned for dead-code removal to sweep.
pub(super) fn redirect_consumers(graph: &mut NativeModuleGraph, from: NodeHandle, to: NodeHandle) {
    if from == to {
        return;
    }
    let consumers: Vec<NodeHandle> = graph.get_node(from).map(|n| n.outgoing_edges().to_vec()).unwrap_or_default();
    for consumer in consumers {
        if graph.remove_edge(from, consumer).is_ok() {
            let _ = graph.add_edge(to, consumer);
        }
    }
}

struct Matcher<'p> {
    symbols: &'p [OptimizationSymbol],
    pos: usize,
    bindings: Vec<NodeHandle>,
}

impl<'p> Matcher<'p> {
    fn match_value(&mut self, graph: &NativeModuleGraph, registry: &dyn NativeModuleRegistry, handle: NodeHandle) -> bool {
        let symbol = match self.symbols.get(self.pos) {
            Some(s) => s.clone(),
            None => return false,
        };
        self.pos += 1;
        match symbol {
            OptimizationSymbol::NativeModule(uid) => self.match_native_module(graph, registry, handle, uid),
            OptimizationSymbol::NativeModuleEnd => false,
            OptimizationSymbol::Variable => {
                if graph.is_node_constant(handle) {
                    return false;
                }
                self.bindings.push(handle);
                true
            }
            OptimizationSymbol::Constant => {
                if !graph.is_node_constant(handle) {
                    return false;
                }
                self.bindings.push(handle);
                true
            }
            OptimizationSymbol::VariableOrConstant => {
                self.bindings.push(handle);
                true
            }
            OptimizationSymbol::BackReference(index) => self.bindings.get(index as usize) == Some(&handle),
            OptimizationSymbol::RealValue(expected) => match graph.get_node(handle) {
                Ok(node) => matches!(node.kind, NodeKind::Constant(ConstantData::Real(v)) if v == expected),
                Err(_) => false,
            },
            OptimizationSymbol::BoolValue(expected) => match graph.get_node(handle) {
                Ok(node) => matches!(node.kind, NodeKind::Constant(ConstantData::Bool(v)) if v == expected),
                Err(_) => false,
            },
        }
    }

    fn match_native_module(
        &mut self,
        graph: &NativeModuleGraph,
        registry: &dyn NativeModuleRegistry,
        handle: NodeHandle,
        uid: crate::registry::NativeModuleUid,
    ) -> bool {
        let expected_handle = match registry.lookup_uid(uid) {
            Some(h) => h,
            None => return false,
        };
        let node = match graph.get_node(handle) {
            Ok(n) => n,
            Err(_) => return false,
        };
        let owning_call = match node.kind {
            NodeKind::IndexedOutput { .. } => match node.incoming_edges().first() {
                Some(h) => *h,
                None => return false,
            },
            _ => return false,
        };
        let call_node = match graph.get_node(owning_call) {
            Ok(n) => n,
            Err(_) => return false,
        };
        let native_module = match call_node.kind {
            NodeKind::NativeModuleCall { native_module, .. } => native_module,
            _ => return false,
        };
        if native_module != expected_handle {
            return false;
        }

        let in_arg_count = registry.lookup(native_module).in_arg_count();
        let input_nodes = call_node.incoming_edges().to_vec();
        if input_nodes.len() != in_arg_count {
            return false;
        }
        for input_handle in input_nodes {
            let producer = match graph.get_node(input_handle).ok().and_then(|n| n.incoming_edges().first().copied()) {
                Some(p) => p,
                None => return false,
            };
            if !self.match_value(graph, registry, producer) {
                return false;
            }
        }

        if !matches!(self.symbols.get(self.pos), Some(OptimizationSymbol::NativeModuleEnd)) {
            return false;
        }
        self.pos += 1;
        true
    }
}

struct TargetBuilder<'p, 'b> {
    symbols: &'p [OptimizationSymbol],
    pos: usize,
    bindings: &'b [NodeHandle],
    upsample_factor: u32,
}

impl<'p, 'b> TargetBuilder<'p, 'b> {
    fn build_value(&mut self, graph: &mut NativeModuleGraph, registry: &dyn NativeModuleRegistry) -> Option<NodeHandle> {
        let symbol = self.symbols.get(self.pos)?.clone();
        self.pos += 1;
        match symbol {
            OptimizationSymbol::NativeModule(uid) => self.build_native_module(graph, registry, uid),
            OptimizationSymbol::BackReference(index) => self.bindings.get(index as usize).copied(),
            OptimizationSymbol::RealValue(v) => Some(graph.add_constant_real(v, self.upsample_factor)),
            OptimizationSymbol::BoolValue(v) => Some(graph.add_constant_bool(v)),
            OptimizationSymbol::NativeModuleEnd
            | OptimizationSymbol::Variable
            | OptimizationSymbol::Constant
            | OptimizationSymbol::VariableOrConstant => None,
        }
    }

    fn build_native_module(
        &mut self,
        graph: &mut NativeModuleGraph,
        registry: &dyn NativeModuleRegistry,
        uid: crate::registry::NativeModuleUid,
    ) -> Option<NodeHandle> {
        let handle = registry.lookup_uid(uid)?;
        let info = registry.lookup(handle).clone();

        let mut arg_handles = Vec::with_capacity(info.in_arg_count());
        for _ in 0..info.in_arg_count() {
            arg_handles.push(self.build_value(graph, registry)?);
        }
        if !matches!(self.symbols.get(self.pos), Some(OptimizationSymbol::NativeModuleEnd)) {
            return None;
        }
        self.pos += 1;

        let in_arg_types: Vec<QualifiedDataType> =
            info.in_arguments().map(|a| QualifiedDataType::variable(a.data_type)).collect();
        let out_arg_types = vec![QualifiedDataType::variable(info.return_type)];
        let call = graph.add_native_module_call(handle, self.upsample_factor, &in_arg_types, &out_arg_types);

        let inputs = graph.get_node(call).ok()?.incoming_edges().to_vec();
        for (slot, producer) in inputs.iter().zip(arg_handles.iter()) {
            graph.add_edge(*producer, *slot).ok()?;
        }
        let outputs = graph.get_node(call).ok()?.outgoing_edges().to_vec();
        outputs.first().copied()
    }
}
