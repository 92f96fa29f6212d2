//! The optimizer: repeated passes of dead-node removal, rule-directed
//! rewriting (with re-attempted constant folding on newly-all-constant
//! calls), and deduplication, run to a fixed point. Grounded on
//! `examples/original_source/source/compiler/optimizer.h`'s pass list.
//! `spec.md` §4.4.

pub mod applicator;
pub mod dead_code;
pub mod dedup;
pub mod rule;

use crate::const_eval::materialize_constant;
use crate::consts::MAX_OPTIMIZER_PASSES;
use crate::graph::node::NodeKind;
use crate::graph::{NativeModuleGraph, NodeHandle};
use crate::registry::{ConstantValue, NativeModuleRegistry};

/// Run the optimizer to a fixed point: a pass that removes no dead node,
/// applies no rewrite, and merges no duplicate leaves the graph unchanged,
/// and the loop stops. Bounded by [MAX_OPTIMIZER_PASSES] as a backstop
/// against a pathological (bugged) rewrite rule cycling forever; hitting the
/// bound is always a compiler bug, never a user error.
pub fn optimize(graph: &mut NativeModuleGraph, registry: &dyn NativeModuleRegistry) {
    for _ in 0..MAX_OPTIMIZER_PASSES {
        let removed = dead_code::remove_dead_nodes(graph);
        let rewrote = apply_rewrites(graph, registry);
        let folded = fold_constant_calls(graph, registry);
        let deduped = dedup::dedup(graph);
        if !removed && !rewrote && !folded && !deduped {
            return;
        }
    }
}

/// Attempt every registered optimization rule against every live native
/// module call, in node order. Stops re-scanning and returns as soon as one
/// rule applies, since a rewrite can add, remove, or reroute nodes out from
/// under an in-progress iteration; the outer fixed-point loop re-enters to
/// pick up whatever else is now applicable.
fn apply_rewrites(graph: &mut NativeModuleGraph, registry: &dyn NativeModuleRegistry) -> bool {
    for handle in graph.node_handles().collect::<Vec<_>>() {
        let native_module = match graph.get_node(handle) {
            Ok(node) => match node.kind {
                NodeKind::NativeModuleCall { native_module, .. } => native_module,
                _ => continue,
            },
            Err(_) => continue,
        };
        for optimization_rule in registry.optimization_rules_for(native_module) {
            if applicator::try_apply_optimization_rule(graph, registry, optimization_rule, handle) {
                return true;
            }
        }
    }
    false
}

/// Fold any native-module-call node whose in-arguments have all become
/// constant, e.g. as the result of a rewrite or an earlier fold elsewhere in
/// the graph. Mirrors the builder's eager folding (`crate::builder`) but
/// runs after a call node already exists, so on success it materializes
/// replacement constants and reroutes the call's existing consumers rather
/// than skipping node creation entirely.
fn fold_constant_calls(graph: &mut NativeModuleGraph, registry: &dyn NativeModuleRegistry) -> bool {
    let mut folded = false;
    for handle in graph.node_handles().collect::<Vec<_>>() {
        if fold_one_call(graph, registry, handle) {
            folded = true;
        }
    }
    folded
}

fn fold_one_call(graph: &mut NativeModuleGraph, registry: &dyn NativeModuleRegistry, handle: NodeHandle) -> bool {
    let const_eval = crate::const_eval::ConstEvaluator::new(registry);

    let (native_module, input_handles) = match graph.get_node(handle) {
        Ok(node) => match node.kind {
            NodeKind::NativeModuleCall { native_module, .. } => (native_module, node.incoming_edges().to_vec()),
            _ => return false,
        },
        Err(_) => return false,
    };
    let info = registry.lookup(native_module).clone();
    let signature = match info.compile_time {
        Some(s) => s,
        None => return false,
    };

    let producers: Option<Vec<NodeHandle>> = input_handles
        .iter()
        .map(|input| graph.get_node(*input).ok().and_then(|n| n.incoming_edges().first().copied()))
        .collect();
    let producers = match producers {
        Some(p) if p.len() == info.in_arg_count() => p,
        _ => return false,
    };
    if !producers.iter().all(|p| graph.is_node_constant(*p)) {
        return false;
    }

    let dependent_positions: Vec<usize> =
        info.in_arguments().enumerate().filter(|(_, a)| a.is_dependent_constant_input).map(|(i, _)| i).collect();
    let dependents_constant = dependent_positions.is_empty()
        || dependent_positions.iter().all(|&i| producers.get(i).map(|h| graph.is_node_constant(*h)).unwrap_or(false));
    let should_fold = info.always_runs_at_compile_time
        || (info.runs_at_compile_time_when_dependent_constants_are_constant && dependents_constant);
    if !should_fold {
        return false;
    }

    let arg_values: Option<Vec<ConstantValue>> = producers.iter().map(|h| const_eval.evaluate(graph, *h).ok()).collect();
    let arg_values = match arg_values {
        Some(v) => v,
        None => return false,
    };
    let results = match (signature.call)(&arg_values) {
        Ok(r) => r,
        Err(_) => return false,
    };

    let outputs = match graph.get_node(handle) {
        Ok(node) => node.outgoing_edges().to_vec(),
        Err(_) => return false,
    };
    if results.len() != outputs.len() {
        return false;
    }

    for (output, value) in outputs.iter().zip(results.iter()) {
        let replacement = materialize_constant(graph, value);
        applicator::redirect_consumers(graph, *output, replacement);
    }
    true
}
