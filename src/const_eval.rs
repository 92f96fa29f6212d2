//! Recursive compile-time evaluation of constant-foldable graph nodes.
//! `spec.md` §4.3. Distinct from [crate::graph::NativeModuleGraph::is_node_constant],
//! which is a cheap structural check the optimizer uses to decide whether a
//! rewrite rule's pattern *could* match -- this module does the actual work
//! of computing a value, consulted once a rewrite (or the builder's
//! repeat-loop unrolling) needs a number rather than just a yes/no.

use crate::graph::{ConstantData, NativeModuleGraph, NodeHandle, NodeKind};
use crate::registry::{ConstantValue, NativeModuleHandle, NativeModuleRegistry};
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstEvalError {
    #[error("node {0} is not constant-foldable")]
    NotConstant(NodeHandle),
    #[error("native module has no compile-time implementation")]
    NoCompileTimeImplementation(NativeModuleHandle),
    #[error("native module compile-time evaluation failed: {0}")]
    NativeModuleFailed(String),
    #[error("native module returned {returned} values, expected {expected}")]
    ArityMismatch { expected: usize, returned: usize },
    #[error("graph error during constant evaluation: {0}")]
    Graph(#[from] crate::error::GraphError),
}

/// Evaluates and caches constant values for one graph. Caches are keyed by
/// [NodeHandle] and therefore invalidated by any `compact()` on the
/// underlying graph -- construct a fresh evaluator after compacting.
pub struct ConstEvaluator<'a> {
    registry: &'a dyn NativeModuleRegistry,
    node_cache: RefCell<HashMap<NodeHandle, ConstantValue>>,
    call_cache: RefCell<HashMap<NodeHandle, Vec<ConstantValue>>>,
}

impl<'a> ConstEvaluator<'a> {
    pub fn new(registry: &'a dyn NativeModuleRegistry) -> Self {
        Self {
            registry,
            node_cache: RefCell::new(HashMap::new()),
            call_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Evaluate a node to a constant value, recursing into its inputs as
    /// needed and caching the result.
    pub fn evaluate(
        &self,
        graph: &NativeModuleGraph,
        handle: NodeHandle,
    ) -> Result<ConstantValue, ConstEvalError> {
        if let Some(value) = self.node_cache.borrow().get(&handle) {
            return Ok(value.clone());
        }
        let value = self.evaluate_uncached(graph, handle)?;
        self.node_cache.borrow_mut().insert(handle, value.clone());
        Ok(value)
    }

    /// Convenience for callers (e.g. repeat-loop unrolling) that need a
    /// specific scalar shape out of the result.
    pub fn evaluate_real(
        &self,
        graph: &NativeModuleGraph,
        handle: NodeHandle,
    ) -> Result<f64, ConstEvalError> {
        match self.evaluate(graph, handle)? {
            ConstantValue::Real(r) => Ok(r),
            _ => Err(ConstEvalError::NotConstant(handle)),
        }
    }

    fn evaluate_uncached(
        &self,
        graph: &NativeModuleGraph,
        handle: NodeHandle,
    ) -> Result<ConstantValue, ConstEvalError> {
        let node = graph.get_node(handle)?;
        match &node.kind {
            NodeKind::Constant(data) => Ok(match data {
                ConstantData::Real(r) => ConstantValue::Real(*r),
                ConstantData::Bool(b) => ConstantValue::Bool(*b),
                ConstantData::StringOffset(offset) => {
                    ConstantValue::String(graph.string_table().get(*offset).to_string())
                }
            }),
            NodeKind::Array => {
                let elements = node
                    .incoming_edges()
                    .iter()
                    .map(|h| self.evaluate(graph, *h))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ConstantValue::Array(elements))
            }
            NodeKind::IndexedInput { .. } => {
                let producer = *node
                    .incoming_edges()
                    .first()
                    .ok_or(ConstEvalError::NotConstant(handle))?;
                self.evaluate(graph, producer)
            }
            NodeKind::IndexedOutput { index } => {
                let call_handle = *node
                    .incoming_edges()
                    .first()
                    .ok_or(ConstEvalError::NotConstant(handle))?;
                let results = self.evaluate_call(graph, call_handle)?;
                results
                    .get(*index as usize)
                    .cloned()
                    .ok_or(ConstEvalError::NotConstant(handle))
            }
            NodeKind::NativeModuleCall { .. }
            | NodeKind::Input { .. }
            | NodeKind::Output { .. }
            | NodeKind::TemporaryReference => Err(ConstEvalError::NotConstant(handle)),
        }
    }

    /// Evaluate every out-argument of a native-module-call node, consulting
    /// the registry's compile-time implementation and caching the whole
    /// result vector under the call's own handle so a multi-output call is
    /// only invoked once regardless of how many `IndexedOutput`s read from
    /// it.
    fn evaluate_call(
        &self,
        graph: &NativeModuleGraph,
        call_handle: NodeHandle,
    ) -> Result<Vec<ConstantValue>, ConstEvalError> {
        if let Some(results) = self.call_cache.borrow().get(&call_handle) {
            return Ok(results.clone());
        }

        let call_node = graph.get_node(call_handle)?;
        let native_module = match &call_node.kind {
            NodeKind::NativeModuleCall { native_module, .. } => *native_module,
            _ => return Err(ConstEvalError::NotConstant(call_handle)),
        };

        let info = self.registry.lookup(native_module);
        let signature = info
            .compile_time
            .ok_or(ConstEvalError::NoCompileTimeImplementation(native_module))?;

        if !info.always_runs_at_compile_time {
            let dependent_count = info
                .in_arguments()
                .filter(|a| a.is_dependent_constant_input)
                .count();
            let dependents_constant = dependent_count == 0
                || call_node
                    .incoming_edges()
                    .iter()
                    .zip(info.in_arguments())
                    .filter(|(_, arg)| arg.is_dependent_constant_input)
                    .all(|(indexed_input, _)| graph.is_node_constant(*indexed_input));
            if info.runs_at_compile_time_when_dependent_constants_are_constant && !dependents_constant {
                return Err(ConstEvalError::NotConstant(call_handle));
            }
        }

        let mut arguments = Vec::with_capacity(info.in_arg_count());
        for indexed_input in call_node.incoming_edges() {
            let input_node = graph.get_node(*indexed_input)?;
            if !matches!(input_node.kind, NodeKind::IndexedInput { .. }) {
                continue;
            }
            arguments.push(self.evaluate(graph, *indexed_input)?);
        }

        let results = (signature.call)(&arguments)
            .map_err(|e| ConstEvalError::NativeModuleFailed(e.message))?;
        // Result ordering matches `IndexedOutput` index assignment: the
        // return value (if any) occupies slot 0, followed by out-arguments
        // in declaration order (`spec.md` §4.3).
        let expected = usize::from(!info.return_type.is_void()) + info.out_arg_count();
        if results.len() != expected {
            return Err(ConstEvalError::ArityMismatch {
                expected,
                returned: results.len(),
            });
        }

        self.call_cache.borrow_mut().insert(call_handle, results.clone());
        Ok(results)
    }
}

/// The inverse of evaluation: create fresh constant nodes for a
/// [ConstantValue], recursing into array elements. Shared by the builder's
/// eager constant folding and the optimizer's re-folding of calls whose
/// inputs became constant as a result of a rewrite.
pub fn materialize_constant(graph: &mut NativeModuleGraph, value: &ConstantValue) -> NodeHandle {
    use crate::types::{DataType, PrimitiveKind};
    match value {
        ConstantValue::Real(r) => graph.add_constant_real(*r, 1),
        ConstantValue::Bool(b) => graph.add_constant_bool(*b),
        ConstantValue::String(s) => graph.add_constant_string(s),
        ConstantValue::Array(elements) => {
            let kind = match elements.first() {
                Some(ConstantValue::Bool(_)) => PrimitiveKind::Bool,
                Some(ConstantValue::String(_)) => PrimitiveKind::String,
                _ => PrimitiveKind::Real,
            };
            let array = graph.add_array(DataType::scalar(kind));
            for element in elements {
                let h = materialize_constant(graph, element);
                graph.add_array_value(array, h).expect("constant element always assignable");
            }
            array
        }
    }
}
