//! Translates a validated AST into a [crate::graph::NativeModuleGraph] by
//! recursively inlining non-native module calls from a chosen entry point,
//! constant-folding native calls eagerly as they're built. `spec.md` §4.2.

mod scope;

use crate::ast::{self, ModuleKind, Statement};
use crate::consts::MAX_REPEAT_COUNT;
use crate::const_eval::{materialize_constant, ConstEvaluator};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::graph::{NativeModuleGraph, NodeHandle, OutputIndex};
use crate::registry::{ConstantValue, NativeModuleHandle, NativeModuleRegistry};
use crate::types::{DataType, PrimitiveKind, Qualifier, QualifiedDataType};
use crate::util::{Node, Span};
use scope::BuilderScopeStack;
use std::collections::HashMap;

type SpanExpr = Node<ast::Expr<Span>, Span>;

pub struct BuildOutput {
    pub graph: NativeModuleGraph,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildOutput {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Build the graph reachable from a single entry point (`voice_main` or
/// `fx_main`). Returns an empty graph with no diagnostics if the named entry
/// point isn't declared -- callers are expected to have already checked
/// [crate::validate::ValidationOutput]'s `has_voice_entry`/`has_fx_entry`.
pub fn build_graph(
    file: &ast::File<Span>,
    entry_point_name: &str,
    registry: &dyn NativeModuleRegistry,
) -> BuildOutput {
    let mut builder = Builder::new(file, registry);
    builder.build_entry_point(entry_point_name);
    BuildOutput { graph: builder.graph, diagnostics: builder.diagnostics }
}

struct Builder<'a> {
    registry: &'a dyn NativeModuleRegistry,
    modules: HashMap<String, Vec<&'a ast::ModuleDecl<Span>>>,
    scopes: BuilderScopeStack,
    graph: NativeModuleGraph,
    const_eval: ConstEvaluator<'a>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Builder<'a> {
    fn new(file: &'a ast::File<Span>, registry: &'a dyn NativeModuleRegistry) -> Self {
        let mut modules: HashMap<String, Vec<&'a ast::ModuleDecl<Span>>> = HashMap::new();
        for stmt in &file.top_level.statements {
            if let Statement::ModuleDecl(decl) = stmt.value() {
                modules.entry(decl.name.clone()).or_default().push(decl);
            }
        }
        Self {
            registry,
            modules,
            scopes: BuilderScopeStack::new(),
            graph: NativeModuleGraph::new(),
            const_eval: ConstEvaluator::new(registry),
            diagnostics: Vec::new(),
        }
    }

    fn build_entry_point(&mut self, entry_name: &str) {
        let decl = match self.modules.get(entry_name).and_then(|d| d.first()).copied() {
            Some(decl) => decl,
            None => return,
        };
        let body = match &decl.kind {
            ModuleKind::Source { body } => body,
            ModuleKind::Native(_) => return,
        };

        self.scopes.push();

        let mut in_index = 0u32;
        for arg in &decl.args {
            if arg.qualifier != Qualifier::Out {
                let qdt = QualifiedDataType::variable(arg.data_type);
                let handle = self.graph.add_input_node(in_index, qdt);
                self.scopes.current_mut().bind(arg.name.clone(), handle);
                in_index += 1;
            }
        }

        let mut return_handle = None;
        self.walk_statements(&body.statements, &mut return_handle);

        let mut out_index = 0u32;
        for arg in &decl.args {
            if arg.qualifier == Qualifier::Out {
                if let Some(value) = self.scopes.lookup(&arg.name) {
                    let qdt = QualifiedDataType::variable(arg.data_type);
                    let output = self.graph.add_output_node(OutputIndex::Ordinary(out_index), qdt);
                    self.graph
                        .add_edge(value, output)
                        .expect("entry-point out-argument type already validated");
                }
                out_index += 1;
            }
        }
        if let Some(value) = return_handle {
            let qdt = QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Bool));
            let output = self.graph.add_output_node(OutputIndex::RemainActive, qdt);
            self.graph
                .add_edge(value, output)
                .expect("entry point returns bool, validated");
        }

        self.scopes.pop();
    }

    fn walk_statements(&mut self, statements: &[Node<Statement<Span>, Span>], return_handle: &mut Option<NodeHandle>) {
        for stmt in statements {
            let span = *stmt.metadata();
            match stmt.value() {
                Statement::ModuleDecl(_) | Statement::Decl(_) => {}
                Statement::Assignment(a) => self.build_assignment(a, span),
                Statement::Return(r) => {
                    if return_handle.is_none() {
                        *return_handle = self.build_expr(&r.expr);
                    }
                }
                Statement::Repeat(loop_) => self.build_repeat(loop_, span),
            }
        }
    }

    fn build_assignment(&mut self, a: &ast::Assignment<Span>, span: Span) {
        let value = self.build_expr(&a.expr);
        if let (Some(target), Some(value)) = (&a.target, value) {
            self.resolve_assignment_target(&target.name, target.index.as_deref(), value, span);
        }
    }

    fn build_repeat(&mut self, loop_: &ast::RepeatLoop<Span>, span: Span) {
        let count_span = *loop_.count_assignment.metadata();
        self.build_assignment(loop_.count_assignment.value(), count_span);
        let count_name = match &loop_.count_assignment.value().target {
            Some(target) => target.name.clone(),
            None => return,
        };
        let count_handle = match self.scopes.lookup(&count_name) {
            Some(h) => h,
            None => return,
        };
        let count = match self.const_eval.evaluate_real(&self.graph, count_handle) {
            Ok(v) => v,
            Err(_) => {
                self.diagnostics.push(Diagnostic::new(DiagnosticKind::ConstantExpected, span));
                return;
            }
        };
        if count <= 0.0 || count.fract() != 0.0 || count > MAX_REPEAT_COUNT as f64 {
            self.diagnostics
                .push(Diagnostic::new(DiagnosticKind::InvalidLoopCount { count: count as i64 }, span));
            return;
        }

        for _ in 0..(count as u64) {
            self.scopes.push();
            let mut unused_return = None;
            self.walk_statements(&loop_.body.statements, &mut unused_return);
            self.scopes.pop();
        }
    }

    fn resolve_assignment_target(&mut self, name: &str, index: Option<&SpanExpr>, value: NodeHandle, span: Span) {
        match index {
            None => self.scopes.bind(name, value),
            Some(idx_expr) => {
                let idx_handle = match self.build_expr(idx_expr) {
                    Some(h) => h,
                    None => return,
                };
                let i = match self.const_eval.evaluate_real(&self.graph, idx_handle) {
                    Ok(v) => v,
                    Err(_) => {
                        self.diagnostics.push(Diagnostic::new(DiagnosticKind::ConstantExpected, span));
                        return;
                    }
                };
                let old_array = match self.scopes.lookup(name) {
                    Some(h) => h,
                    None => return,
                };
                let old_elements: Vec<NodeHandle> = self
                    .graph
                    .get_node(old_array)
                    .map(|n| n.incoming_edges().to_vec())
                    .unwrap_or_default();
                let len = old_elements.len();
                if i < 0.0 || i.fract() != 0.0 || (i as usize) >= len {
                    self.diagnostics
                        .push(Diagnostic::new(DiagnosticKind::InvalidArrayIndex { index: i as i64, len }, span));
                    return;
                }
                let element_type = self
                    .graph
                    .get_node(old_array)
                    .ok()
                    .and_then(|n| n.data_type)
                    .map(|qdt| DataType { is_array: false, ..qdt.data_type })
                    .unwrap_or_else(DataType::void);
                // Rebuilt as a fresh node, not mutated in place: other
                // bindings that still hold the old array handle must keep
                // seeing the pre-write elements (`spec.md` §4.2).
                let new_array = self.graph.add_array(element_type);
                for (position, element) in old_elements.iter().enumerate() {
                    let element_handle = if position == i as usize { value } else { *element };
                    self.graph
                        .add_array_value(new_array, element_handle)
                        .expect("rebuilt array element always assignable");
                }
                self.scopes.bind(name, new_array);
            }
        }
    }

    // -- expressions -----------------------------------------------------

    fn build_expr(&mut self, expr: &SpanExpr) -> Option<NodeHandle> {
        match &expr.value().kind {
            ast::ExprKind::Constant(c) => self.build_constant(c),
            ast::ExprKind::NamedValueRef(r) => self.build_named_value_ref(r, *expr.metadata()),
            ast::ExprKind::ModuleCall(call) => self.build_module_call(call, *expr.metadata()),
        }
    }

    fn build_constant(&mut self, c: &ast::Constant<Span>) -> Option<NodeHandle> {
        Some(match c {
            ast::Constant::Real(v) => self.graph.add_constant_real(*v, 1),
            ast::Constant::Bool(v) => self.graph.add_constant_bool(*v),
            ast::Constant::String(s) => self.graph.add_constant_string(s),
            ast::Constant::Array(elements) => {
                let mut built = Vec::with_capacity(elements.len());
                let mut element_kind = PrimitiveKind::Real;
                for (i, e) in elements.iter().enumerate() {
                    if let Some(h) = self.build_expr(e) {
                        if i == 0 {
                            element_kind = self
                                .graph
                                .get_node(h)
                                .ok()
                                .and_then(|n| n.data_type)
                                .map(|qdt| qdt.data_type.primitive_kind)
                                .unwrap_or(PrimitiveKind::Real);
                        }
                        built.push(h);
                    }
                }
                let array = self.graph.add_array(DataType::scalar(element_kind));
                for h in built {
                    self.graph.add_array_value(array, h).expect("array literal elements are always assignable");
                }
                array
            }
        })
    }

    fn build_named_value_ref(&mut self, r: &ast::NamedValueRef<Span>, span: Span) -> Option<NodeHandle> {
        let base = self.scopes.lookup(&r.name)?;
        match &r.index {
            None => Some(base),
            Some(idx_expr) => {
                let idx_handle = self.build_expr(idx_expr)?;
                let i = match self.const_eval.evaluate_real(&self.graph, idx_handle) {
                    Ok(v) => v,
                    Err(_) => {
                        self.diagnostics.push(Diagnostic::new(DiagnosticKind::ConstantExpected, span));
                        return None;
                    }
                };
                let elements = self.graph.get_node(base).ok()?.incoming_edges().to_vec();
                if i < 0.0 || i.fract() != 0.0 || (i as usize) >= elements.len() {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::InvalidArrayIndex { index: i as i64, len: elements.len() },
                        span,
                    ));
                    return None;
                }
                Some(elements[i as usize])
            }
        }
    }

    /// Compute an argument expression's data type without building it, for
    /// overload resolution. Reads straight off already-built graph nodes
    /// (valid because definite-assignment was already enforced by the
    /// validator) rather than maintaining a parallel type-scope; returns
    /// `void` for a not-yet-bound name, which is always an `out`-position
    /// reference -- [Self::resolve_callee] skips comparing those positions.
    fn peek_data_type(&self, expr: &SpanExpr) -> DataType {
        match &expr.value().kind {
            ast::ExprKind::Constant(c) => match c {
                ast::Constant::Real(_) => DataType::scalar(PrimitiveKind::Real),
                ast::Constant::Bool(_) => DataType::scalar(PrimitiveKind::Bool),
                ast::Constant::String(_) => DataType::scalar(PrimitiveKind::String),
                ast::Constant::Array(elements) => {
                    let kind = elements.first().map(|e| self.peek_data_type(e).primitive_kind).unwrap_or(PrimitiveKind::Real);
                    DataType::array_of(kind)
                }
            },
            ast::ExprKind::NamedValueRef(r) => self
                .scopes
                .lookup(&r.name)
                .and_then(|h| self.graph.get_node(h).ok())
                .and_then(|n| n.data_type)
                .map(|qdt| {
                    if r.index.is_some() && qdt.data_type.is_array {
                        DataType::scalar(qdt.data_type.primitive_kind)
                    } else {
                        qdt.data_type
                    }
                })
                .unwrap_or_else(DataType::void),
            ast::ExprKind::ModuleCall(call) => {
                let arg_types: Vec<DataType> = call.args.iter().map(|a| self.peek_data_type(a)).collect();
                self.resolve_callee(&call.callee, &arg_types).map(|d| d.return_type).unwrap_or_else(DataType::void)
            }
        }
    }

    /// Find the declaration an overloaded call resolves to. Ignores
    /// `out`-qualified positions when comparing argument types, since the
    /// caller's expression there can't be type-peeked before the overload
    /// (and hence its qualifier) is known -- see [Self::peek_data_type].
    fn resolve_callee(&self, name: &str, arg_types: &[DataType]) -> Option<&'a ast::ModuleDecl<Span>> {
        let decls = self.modules.get(name)?;
        decls
            .iter()
            .find(|d| {
                d.args.len() == arg_types.len()
                    && d.args
                        .iter()
                        .zip(arg_types)
                        .all(|(a, t)| a.qualifier == Qualifier::Out || a.data_type == *t)
            })
            .or_else(|| decls.first())
            .copied()
    }

    fn build_module_call(&mut self, call: &ast::ModuleCall<Span>, span: Span) -> Option<NodeHandle> {
        let arg_data_types: Vec<DataType> = call.args.iter().map(|a| self.peek_data_type(a)).collect();
        let decl = self.resolve_callee(&call.callee, &arg_data_types)?;
        match &decl.kind {
            ModuleKind::Native(handle) => self.build_native_call(*handle, decl, call, span),
            ModuleKind::Source { body } => self.build_source_call(decl, body, call, span),
        }
    }

    fn build_native_call(
        &mut self,
        handle: NativeModuleHandle,
        decl: &'a ast::ModuleDecl<Span>,
        call: &ast::ModuleCall<Span>,
        span: Span,
    ) -> Option<NodeHandle> {
        let info = self.registry.lookup(handle).clone();

        let mut in_arg_handles: Vec<NodeHandle> = Vec::new();
        let mut out_call_indices: Vec<usize> = Vec::new();
        for (i, arg_expr) in call.args.iter().enumerate() {
            if decl.args[i].qualifier == Qualifier::Out {
                out_call_indices.push(i);
            } else if let Some(h) = self.build_expr(arg_expr) {
                in_arg_handles.push(h);
            }
        }

        let out_arg_decls: Vec<&ast::ArgDecl> = decl.args.iter().filter(|a| a.qualifier == Qualifier::Out).collect();
        let mut out_slots: Vec<DataType> = Vec::new();
        if !decl.return_type.is_void() {
            out_slots.push(decl.return_type);
        }
        out_slots.extend(out_arg_decls.iter().map(|a| a.data_type));

        if let Some(signature) = info.compile_time {
            let dependent_positions: Vec<usize> = info
                .in_arguments()
                .enumerate()
                .filter(|(_, a)| a.is_dependent_constant_input)
                .map(|(i, _)| i)
                .collect();
            let dependents_constant = dependent_positions.is_empty()
                || dependent_positions
                    .iter()
                    .all(|&i| in_arg_handles.get(i).map(|h| self.graph.is_node_constant(*h)).unwrap_or(false));
            let all_constant = in_arg_handles.len() == info.in_arg_count()
                && in_arg_handles.iter().all(|h| self.graph.is_node_constant(*h));
            let should_fold = all_constant
                && (info.always_runs_at_compile_time
                    || (info.runs_at_compile_time_when_dependent_constants_are_constant && dependents_constant));

            if should_fold {
                let arg_values: Option<Vec<ConstantValue>> =
                    in_arg_handles.iter().map(|h| self.const_eval.evaluate(&self.graph, *h).ok()).collect();
                if let Some(arg_values) = arg_values {
                    match (signature.call)(&arg_values) {
                        Ok(results) if results.len() == out_slots.len() => {
                            let result_handles: Vec<NodeHandle> =
                                results.iter().map(|v| materialize_constant(&mut self.graph, v)).collect();
                            return self.bind_call_outputs(decl, call, &out_call_indices, &result_handles, span);
                        }
                        Err(e) => {
                            self.diagnostics.push(Diagnostic::new(
                                DiagnosticKind::NativeModuleImplementation { message: e.message },
                                span,
                            ));
                        }
                        _ => {}
                    }
                }
            }
        }

        let in_arg_types: Vec<QualifiedDataType> = decl
            .args
            .iter()
            .filter(|a| a.qualifier != Qualifier::Out)
            .map(|a| QualifiedDataType::variable(a.data_type))
            .collect();
        let out_arg_types: Vec<QualifiedDataType> =
            out_slots.iter().map(|dt| QualifiedDataType::variable(*dt)).collect();

        let call_handle = self.graph.add_native_module_call(handle, 1, &in_arg_types, &out_arg_types);
        let indexed_inputs = self.graph.get_node(call_handle).expect("just created").incoming_edges().to_vec();
        for (slot, producer) in indexed_inputs.iter().zip(in_arg_handles.iter()) {
            self.graph.add_edge(*producer, *slot).expect("argument type already checked by the validator");
        }
        let indexed_outputs = self.graph.get_node(call_handle).expect("just created").outgoing_edges().to_vec();
        self.bind_call_outputs(decl, call, &out_call_indices, &indexed_outputs, span)
    }

    fn build_source_call(
        &mut self,
        decl: &'a ast::ModuleDecl<Span>,
        body: &'a ast::Scope<Span>,
        call: &ast::ModuleCall<Span>,
        span: Span,
    ) -> Option<NodeHandle> {
        let mut bindings: Vec<(String, NodeHandle)> = Vec::new();
        let mut out_call_indices: Vec<usize> = Vec::new();
        for (i, arg_expr) in call.args.iter().enumerate() {
            if decl.args[i].qualifier == Qualifier::Out {
                out_call_indices.push(i);
            } else if let Some(h) = self.build_expr(arg_expr) {
                bindings.push((decl.args[i].name.clone(), h));
            }
        }

        self.scopes.push();
        for (name, handle) in bindings {
            self.scopes.current_mut().bind(name, handle);
        }
        let mut return_handle = None;
        self.walk_statements(&body.statements, &mut return_handle);

        let out_handles: Vec<Option<NodeHandle>> = decl
            .args
            .iter()
            .filter(|a| a.qualifier == Qualifier::Out)
            .map(|a| self.scopes.lookup(&a.name))
            .collect();
        self.scopes.pop();

        for (j, call_arg_index) in out_call_indices.iter().enumerate() {
            if let Some(value) = out_handles.get(j).copied().flatten() {
                if let ast::ExprKind::NamedValueRef(r) = &call.args[*call_arg_index].value().kind {
                    self.resolve_assignment_target(&r.name, r.index.as_deref(), value, span);
                }
            }
        }

        return_handle
    }

    fn bind_call_outputs(
        &mut self,
        decl: &ast::ModuleDecl<Span>,
        call: &ast::ModuleCall<Span>,
        out_call_indices: &[usize],
        result_handles: &[NodeHandle],
        span: Span,
    ) -> Option<NodeHandle> {
        let has_return = !decl.return_type.is_void();
        let return_handle = if has_return { result_handles.first().copied() } else { None };
        let out_handles = &result_handles[if has_return { 1 } else { 0 }..];
        for (j, call_arg_index) in out_call_indices.iter().enumerate() {
            if let Some(handle) = out_handles.get(j).copied() {
                if let ast::ExprKind::NamedValueRef(r) = &call.args[*call_arg_index].value().kind {
                    self.resolve_assignment_target(&r.name, r.index.as_deref(), handle, span);
                }
            }
        }
        return_handle
    }
}
