//! The two-pass AST validator. `spec.md` §4.1. Pass 1 registers every
//! top-level module declaration (and checks entry-point shape); pass 2 walks
//! each non-native module's body enforcing the assignment discipline and
//! expression expectations, and the module-call graph built along the way is
//! checked for cycles once pass 2 completes.
//!
//! Diagnostics are **accumulated**, not short-circuited -- this is the one
//! place in the core that deliberately does not use `thiserror`'s `?`
//! propagation, because the whole point of a validator pass is to report
//! everything wrong in one run (`SPEC_FULL.md` §9).

mod cycle;
mod scope;

use crate::ast::{self, ModuleKind, Statement};
use crate::consts::{FX_ENTRY_POINT, VOICE_ENTRY_POINT};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::registry::NativeModuleRegistry;
use crate::types::{data_types_compatible, DataType, PrimitiveKind, Qualifier};
use crate::util::{Node, Span};
use cycle::ModuleCallGraph;
use scope::{IdentifierRecord, ScopeStack};
use std::collections::HashMap;

type SpanExpr = Node<ast::Expr<Span>, Span>;

/// Which kind of expression this position requires, per the table in
/// `spec.md` §4.1.3.
#[derive(Copy, Clone, PartialEq, Eq)]
enum Expectation {
    Value,
    Valueless,
    AssignmentTarget,
}

/// What validating a sub-expression produced: its type, the name it's bound
/// to (if it's a reference), and whether it actually carries a usable value.
struct ExprResult {
    data_type: DataType,
    #[allow(dead_code)]
    bound_name: Option<String>,
    has_value: bool,
}

impl ExprResult {
    fn void() -> Self {
        Self {
            data_type: DataType::void(),
            bound_name: None,
            has_value: false,
        }
    }
}

#[derive(Clone)]
struct ModuleSignature {
    args: Vec<ast::ArgDecl>,
    return_type: DataType,
}

impl ModuleSignature {
    fn arg_types(&self) -> Vec<DataType> {
        self.args.iter().map(|a| a.data_type).collect()
    }
}

/// Whether a voice and/or fx entry point was found, for the builder to
/// decide which graphs to assemble.
pub struct ValidationOutput {
    pub diagnostics: Vec<Diagnostic>,
    pub has_voice_entry: bool,
    pub has_fx_entry: bool,
}

impl ValidationOutput {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

pub fn validate(file: &ast::File<Span>, registry: &dyn NativeModuleRegistry) -> ValidationOutput {
    let mut validator = Validator::new(registry);

    for stmt in &file.top_level.statements {
        if let Statement::ModuleDecl(decl) = stmt.value() {
            validator.register_module(decl, *stmt.metadata());
        }
    }
    validator.check_entry_points();

    for stmt in &file.top_level.statements {
        if let Statement::ModuleDecl(decl) = stmt.value() {
            validator.validate_module_body(decl, *stmt.metadata());
        }
    }

    if validator.module_call_graph.has_cycle() {
        validator
            .diagnostics
            .push(Diagnostic::new(DiagnosticKind::CyclicModuleCall, Span::DUMMY));
    }

    let has_voice_entry = validator.has_single_overload(VOICE_ENTRY_POINT);
    let has_fx_entry = validator.has_single_overload(FX_ENTRY_POINT);
    if !has_voice_entry && !has_fx_entry {
        validator
            .diagnostics
            .push(Diagnostic::new(DiagnosticKind::MissingEntryPoint, Span::DUMMY));
    }

    ValidationOutput {
        diagnostics: validator.diagnostics,
        has_voice_entry,
        has_fx_entry,
    }
}

struct Validator<'a> {
    registry: &'a dyn NativeModuleRegistry,
    scopes: ScopeStack,
    modules: HashMap<String, Vec<ModuleSignature>>,
    module_call_graph: ModuleCallGraph,
    current_module_index: Option<usize>,
    /// Monotonic statement index within the module body currently being
    /// validated. Deliberately lives here rather than on `Scope` -- a
    /// `repeat` loop body pushes a fresh scope frame but statements inside
    /// it still come after whatever statement preceded the loop.
    current_statement: i64,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Validator<'a> {
    fn new(registry: &'a dyn NativeModuleRegistry) -> Self {
        Self {
            registry,
            scopes: ScopeStack::new(),
            modules: HashMap::new(),
            module_call_graph: ModuleCallGraph::new(),
            current_module_index: None,
            current_statement: 0,
            diagnostics: Vec::new(),
        }
    }

    fn has_single_overload(&self, name: &str) -> bool {
        self.modules.get(name).map(|s| s.len() == 1).unwrap_or(false)
    }

    // -- pass 1 --------------------------------------------------------

    fn register_module(&mut self, decl: &ast::ModuleDecl<Span>, span: Span) {
        if let ModuleKind::Native(handle) = &decl.kind {
            let info = self.registry.lookup(*handle);
            if info.return_type != decl.return_type {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::TypeMismatch {
                        expected: info.return_type,
                        found: decl.return_type,
                    },
                    span,
                ));
            }
        } else {
            self.module_call_graph.add_node(&decl.name);
        }

        let sig = ModuleSignature {
            args: decl.args.clone(),
            return_type: decl.return_type,
        };
        let overloads = self.modules.entry(decl.name.clone()).or_default();
        if overloads.iter().any(|s| s.arg_types() == sig.arg_types()) {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::DuplicateIdentifier { name: decl.name.clone() },
                span,
            ));
        } else {
            overloads.push(sig);
        }
    }

    fn check_entry_points(&mut self) {
        for name in [VOICE_ENTRY_POINT, FX_ENTRY_POINT] {
            let sigs = match self.modules.get(name) {
                Some(sigs) => sigs,
                None => continue,
            };
            if sigs.len() > 1 {
                self.diagnostics
                    .push(Diagnostic::new(DiagnosticKind::OverloadedEntryPoint { name }, Span::DUMMY));
                continue;
            }
            let sig = &sigs[0];
            if sig.return_type != DataType::scalar(PrimitiveKind::Bool) {
                self.diagnostics
                    .push(Diagnostic::new(DiagnosticKind::EntryPointMustReturnBool { name }, Span::DUMMY));
            }
            for arg in &sig.args {
                if arg.data_type.primitive_kind != PrimitiveKind::Real {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::EntryPointArgumentMustBeReal { name },
                        Span::DUMMY,
                    ));
                }
            }
            if name == VOICE_ENTRY_POINT {
                for arg in &sig.args {
                    if arg.qualifier != Qualifier::Out {
                        self.diagnostics
                            .push(Diagnostic::new(DiagnosticKind::VoiceEntryPointArgumentMustBeOut, Span::DUMMY));
                    }
                }
            }
        }

        if let (Some(voice), Some(fx)) = (self.modules.get(VOICE_ENTRY_POINT), self.modules.get(FX_ENTRY_POINT)) {
            if voice.len() == 1 && fx.len() == 1 {
                let voice_out_count = voice[0].args.iter().filter(|a| a.qualifier == Qualifier::Out).count();
                let fx_in_count = fx[0].args.iter().filter(|a| a.qualifier != Qualifier::Out).count();
                if voice_out_count != fx_in_count {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::EntryPointArityMismatch { voice_out_count, fx_in_count },
                        Span::DUMMY,
                    ));
                }
            }
        }
    }

    // -- pass 2 --------------------------------------------------------

    fn validate_module_body(&mut self, decl: &ast::ModuleDecl<Span>, span: Span) {
        let body = match &decl.kind {
            ModuleKind::Source { body } => body,
            ModuleKind::Native(_) => return,
        };

        self.current_module_index = self.module_call_graph.get_index(&decl.name);
        self.current_statement = 0;
        self.scopes.push();

        let mut return_seen = false;
        self.walk_statements(&body.statements, true, decl.return_type, &mut return_seen);

        for arg in &decl.args {
            if arg.qualifier == Qualifier::Out {
                let assigned = self
                    .scopes
                    .current()
                    .get(&arg.name)
                    .map(|r| r.last_statement_assigned >= 0)
                    .unwrap_or(false);
                if !assigned {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UnassignedOutArgument { name: arg.name.clone() },
                        span,
                    ));
                }
            }
        }
        if !decl.return_type.is_void() && !return_seen {
            self.diagnostics
                .push(Diagnostic::new(DiagnosticKind::MissingReturn, span));
        }

        self.scopes.pop();
        self.current_module_index = None;
    }

    fn walk_statements(
        &mut self,
        statements: &[Node<Statement<Span>, Span>],
        is_outermost: bool,
        return_type: DataType,
        return_seen: &mut bool,
    ) {
        let mut after_return_reported = false;
        for stmt in statements {
            let span = *stmt.metadata();
            if *return_seen && !after_return_reported {
                self.diagnostics
                    .push(Diagnostic::new(DiagnosticKind::StatementsAfterReturn, span));
                after_return_reported = true;
            }
            match stmt.value() {
                Statement::ModuleDecl(_) => {}
                Statement::Decl(decl) => self.declare_named_value(decl, span),
                Statement::Assignment(a) => self.validate_assignment(a, span),
                Statement::Return(r) => self.validate_return(r, is_outermost, return_type, return_seen, span),
                Statement::Repeat(loop_) => self.validate_repeat(loop_, span),
            }
        }
    }

    fn declare_named_value(&mut self, decl: &ast::NamedValueDecl, span: Span) {
        if self.scopes.current().contains_local(&decl.name) {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::DuplicateIdentifier { name: decl.name.clone() },
                span,
            ));
            return;
        }
        let assigned_at_entry = decl.qualifier == Qualifier::In;
        let record = IdentifierRecord::new_value(decl.qualifier, decl.data_type, assigned_at_entry);
        self.scopes
            .declare_in_current(decl.name.clone(), record)
            .expect("checked contains_local above");
    }

    fn validate_assignment(&mut self, a: &ast::Assignment<Span>, span: Span) {
        let expectation = if a.target.is_some() {
            Expectation::Value
        } else {
            Expectation::Valueless
        };
        let result = self.validate_expr(&a.expr, expectation);
        if let Some(target) = &a.target {
            self.apply_assignment_target(&target.name, target.index.as_deref(), &result, span);
        }
        self.current_statement += 1;
    }

    fn apply_assignment_target(
        &mut self,
        name: &str,
        index: Option<&SpanExpr>,
        rhs: &ExprResult,
        span: Span,
    ) {
        if let Some(idx_expr) = index {
            self.validate_expr(idx_expr, Expectation::Value);
        }

        let record = match self.scopes.lookup(name) {
            Some((_, record)) => record.clone(),
            None => {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UndeclaredIdentifier { name: name.to_string() },
                    span,
                ));
                return;
            }
        };

        if index.is_some() && record.last_statement_assigned < 0 {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::ArrayIndexedBeforeAssignment { name: name.to_string() },
                span,
            ));
        }

        let expected = if index.is_some() && record.data_type.is_array {
            DataType::scalar(record.data_type.primitive_kind)
        } else {
            record.data_type
        };
        if !rhs.data_type.is_void() && !data_types_compatible(&rhs.data_type, &expected) {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::TypeMismatch { expected, found: rhs.data_type },
                span,
            ));
        }

        let current_statement = self.current_statement;
        let record = self.scopes.lookup_mut(name).expect("looked up above");
        if record.last_statement_assigned == current_statement {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::AmbiguousNamedValueAssignment { name: name.to_string() },
                span,
            ));
        } else {
            record.last_statement_assigned = current_statement;
        }
    }

    fn validate_return(
        &mut self,
        ret: &ast::ReturnStatement<Span>,
        is_outermost: bool,
        return_type: DataType,
        return_seen: &mut bool,
        span: Span,
    ) {
        if !is_outermost {
            self.diagnostics
                .push(Diagnostic::new(DiagnosticKind::ExtraneousReturn, span));
        } else if *return_seen {
            self.diagnostics
                .push(Diagnostic::new(DiagnosticKind::DuplicateReturn, span));
        } else {
            *return_seen = true;
        }

        let result = self.validate_expr(&ret.expr, Expectation::Value);
        if is_outermost && !data_types_compatible(&result.data_type, &return_type) {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::TypeMismatch { expected: return_type, found: result.data_type },
                span,
            ));
        }
        self.current_statement += 1;
    }

    fn validate_repeat(&mut self, loop_: &ast::RepeatLoop<Span>, span: Span) {
        self.validate_assignment(loop_.count_assignment.value(), span);

        self.scopes.push();
        let mut return_seen = false;
        self.walk_statements(&loop_.body.statements, false, DataType::void(), &mut return_seen);
        self.scopes.pop();
    }

    // -- expressions -----------------------------------------------------

    fn validate_expr(&mut self, expr: &SpanExpr, expectation: Expectation) -> ExprResult {
        let span = *expr.metadata();
        match &expr.value().kind {
            ast::ExprKind::Constant(c) => self.validate_constant(c, expectation, span),
            ast::ExprKind::NamedValueRef(r) => self.validate_named_value_ref(r, expectation, span),
            ast::ExprKind::ModuleCall(call) => self.validate_module_call(call, expectation, span),
        }
    }

    fn validate_constant(&mut self, c: &ast::Constant<Span>, expectation: Expectation, span: Span) -> ExprResult {
        if expectation == Expectation::AssignmentTarget {
            self.diagnostics
                .push(Diagnostic::new(DiagnosticKind::InvalidAssignmentTarget, span));
            return ExprResult::void();
        }
        let data_type = match c {
            ast::Constant::Real(_) => DataType::scalar(PrimitiveKind::Real),
            ast::Constant::Bool(_) => DataType::scalar(PrimitiveKind::Bool),
            ast::Constant::String(_) => DataType::scalar(PrimitiveKind::String),
            ast::Constant::Array(elements) => {
                let mut element_kind = PrimitiveKind::Real;
                for (i, element) in elements.iter().enumerate() {
                    let r = self.validate_expr(element, Expectation::Value);
                    if i == 0 {
                        element_kind = r.data_type.primitive_kind;
                    }
                }
                DataType::array_of(element_kind)
            }
        };
        ExprResult { data_type, bound_name: None, has_value: true }
    }

    fn validate_named_value_ref(
        &mut self,
        r: &ast::NamedValueRef<Span>,
        expectation: Expectation,
        span: Span,
    ) -> ExprResult {
        if expectation == Expectation::AssignmentTarget {
            if let Some(idx) = &r.index {
                self.validate_expr(idx, Expectation::Value);
            }
            let record = match self.scopes.lookup(&r.name) {
                Some((_, record)) => record.clone(),
                None => {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UndeclaredIdentifier { name: r.name.clone() },
                        span,
                    ));
                    return ExprResult::void();
                }
            };
            if r.index.is_some() && record.last_statement_assigned < 0 {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ArrayIndexedBeforeAssignment { name: r.name.clone() },
                    span,
                ));
            }
            let current_statement = self.current_statement;
            let already = record.last_statement_assigned == current_statement;
            if already {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::AmbiguousNamedValueAssignment { name: r.name.clone() },
                    span,
                ));
            } else if let Some(record_mut) = self.scopes.lookup_mut(&r.name) {
                record_mut.last_statement_assigned = current_statement;
            }
            let result_type = if r.index.is_some() && record.data_type.is_array {
                DataType::scalar(record.data_type.primitive_kind)
            } else {
                record.data_type
            };
            return ExprResult { data_type: result_type, bound_name: Some(r.name.clone()), has_value: true };
        }

        if let Some(idx) = &r.index {
            self.validate_expr(idx, Expectation::Value);
        }
        let record = match self.scopes.lookup(&r.name) {
            Some((_, record)) => record.clone(),
            None => {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UndeclaredIdentifier { name: r.name.clone() },
                    span,
                ));
                return ExprResult::void();
            }
        };
        let current_statement = self.current_statement;
        let legal = record.last_statement_assigned >= 0
            && (record.last_statement_assigned < current_statement
                || record.last_statement_assigned != record.last_statement_used);
        if !legal {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::UnassignedNamedValueUsed { name: r.name.clone() },
                span,
            ));
        }
        if let Some(record_mut) = self.scopes.lookup_mut(&r.name) {
            record_mut.last_statement_used = current_statement;
        }
        let result_type = if r.index.is_some() && record.data_type.is_array {
            DataType::scalar(record.data_type.primitive_kind)
        } else {
            record.data_type
        };
        ExprResult { data_type: result_type, bound_name: Some(r.name.clone()), has_value: legal }
    }

    /// Compute a sub-expression's type without mutating any validator state
    /// or emitting diagnostics, for overload resolution's chicken-and-egg
    /// problem: the expectation an argument should be validated under (value
    /// vs. assignment-target) depends on the callee's declared qualifiers,
    /// which depend on which overload is selected, which depends on the
    /// argument types.
    fn peek_type(&self, expr: &SpanExpr) -> DataType {
        match &expr.value().kind {
            ast::ExprKind::Constant(c) => match c {
                ast::Constant::Real(_) => DataType::scalar(PrimitiveKind::Real),
                ast::Constant::Bool(_) => DataType::scalar(PrimitiveKind::Bool),
                ast::Constant::String(_) => DataType::scalar(PrimitiveKind::String),
                ast::Constant::Array(elements) => {
                    let kind = elements
                        .first()
                        .map(|e| self.peek_type(e).primitive_kind)
                        .unwrap_or(PrimitiveKind::Real);
                    DataType::array_of(kind)
                }
            },
            ast::ExprKind::NamedValueRef(r) => self
                .scopes
                .lookup(&r.name)
                .map(|(_, record)| {
                    if r.index.is_some() && record.data_type.is_array {
                        DataType::scalar(record.data_type.primitive_kind)
                    } else {
                        record.data_type
                    }
                })
                .unwrap_or_else(DataType::void),
            ast::ExprKind::ModuleCall(call) => {
                let arg_types: Vec<DataType> = call.args.iter().map(|a| self.peek_type(a)).collect();
                self.modules
                    .get(&call.callee)
                    .and_then(|sigs| {
                        sigs.iter()
                            .find(|s| s.arg_types() == arg_types)
                            .or_else(|| sigs.first())
                    })
                    .map(|sig| sig.return_type)
                    .unwrap_or_else(DataType::void)
            }
        }
    }

    fn validate_module_call(&mut self, call: &ast::ModuleCall<Span>, expectation: Expectation, span: Span) -> ExprResult {
        if expectation == Expectation::AssignmentTarget {
            self.diagnostics
                .push(Diagnostic::new(DiagnosticKind::InvalidAssignmentTarget, span));
            return ExprResult::void();
        }

        let arg_types: Vec<DataType> = call.args.iter().map(|a| self.peek_type(a)).collect();
        let sig = match self.resolve_overload(&call.callee, &arg_types, span) {
            Some(sig) => sig,
            None => {
                for arg in &call.args {
                    self.validate_expr(arg, Expectation::Value);
                }
                return ExprResult::void();
            }
        };

        for (i, arg) in call.args.iter().enumerate() {
            let expected_qualifier = sig.args.get(i).map(|a| a.qualifier).unwrap_or(Qualifier::In);
            let arg_expectation = if expected_qualifier == Qualifier::Out {
                Expectation::AssignmentTarget
            } else {
                Expectation::Value
            };
            let result = self.validate_expr(arg, arg_expectation);
            if let Some(expected_arg) = sig.args.get(i) {
                if !data_types_compatible(&result.data_type, &expected_arg.data_type) {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::ArgumentTypeMismatch {
                            index: i,
                            expected: expected_arg.data_type,
                            found: result.data_type,
                        },
                        span,
                    ));
                }
            }
        }

        if let Some(caller) = self.current_module_index {
            if let Some(callee) = self.module_call_graph.get_index(&call.callee) {
                self.module_call_graph.add_edge(caller, callee);
            }
        }

        if sig.return_type.is_void() && expectation == Expectation::Value {
            self.diagnostics
                .push(Diagnostic::new(DiagnosticKind::VoidNotAllowed, span));
        }

        ExprResult {
            data_type: sig.return_type,
            bound_name: None,
            has_value: !sig.return_type.is_void(),
        }
    }

    fn resolve_overload(&mut self, name: &str, arg_types: &[DataType], span: Span) -> Option<ModuleSignature> {
        let sigs = match self.modules.get(name) {
            Some(sigs) => sigs,
            None => {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UndeclaredIdentifier { name: name.to_string() },
                    span,
                ));
                return None;
            }
        };
        if sigs.len() == 1 {
            return Some(sigs[0].clone());
        }
        if let Some(sig) = sigs.iter().find(|s| s.arg_types() == arg_types) {
            return Some(sig.clone());
        }
        self.diagnostics.push(Diagnostic::new(
            DiagnosticKind::EmptyModuleOverloadResolution { name: name.to_string() },
            span,
        ));
        None
    }
}
