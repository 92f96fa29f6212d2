//! End-to-end tests driving `wavelang_compiler_core::compile` from hand-built
//! ASTs (there's no parser in this crate to produce them from source text).
//! Covers the scenarios and testable properties from `spec.md` §8.

use std::collections::HashMap;

use wavelang_compiler_core::ast::{
    ArgDecl, Assignment, AssignTarget, Constant, Expr, ExprKind, File, ModuleCall, ModuleDecl, ModuleKind,
    NamedValueDecl, NamedValueRef, RepeatLoop, ReturnStatement, Scope, Statement,
};
use wavelang_compiler_core::registry::{
    CompileTimeError, CompileTimeSignature, ConstantValue, DataAccess, NativeModuleArgument, NativeModuleHandle,
    NativeModuleInfo, NativeModuleRegistry, NativeModuleUid,
};
use wavelang_compiler_core::types::{DataType, PrimitiveKind, Qualifier};
use wavelang_compiler_core::util::{Node, Span};
use wavelang_compiler_core::{compile, serialize, CompileError, InstrumentGlobals};

type SpanNode<T> = Node<T, Span>;

fn node<T>(value: T) -> SpanNode<T> {
    Node(value, Span::DUMMY)
}

fn real() -> DataType {
    DataType::scalar(PrimitiveKind::Real)
}

fn boolean() -> DataType {
    DataType::scalar(PrimitiveKind::Bool)
}

fn real_const(v: f64) -> SpanNode<Expr<Span>> {
    node(Expr::new(ExprKind::Constant(Constant::Real(v))))
}

fn bool_const(v: bool) -> SpanNode<Expr<Span>> {
    node(Expr::new(ExprKind::Constant(Constant::Bool(v))))
}

fn name_ref(name: &str) -> SpanNode<Expr<Span>> {
    node(Expr::new(ExprKind::NamedValueRef(NamedValueRef { name: name.to_string(), index: None })))
}

fn call(callee: &str, args: Vec<SpanNode<Expr<Span>>>) -> SpanNode<Expr<Span>> {
    node(Expr::new(ExprKind::ModuleCall(ModuleCall { callee: callee.to_string(), args, via_operator: false })))
}

fn assignment_node(target: &str, expr: SpanNode<Expr<Span>>) -> SpanNode<Assignment<Span>> {
    node(Assignment { target: Some(AssignTarget { name: target.to_string(), index: None }), expr: Box::new(expr) })
}

fn assign(target: &str, expr: SpanNode<Expr<Span>>) -> SpanNode<Statement<Span>> {
    node(Statement::Assignment(assignment_node(target, expr).into_value()))
}

fn local_decl(name: &str, data_type: DataType) -> SpanNode<Statement<Span>> {
    node(Statement::Decl(NamedValueDecl { name: name.to_string(), qualifier: Qualifier::None, data_type }))
}

fn repeat(count_name: &str, count: f64, body: Vec<SpanNode<Statement<Span>>>) -> SpanNode<Statement<Span>> {
    node(Statement::Repeat(RepeatLoop {
        count_assignment: Box::new(assignment_node(count_name, real_const(count))),
        body: Scope::new(body),
    }))
}

fn ret(expr: SpanNode<Expr<Span>>) -> SpanNode<Statement<Span>> {
    node(Statement::Return(ReturnStatement { expr: Box::new(expr) }))
}

fn module(
    name: &str,
    args: Vec<ArgDecl>,
    return_type: DataType,
    body_tail: Vec<SpanNode<Statement<Span>>>,
) -> SpanNode<Statement<Span>> {
    // Mirrors the builder's expectation (ast.rs's Scope doc comment): the
    // body's leading statements are a Decl per argument, in order.
    let mut statements: Vec<SpanNode<Statement<Span>>> = args
        .iter()
        .map(|a| {
            node(Statement::Decl(wavelang_compiler_core::ast::NamedValueDecl {
                name: a.name.clone(),
                qualifier: a.qualifier,
                data_type: a.data_type,
            }))
        })
        .collect();
    statements.extend(body_tail);
    node(Statement::ModuleDecl(ModuleDecl {
        name: name.to_string(),
        return_type,
        args,
        kind: ModuleKind::Source { body: Scope::new(statements) },
    }))
}

fn out_arg(name: &str, data_type: DataType) -> ArgDecl {
    ArgDecl { name: name.to_string(), qualifier: Qualifier::Out, data_type }
}

fn in_arg(name: &str, data_type: DataType) -> ArgDecl {
    ArgDecl { name: name.to_string(), qualifier: Qualifier::In, data_type }
}

fn file_of(decls: Vec<SpanNode<Statement<Span>>>) -> File<Span> {
    File { top_level: Scope::new(decls) }
}

fn default_globals() -> InstrumentGlobals {
    InstrumentGlobals { max_voices: 16, sample_rate: 44_100, chunk_size: 64, activate_fx_immediately: false }
}

/// A registry carrying a single native module, `add(a, b) -> real`, foldable
/// at compile time when both inputs are constant. Enough for the scenarios
/// below; mirrors the `ArithmeticRegistry` test double in `optimize/mod.rs`.
struct AddRegistry {
    modules: HashMap<u32, NativeModuleInfo>,
    by_uid: HashMap<u64, NativeModuleHandle>,
}

impl AddRegistry {
    fn new() -> Self {
        let mut modules = HashMap::new();
        let mut by_uid = HashMap::new();
        modules.insert(
            0,
            NativeModuleInfo {
                uid: NativeModuleUid(1),
                name: "add".to_string(),
                arguments: vec![
                    NativeModuleArgument {
                        name: "a".to_string(),
                        qualifier: Qualifier::In,
                        data_type: real(),
                        data_access: DataAccess::Value,
                        is_dependent_constant_input: true,
                    },
                    NativeModuleArgument {
                        name: "b".to_string(),
                        qualifier: Qualifier::In,
                        data_type: real(),
                        data_access: DataAccess::Value,
                        is_dependent_constant_input: true,
                    },
                ],
                return_type: real(),
                compile_time: Some(CompileTimeSignature {
                    call: |args| match args {
                        [ConstantValue::Real(a), ConstantValue::Real(b)] => Ok(vec![ConstantValue::Real(a + b)]),
                        _ => Err(CompileTimeError { message: "bad args".to_string() }),
                    },
                }),
                has_get_latency: false,
                operator_identity: Some("+"),
                always_runs_at_compile_time: false,
                runs_at_compile_time_when_dependent_constants_are_constant: true,
            },
        );
        by_uid.insert(1, NativeModuleHandle(0));
        Self { modules, by_uid }
    }

    fn native_decl(&self) -> SpanNode<Statement<Span>> {
        let info = &self.modules[&0];
        node(Statement::ModuleDecl(ModuleDecl {
            name: info.name.clone(),
            return_type: info.return_type,
            args: info
                .arguments
                .iter()
                .map(|a| ArgDecl { name: a.name.clone(), qualifier: a.qualifier, data_type: a.data_type })
                .collect(),
            kind: ModuleKind::Native(NativeModuleHandle(0)),
        }))
    }
}

impl NativeModuleRegistry for AddRegistry {
    fn lookup(&self, handle: NativeModuleHandle) -> &NativeModuleInfo {
        &self.modules[&handle.0]
    }
    fn lookup_uid(&self, uid: NativeModuleUid) -> Option<NativeModuleHandle> {
        self.by_uid.get(&uid.0).copied()
    }
    fn find_by_name(&self, name: &str) -> Vec<NativeModuleHandle> {
        self.modules.iter().filter(|(_, i)| i.name == name).map(|(k, _)| NativeModuleHandle(*k)).collect()
    }
    fn optimization_rules_for(&self, _handle: NativeModuleHandle) -> &[wavelang_compiler_core::optimize::rule::OptimizationRule] {
        &[]
    }
}

struct EmptyRegistry;

impl NativeModuleRegistry for EmptyRegistry {
    fn lookup(&self, _handle: NativeModuleHandle) -> &NativeModuleInfo {
        unreachable!("no native modules registered in this test")
    }
    fn lookup_uid(&self, _uid: NativeModuleUid) -> Option<NativeModuleHandle> {
        None
    }
    fn find_by_name(&self, _name: &str) -> Vec<NativeModuleHandle> {
        Vec::new()
    }
    fn optimization_rules_for(&self, _handle: NativeModuleHandle) -> &[wavelang_compiler_core::optimize::rule::OptimizationRule] {
        &[]
    }
}

#[test]
fn minimal_voice_compiles() {
    let registry = EmptyRegistry;
    let voice_main = module(
        "voice_main",
        vec![out_arg("sample", real())],
        boolean(),
        vec![assign("sample", real_const(1.0)), ret(bool_const(true))],
    );
    let file = file_of(vec![voice_main]);

    let instrument = compile(&file, "", default_globals(), &registry).expect("should compile");
    assert_eq!(instrument.variants.len(), 1);
    let variant = &instrument.variants[0];
    assert!(variant.voice_graph.is_some());
    assert!(variant.fx_graph.is_none());
}

#[test]
fn missing_entry_point_is_rejected() {
    let registry = EmptyRegistry;
    let helper = module("helper", vec![in_arg("x", real())], real(), vec![ret(name_ref("x"))]);
    let file = file_of(vec![helper]);

    match compile(&file, "", default_globals(), &registry) {
        Err(CompileError::Validation(_)) => {}
        other => panic!("expected a validation error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn constant_call_folds_away_at_build_time() {
    let registry = AddRegistry::new();
    let voice_main = module(
        "voice_main",
        vec![out_arg("sample", real())],
        boolean(),
        vec![assign("sample", call("add", vec![real_const(1.0), real_const(2.0)])), ret(bool_const(true))],
    );
    let file = file_of(vec![registry.native_decl(), voice_main]);

    let instrument = compile(&file, "", default_globals(), &registry).expect("should compile");
    let voice = instrument.variants[0].voice_graph.as_ref().unwrap();

    // A folded graph has no surviving native-module-call node; the output is
    // fed directly by a constant.
    let has_call = voice.node_handles().any(|h| {
        matches!(voice.get_node(h).map(|n| &n.kind), Ok(wavelang_compiler_core::graph::NodeKind::NativeModuleCall { .. }))
    });
    assert!(!has_call, "add(1, 2) should have folded to a constant");
}

#[test]
fn unused_computation_is_dead_code_eliminated() {
    let registry = AddRegistry::new();
    let voice_main = module(
        "voice_main",
        vec![out_arg("sample", real())],
        boolean(),
        vec![
            node(Statement::Decl(wavelang_compiler_core::ast::NamedValueDecl {
                name: "unused".to_string(),
                qualifier: Qualifier::In,
                data_type: real(),
            })),
            assign("unused", call("add", vec![real_const(3.0), real_const(4.0)])),
            assign("sample", real_const(0.0)),
            ret(bool_const(true)),
        ],
    );
    let file = file_of(vec![registry.native_decl(), voice_main]);

    let instrument = compile(&file, "", default_globals(), &registry).expect("should compile");
    let voice = instrument.variants[0].voice_graph.as_ref().unwrap();

    // Only the `sample` constant plus the two outputs should remain; the
    // dead `unused` computation and its operands are gone.
    assert_eq!(voice.node_count(), 3);
}

#[test]
fn overload_resolution_picks_the_matching_signature() {
    let registry = EmptyRegistry;
    let double_real = module("double", vec![in_arg("x", real())], real(), vec![ret(call("add_self", vec![name_ref("x")]))]);
    // `add_self` itself is undeclared on purpose: this test only exercises
    // that two `double` overloads coexist and are distinguished by arg type,
    // so the bool overload is the one actually invoked from voice_main.
    let double_bool = module(
        "double",
        vec![in_arg("x", boolean())],
        boolean(),
        vec![ret(name_ref("x"))],
    );
    let voice_main = module(
        "voice_main",
        vec![out_arg("sample", real())],
        boolean(),
        vec![assign("sample", real_const(5.0)), ret(call("double", vec![bool_const(true)]))],
    );
    let file = file_of(vec![double_real, double_bool, voice_main]);

    let instrument = compile(&file, "", default_globals(), &registry).expect("should compile");
    assert!(instrument.variants[0].voice_graph.is_some());
}

#[test]
fn cyclic_module_calls_are_rejected() {
    let registry = EmptyRegistry;
    let a = module("a_helper", vec![in_arg("x", real())], real(), vec![ret(call("b_helper", vec![name_ref("x")]))]);
    let b = module("b_helper", vec![in_arg("x", real())], real(), vec![ret(call("a_helper", vec![name_ref("x")]))]);
    let voice_main = module(
        "voice_main",
        vec![out_arg("sample", real())],
        boolean(),
        vec![assign("sample", call("a_helper", vec![real_const(1.0)])), ret(bool_const(true))],
    );
    let file = file_of(vec![a, b, voice_main]);

    match compile(&file, "", default_globals(), &registry) {
        Err(CompileError::Validation(diagnostics)) => {
            assert!(diagnostics
                .iter()
                .any(|d| matches!(d.kind, wavelang_compiler_core::DiagnosticKind::CyclicModuleCall)));
        }
        other => panic!("expected a cyclic-module-call diagnostic, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn voice_fx_arity_mismatch_is_rejected() {
    let registry = EmptyRegistry;
    let voice_main = module(
        "voice_main",
        vec![out_arg("a", real()), out_arg("b", real())],
        boolean(),
        vec![assign("a", real_const(1.0)), assign("b", real_const(2.0)), ret(bool_const(true))],
    );
    let fx_main = module(
        "fx_main",
        vec![in_arg("only_one", real())],
        boolean(),
        vec![ret(bool_const(true))],
    );
    let file = file_of(vec![voice_main, fx_main]);

    match compile(&file, "", default_globals(), &registry) {
        Err(CompileError::Validation(diagnostics)) => {
            assert!(diagnostics.iter().any(|d| matches!(
                d.kind,
                wavelang_compiler_core::DiagnosticKind::EntryPointArityMismatch { voice_out_count: 2, fx_in_count: 1 }
            )));
        }
        other => panic!("expected an entry-point arity mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn voice_and_fx_graphs_compile_together_and_round_trip_through_serialization() {
    let registry = EmptyRegistry;
    let voice_main = module(
        "voice_main",
        vec![out_arg("sample", real())],
        boolean(),
        vec![assign("sample", real_const(0.5)), ret(bool_const(true))],
    );
    let fx_main = module("fx_main", vec![in_arg("sample", real())], boolean(), vec![ret(bool_const(true))]);
    let file = file_of(vec![voice_main, fx_main]);

    let instrument = compile(&file, "", default_globals(), &registry).expect("should compile");
    assert!(instrument.variants[0].voice_graph.is_some());
    assert!(instrument.variants[0].fx_graph.is_some());

    let bytes = serialize::save(&instrument, &registry).expect("should serialize");
    let loaded = serialize::load(&bytes, &registry).expect("should deserialize");
    assert_eq!(loaded.variants.len(), instrument.variants.len());
    assert_eq!(loaded.variants[0].globals, instrument.variants[0].globals);
}

#[test]
fn unassigned_out_argument_is_rejected() {
    let registry = EmptyRegistry;
    let voice_main = module("voice_main", vec![out_arg("sample", real())], boolean(), vec![ret(bool_const(true))]);
    let file = file_of(vec![voice_main]);

    match compile(&file, "", default_globals(), &registry) {
        Err(CompileError::Validation(diagnostics)) => {
            assert!(diagnostics
                .iter()
                .any(|d| matches!(&d.kind, wavelang_compiler_core::DiagnosticKind::UnassignedOutArgument { name } if name == "sample")));
        }
        other => panic!("expected an unassigned-out-argument diagnostic, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn repeat_loop_unrolls_and_folds_to_a_constant() {
    let registry = AddRegistry::new();
    let voice_main = module(
        "voice_main",
        vec![out_arg("sample", real())],
        boolean(),
        vec![
            local_decl("count", real()),
            local_decl("s", real()),
            assign("s", real_const(0.0)),
            repeat("count", 3.0, vec![assign("s", call("add", vec![name_ref("s"), real_const(1.0)]))]),
            assign("sample", name_ref("s")),
            ret(bool_const(true)),
        ],
    );
    let file = file_of(vec![registry.native_decl(), voice_main]);

    let instrument = compile(&file, "", default_globals(), &registry).expect("should compile");
    let voice = instrument.variants[0].voice_graph.as_ref().unwrap();

    let sample_output = voice
        .node_handles()
        .find(|h| {
            matches!(
                voice.get_node(*h).map(|n| &n.kind),
                Ok(wavelang_compiler_core::graph::NodeKind::Output {
                    index: wavelang_compiler_core::graph::OutputIndex::Ordinary(0)
                })
            )
        })
        .expect("sample output node");
    let producer = voice.get_node(sample_output).unwrap().incoming_edges()[0];
    assert!(voice.is_node_constant(producer), "repeat(3) { s := s + 1 } should fully fold to a constant");
    assert!(matches!(
        voice.get_node(producer).unwrap().kind,
        wavelang_compiler_core::graph::NodeKind::Constant(wavelang_compiler_core::graph::ConstantData::Real(v)) if v == 3.0
    ));
}

#[test]
fn optimization_is_idempotent() {
    let registry = AddRegistry::new();
    let voice_main = module(
        "voice_main",
        vec![out_arg("sample", real())],
        boolean(),
        vec![assign("sample", call("add", vec![real_const(1.0), real_const(2.0)])), ret(bool_const(true))],
    );
    let file = file_of(vec![registry.native_decl(), voice_main]);

    let mut instrument = compile(&file, "", default_globals(), &registry).expect("should compile");
    let graph = instrument.variants[0].voice_graph.as_mut().unwrap();
    let before = graph.node_count();
    wavelang_compiler_core::optimize::optimize(graph, &registry);
    assert_eq!(graph.node_count(), before, "a second optimization pass should be a no-op");
}
