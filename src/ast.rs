//! The WaveLang AST. There is no functionality implemented here, just basic
//! types -- the validator (`crate::validate`) and graph builder
//! (`crate::builder`) do all the real work. Every node is generic over a
//! metadata type `M` (almost always [Span]) so tests can build trees with
//! dummy metadata. See `spec.md` §3.2.

use crate::registry::NativeModuleHandle;
use crate::types::{DataType, Qualifier};
use crate::util::{Node, Span};

pub(crate) type SpanNode<T> = Node<T, Span>;

/// Ordered list of child statements; defines an identifier namespace and
/// (during validation) a statement counter. Arguments of a non-native module
/// are the first `arg_count` statements of that module's body scope -- they
/// are declarations like any other, just pre-populated by the module
/// declaration (see [ModuleDecl]).
#[derive(Clone, Debug, PartialEq)]
pub struct Scope<M> {
    pub statements: Vec<Node<Statement<M>, M>>,
}

impl<M> Scope<M> {
    pub fn new(statements: Vec<Node<Statement<M>, M>>) -> Self {
        Self { statements }
    }
}

/// Either a native module (implemented by the host runtime) or a source
/// module (implemented in WaveLang, with a body scope).
#[derive(Clone, Debug, PartialEq)]
pub enum ModuleKind<M> {
    Native(NativeModuleHandle),
    Source { body: Scope<M> },
}

/// One named-value declaration in a module's argument list. For a source
/// module, each of these also appears as the value of the corresponding
/// leading [Statement::Decl] in the body scope -- the argument list here
/// exists so call sites can resolve overloads and arity without re-scanning
/// the body.
#[derive(Clone, Debug, PartialEq)]
pub struct ArgDecl {
    pub name: String,
    pub qualifier: Qualifier,
    pub data_type: DataType,
}

/// A module declaration: name, whether it's native, return type, and
/// argument list.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDecl<M> {
    pub name: String,
    pub return_type: DataType,
    pub args: Vec<ArgDecl>,
    pub kind: ModuleKind<M>,
}

impl<M> ModuleDecl<M> {
    pub fn is_native(&self) -> bool {
        matches!(self.kind, ModuleKind::Native(_))
    }

    pub fn arg_types(&self) -> Vec<DataType> {
        self.args.iter().map(|a| a.data_type).collect()
    }
}

/// A single statement within a scope.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement<M> {
    /// Declares a module at top level. Only ever appears in the outermost
    /// (file) scope.
    ModuleDecl(ModuleDecl<M>),
    /// Introduces a fresh named-value identity with a qualifier and type.
    /// For module arguments these are the leading statements of the body
    /// scope; ordinary `val`-style locals also produce one of these
    /// immediately before their first assignment.
    Decl(NamedValueDecl),
    /// Assigns (or calls, if `target` is `None`) an expression.
    Assignment(Assignment<M>),
    Return(ReturnStatement<M>),
    Repeat(RepeatLoop<M>),
}

/// A named-value declaration: name, qualifier, and type. Each occurrence
/// introduces a fresh identity -- two declarations with the same name in
/// disjoint scopes are unrelated values (`spec.md` §3.2 invariant).
#[derive(Clone, Debug, PartialEq)]
pub struct NamedValueDecl {
    pub name: String,
    pub qualifier: Qualifier,
    pub data_type: DataType,
}

/// The left-hand side of an assignment: a name, optionally with an
/// array-index expression (`arr[i] := ...`).
#[derive(Clone, Debug, PartialEq)]
pub struct AssignTarget<M> {
    pub name: String,
    pub index: Option<Box<Node<Expr<M>, M>>>,
}

/// An assignment statement. `target` is `None` for a valueless call site
/// (a module call whose result is discarded).
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment<M> {
    pub target: Option<AssignTarget<M>>,
    pub expr: Box<Node<Expr<M>, M>>,
}

/// `return expr;`. Legal only in the outermost scope of a returning module.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStatement<M> {
    pub expr: Box<Node<Expr<M>, M>>,
}

/// `repeat(n) { ... }`. Carries the assignment whose evaluated expression is
/// the loop count -- per `spec.md` §4.2, the builder runs the constant
/// evaluator on that assignment's expression to determine the unroll count.
#[derive(Clone, Debug, PartialEq)]
pub struct RepeatLoop<M> {
    pub count_assignment: Box<Node<Assignment<M>, M>>,
    pub body: Scope<M>,
}

/// An expression. Exactly one of {constant, reference, call, array} at a
/// time -- this wrapper exists (rather than a bare enum) so every expression
/// node has a single, uniform place to hang metadata and so the validator's
/// expression visitor (`spec.md` §4.1.3) has one node type to recurse on.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr<M> {
    pub kind: ExprKind<M>,
}

impl<M> Expr<M> {
    pub fn new(kind: ExprKind<M>) -> Self {
        Self { kind }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind<M> {
    Constant(Constant<M>),
    NamedValueRef(NamedValueRef<M>),
    ModuleCall(ModuleCall<M>),
}

/// A reference to a named value, optionally with an array index.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedValueRef<M> {
    pub name: String,
    pub index: Option<Box<Node<Expr<M>, M>>>,
}

/// A literal constant. Array constants carry their element expressions as
/// children (`spec.md` §3.2).
#[derive(Clone, Debug, PartialEq)]
pub enum Constant<M> {
    Real(f64),
    Bool(bool),
    String(String),
    Array(Vec<Node<Expr<M>, M>>),
}

/// A call to a module (native or source), with ordered argument expressions.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleCall<M> {
    pub callee: String,
    pub args: Vec<Node<Expr<M>, M>>,
    /// Whether this call was written with operator syntax (e.g. `a + b`
    /// instead of `add(a, b)`). Purely cosmetic for validation/graph
    /// building; the optimizer's rule matcher also does not distinguish the
    /// two (`spec.md` §4.4.1 patterns match on native-module identity, not
    /// call syntax).
    pub via_operator: bool,
}

/// A full source file's top-level scope: an ordered list of module
/// declarations (and nothing else -- only module declarations are legal at
/// file scope).
#[derive(Clone, Debug, PartialEq)]
pub struct File<M> {
    pub top_level: Scope<M>,
}
