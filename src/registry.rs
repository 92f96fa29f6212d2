//! The native-module registry: a read-only capability the validator, graph
//! builder, constant evaluator, and optimizer all consult. The registry's
//! *implementation* (how native modules are registered, their runtime task
//! bodies) is out of scope (`spec.md` §1, §6); this module only defines the
//! narrow interface the core needs.

use crate::types::{DataType, Qualifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a native module, stable across compilations
/// (persisted in the serialized instrument and re-resolved against the
/// registry on load, per `spec.md` §4.5).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeModuleUid(pub u64);

impl fmt::Display for NativeModuleUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native#{:016x}", self.0)
    }
}

/// Opaque handle into the registry for a native module, valid only for the
/// lifetime of the [NativeModuleRegistry] that produced it. Cheap to copy and
/// compare; this is what graph nodes and optimization rules refer to
/// internally, as opposed to the UID which survives serialization.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeModuleHandle(pub u32);

/// How a native module's argument is physically passed at runtime: as a
/// single scalar value, or as a buffer of per-sample values. The core does
/// not interpret this beyond round-tripping it (see `SPEC_FULL.md` §3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataAccess {
    Value,
    Buffer,
}

/// One argument in a native module's signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NativeModuleArgument {
    pub name: String,
    pub qualifier: Qualifier,
    pub data_type: DataType,
    pub data_access: DataAccess,
    /// Whether this in-argument counts toward
    /// [NativeModuleInfo::runs_at_compile_time_when_dependent_constants_are_constant]'s
    /// resolution -- a module can take variable-only bookkeeping arguments
    /// (e.g. a sample index) alongside arguments that do determine whether
    /// its output folds to a constant. Meaningless for out-arguments.
    pub is_dependent_constant_input: bool,
}

/// Everything the compiler core needs to know about one native module.
#[derive(Clone, Debug)]
pub struct NativeModuleInfo {
    pub uid: NativeModuleUid,
    pub name: String,
    pub arguments: Vec<NativeModuleArgument>,
    pub return_type: DataType,
    /// If present, this native module can be evaluated at compile time by
    /// the constant evaluator (`spec.md` §4.3).
    pub compile_time: Option<CompileTimeSignature>,
    /// If present, the native module that implements this one's get-latency
    /// query (named in `spec.md` §6's registry interface).
    pub has_get_latency: bool,
    /// The operator this native module implements (e.g. `+`), if any.
    pub operator_identity: Option<&'static str>,
    /// Always evaluated at compile time, irrespective of its inputs'
    /// mutability (e.g. a module with no inputs at all).
    pub always_runs_at_compile_time: bool,
    /// Runs at compile time specifically when its dependent-constant inputs
    /// are all constant (the common case for arithmetic/math modules).
    pub runs_at_compile_time_when_dependent_constants_are_constant: bool,
}

impl NativeModuleInfo {
    pub fn in_arg_count(&self) -> usize {
        self.arguments
            .iter()
            .filter(|a| a.qualifier != Qualifier::Out)
            .count()
    }

    pub fn out_arg_count(&self) -> usize {
        self.arguments
            .iter()
            .filter(|a| a.qualifier == Qualifier::Out)
            .count()
    }

    pub fn in_arguments(&self) -> impl Iterator<Item = &NativeModuleArgument> {
        self.arguments.iter().filter(|a| a.qualifier != Qualifier::Out)
    }

    pub fn out_arguments(&self) -> impl Iterator<Item = &NativeModuleArgument> {
        self.arguments.iter().filter(|a| a.qualifier == Qualifier::Out)
    }
}

/// A single typed constant value, as passed across the narrow compile-time
/// calling interface described in `spec.md` §4.3.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConstantValue {
    Real(f64),
    Bool(bool),
    String(String),
    Array(Vec<ConstantValue>),
}

/// Failure reported by a compile-time native-module implementation (e.g. a
/// native `sqrt` called with a negative argument). Distinct from a
/// [crate::error::Diagnostic] because it originates outside the compiler
/// core, in registry-owned code; the validator/builder wrap it into a
/// `native_module_implementation` diagnostic when surfacing it to the user.
#[derive(Clone, Debug, PartialEq)]
pub struct CompileTimeError {
    pub message: String,
}

/// The callable signature a compile-time-evaluable native module exposes.
/// `arguments` is a view over already-evaluated constant inputs, in
/// declaration order (in-arguments only); the return is one constant value
/// per out-argument, in declaration order, or an error.
pub type CompileTimeFn =
    fn(arguments: &[ConstantValue]) -> Result<Vec<ConstantValue>, CompileTimeError>;

#[derive(Clone, Copy, Debug)]
pub struct CompileTimeSignature {
    pub call: CompileTimeFn,
}

/// Read-only capability object exposing the set of registered native
/// modules. Immutable after registration finalization and safe to share
/// (`spec.md` §5); the compiler core never writes to it.
pub trait NativeModuleRegistry {
    fn lookup(&self, handle: NativeModuleHandle) -> &NativeModuleInfo;
    fn lookup_uid(&self, uid: NativeModuleUid) -> Option<NativeModuleHandle>;
    /// Find all native modules with the given source-level name (native
    /// modules participate in the same overload-by-argument-type rules as
    /// user modules, see `spec.md` §4.1.1).
    fn find_by_name(&self, name: &str) -> Vec<NativeModuleHandle>;
    /// All registered optimization rules whose source pattern's leading
    /// symbol is the given native module (`spec.md` §4.4.1).
    fn optimization_rules_for(
        &self,
        handle: NativeModuleHandle,
    ) -> &[crate::optimize::rule::OptimizationRule];
}
