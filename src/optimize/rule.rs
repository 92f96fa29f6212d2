//! Optimization rule patterns: a flattened pre-order encoding of a small
//! expression tree rooted at a native module call, used to match (`source`)
//! and rebuild (`target`) a subgraph. Grounded on
//! `examples/original_source/source/instrument/native_module_registry.cpp`'s
//! `validate_optimization_rule` and
//! `examples/original_source/source/compiler/optimization_rule_applicator.h`.
//! `spec.md` §4.4.1.

use crate::registry::{NativeModuleRegistry, NativeModuleUid};

/// One symbol in a pattern. A `NativeModule` symbol opens a call frame whose
/// arguments are the symbols up to its matching `NativeModuleEnd`; the three
/// placeholder kinds and `BackReference` are source-only (a target may only
/// reference an already-bound placeholder by [OptimizationSymbol::BackReference]).
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizationSymbol {
    NativeModule(NativeModuleUid),
    NativeModuleEnd,
    /// Matches any non-constant value (source only).
    Variable,
    /// Matches any constant value (source only).
    Constant,
    /// Matches any value regardless of mutability (source only).
    VariableOrConstant,
    /// References the `n`th placeholder bound earlier in the source pattern.
    BackReference(u32),
    RealValue(f64),
    BoolValue(bool),
}

/// A single rewrite: whenever the live graph structurally matches `source`
/// rooted at some native-module-call node, that subgraph may be replaced with
/// `target`. Both patterns are flattened pre-order traversals of a call tree,
/// the same shape the applicator's matcher and builder walk in lockstep.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationRule {
    pub name: String,
    pub source: Vec<OptimizationSymbol>,
    pub target: Vec<OptimizationSymbol>,
}

#[derive(Debug, PartialEq)]
pub struct RuleValidationError(pub String);

struct CallFrame {
    remaining_in_args: usize,
}

/// Validate a rule's structure at registration time: the source must begin
/// with a native module and every call must be closed and fully applied, and
/// every back-reference (in either pattern) must resolve to a placeholder
/// bound earlier in the source. Does not (unlike the original) re-derive full
/// data-type assignability across the rewrite -- that is re-checked
/// structurally when a rewrite is actually applied, by
/// [crate::graph::NativeModuleGraph::add_edge]'s own type check, and a rule
/// whose target type doesn't fit simply never successfully applies.
pub fn validate_rule(
    rule: &OptimizationRule,
    registry: &dyn NativeModuleRegistry,
) -> Result<(), RuleValidationError> {
    if !matches!(rule.source.first(), Some(OptimizationSymbol::NativeModule(_))) {
        return Err(RuleValidationError(format!(
            "optimization rule '{}' source does not begin with a native module",
            rule.name
        )));
    }
    let placeholder_count = walk_pattern(rule, &rule.source, registry, true, 0)?;
    walk_pattern(rule, &rule.target, registry, false, placeholder_count)?;
    Ok(())
}

/// Walk one pattern, checking call-frame arity and back-reference validity.
/// Returns the number of placeholders bound (nonzero only for the source).
/// `available_placeholders` bounds what a back-reference may point at: the
/// pattern's own running placeholder count while walking the source, or the
/// source's total placeholder count while walking the target.
fn walk_pattern(
    rule: &OptimizationRule,
    symbols: &[OptimizationSymbol],
    registry: &dyn NativeModuleRegistry,
    is_source: bool,
    available_placeholders: u32,
) -> Result<u32, RuleValidationError> {
    let pattern_name = if is_source { "source" } else { "target" };
    let mut frames: Vec<CallFrame> = Vec::new();
    let mut bound = 0u32;
    let mut produced_root = false;

    for symbol in symbols {
        if produced_root && frames.is_empty() {
            return Err(RuleValidationError(format!(
                "optimization rule '{}' {} contains extra symbols after its root value",
                rule.name, pattern_name
            )));
        }
        match symbol {
            OptimizationSymbol::NativeModule(uid) => {
                let handle = registry.lookup_uid(*uid).ok_or_else(|| {
                    RuleValidationError(format!("optimization rule '{}' references an unknown native module", rule.name))
                })?;
                let info = registry.lookup(handle);
                if info.return_type.is_void() || info.out_arg_count() > 0 {
                    return Err(RuleValidationError(format!(
                        "optimization rule '{}' references native module '{}' which is not a pure single-value function",
                        rule.name, info.name
                    )));
                }
                frames.push(CallFrame { remaining_in_args: info.in_arg_count() });
            }
            OptimizationSymbol::NativeModuleEnd => {
                let frame = frames.pop().ok_or_else(|| {
                    RuleValidationError(format!("optimization rule '{}' has a mismatched native-module-end symbol", rule.name))
                })?;
                if frame.remaining_in_args != 0 {
                    return Err(RuleValidationError(format!(
                        "optimization rule '{}' ends a native module call before all arguments were used",
                        rule.name
                    )));
                }
                if frames.is_empty() {
                    produced_root = true;
                }
            }
            OptimizationSymbol::Variable | OptimizationSymbol::Constant | OptimizationSymbol::VariableOrConstant => {
                if !is_source {
                    return Err(RuleValidationError(format!(
                        "optimization rule '{}' target contains a placeholder match, which is source-only",
                        rule.name
                    )));
                }
                consume_argument(rule, &mut frames)?;
                bound += 1;
                if frames.is_empty() {
                    produced_root = true;
                }
            }
            OptimizationSymbol::BackReference(index) => {
                let limit = if is_source { bound } else { available_placeholders };
                if *index >= limit {
                    return Err(RuleValidationError(format!(
                        "optimization rule '{}' back-reference {} is out of range",
                        rule.name, index
                    )));
                }
                consume_argument(rule, &mut frames)?;
                if frames.is_empty() {
                    produced_root = true;
                }
            }
            OptimizationSymbol::RealValue(_) | OptimizationSymbol::BoolValue(_) => {
                consume_argument(rule, &mut frames)?;
                if frames.is_empty() {
                    produced_root = true;
                }
            }
        }
    }

    if !frames.is_empty() {
        return Err(RuleValidationError(format!(
            "optimization rule '{}' {} ends without closing every native module call",
            rule.name, pattern_name
        )));
    }
    if !produced_root {
        return Err(RuleValidationError(format!("optimization rule '{}' {} is empty", rule.name, pattern_name)));
    }
    Ok(bound)
}

fn consume_argument(rule: &OptimizationRule, frames: &mut [CallFrame]) -> Result<(), RuleValidationError> {
    match frames.last_mut() {
        Some(frame) if frame.remaining_in_args > 0 => {
            frame.remaining_in_args -= 1;
            Ok(())
        }
        Some(_) => Err(RuleValidationError(format!(
            "optimization rule '{}' references a native module with too many arguments",
            rule.name
        ))),
        None => Ok(()), // a single top-level symbol (only legal for the pattern's root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{
        CompileTimeSignature, DataAccess, NativeModuleArgument, NativeModuleHandle, NativeModuleInfo,
    };
    use crate::types::{DataType, PrimitiveKind, Qualifier};
    use std::collections::HashMap;

    struct FakeRegistry {
        modules: HashMap<u32, NativeModuleInfo>,
        by_uid: HashMap<u64, NativeModuleHandle>,
    }

    impl FakeRegistry {
        fn new() -> Self {
            let mut modules = HashMap::new();
            let mut by_uid = HashMap::new();
            let add_info = NativeModuleInfo {
                uid: crate::registry::NativeModuleUid(1),
                name: "add".to_string(),
                arguments: vec![
                    NativeModuleArgument {
                        name: "a".to_string(),
                        qualifier: Qualifier::In,
                        data_type: DataType::scalar(PrimitiveKind::Real),
                        data_access: DataAccess::Value,
                        is_dependent_constant_input: true,
                    },
                    NativeModuleArgument {
                        name: "b".to_string(),
                        qualifier: Qualifier::In,
                        data_type: DataType::scalar(PrimitiveKind::Real),
                        data_access: DataAccess::Value,
                        is_dependent_constant_input: true,
                    },
                ],
                return_type: DataType::scalar(PrimitiveKind::Real),
                compile_time: Some(CompileTimeSignature {
                    call: |args| match args {
                        [crate::registry::ConstantValue::Real(a), crate::registry::ConstantValue::Real(b)] => {
                            Ok(vec![crate::registry::ConstantValue::Real(a + b)])
                        }
                        _ => Err(crate::registry::CompileTimeError { message: "bad args".to_string() }),
                    },
                }),
                has_get_latency: false,
                operator_identity: Some("+"),
                always_runs_at_compile_time: false,
                runs_at_compile_time_when_dependent_constants_are_constant: true,
            };
            modules.insert(0, add_info);
            by_uid.insert(1, NativeModuleHandle(0));
            Self { modules, by_uid }
        }
    }

    impl NativeModuleRegistry for FakeRegistry {
        fn lookup(&self, handle: NativeModuleHandle) -> &NativeModuleInfo {
            &self.modules[&handle.0]
        }
        fn lookup_uid(&self, uid: crate::registry::NativeModuleUid) -> Option<NativeModuleHandle> {
            self.by_uid.get(&uid.0).copied()
        }
        fn find_by_name(&self, _name: &str) -> Vec<NativeModuleHandle> {
            Vec::new()
        }
        fn optimization_rules_for(&self, _handle: NativeModuleHandle) -> &[OptimizationRule] {
            &[]
        }
    }

    #[test]
    fn add_zero_identity_rule_is_valid() {
        let registry = FakeRegistry::new();
        let rule = OptimizationRule {
            name: "add_zero".to_string(),
            source: vec![
                OptimizationSymbol::NativeModule(crate::registry::NativeModuleUid(1)),
                OptimizationSymbol::Variable,
                OptimizationSymbol::RealValue(0.0),
                OptimizationSymbol::NativeModuleEnd,
            ],
            target: vec![OptimizationSymbol::BackReference(0)],
        };
        assert!(validate_rule(&rule, &registry).is_ok());
    }

    #[test]
    fn mismatched_native_module_end_rejected() {
        let registry = FakeRegistry::new();
        let rule = OptimizationRule {
            name: "broken".to_string(),
            source: vec![OptimizationSymbol::NativeModuleEnd],
            target: vec![OptimizationSymbol::RealValue(0.0)],
        };
        assert!(validate_rule(&rule, &registry).is_err());
    }

    #[test]
    fn target_placeholder_rejected() {
        let registry = FakeRegistry::new();
        let rule = OptimizationRule {
            name: "bad_target".to_string(),
            source: vec![
                OptimizationSymbol::NativeModule(crate::registry::NativeModuleUid(1)),
                OptimizationSymbol::Variable,
                OptimizationSymbol::Variable,
                OptimizationSymbol::NativeModuleEnd,
            ],
            target: vec![OptimizationSymbol::Variable],
        };
        assert!(validate_rule(&rule, &registry).is_err());
    }

    #[test]
    fn out_of_range_back_reference_rejected() {
        let registry = FakeRegistry::new();
        let rule = OptimizationRule {
            name: "bad_backref".to_string(),
            source: vec![
                OptimizationSymbol::NativeModule(crate::registry::NativeModuleUid(1)),
                OptimizationSymbol::Variable,
                OptimizationSymbol::RealValue(0.0),
                OptimizationSymbol::NativeModuleEnd,
            ],
            target: vec![OptimizationSymbol::BackReference(1)],
        };
        assert!(validate_rule(&rule, &registry).is_err());
    }
}
