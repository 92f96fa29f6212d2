//! The WaveLang type system: primitive kinds, data types, mutability, and
//! the assignability rule that both the validator and the graph builder use
//! to decide whether a value may flow into a slot. See `spec.md` §3.1.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of thing a value is, independent of array-ness or mutability.
/// Only `Real`, `Bool`, and `String` carry runtime data; `Void` and `Module`
/// exist only to type return values and identifiers respectively.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Void,
    Module,
    Real,
    Bool,
    String,
}

impl PrimitiveKind {
    /// `true` for the three primitive kinds that can actually appear on a
    /// graph edge or be stored in a named value.
    pub fn is_data_bearing(self) -> bool {
        matches!(self, Self::Real | Self::Bool | Self::String)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Void => "void",
            Self::Module => "module",
            Self::Real => "real",
            Self::Bool => "bool",
            Self::String => "string",
        };
        write!(f, "{}", s)
    }
}

/// A primitive kind plus array-ness and an upsample factor. Does not include
/// mutability; see [QualifiedDataType] for that.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub primitive_kind: PrimitiveKind,
    pub is_array: bool,
    /// Integer sample-rate multiplier relative to the base rate. Always
    /// `>= 1`; `1` is polymorphic for edge-compatibility purposes (see
    /// [upsample_factors_compatible]).
    pub upsample_factor: u32,
}

impl DataType {
    pub fn void() -> Self {
        Self {
            primitive_kind: PrimitiveKind::Void,
            is_array: false,
            upsample_factor: 1,
        }
    }

    pub fn scalar(primitive_kind: PrimitiveKind) -> Self {
        Self {
            primitive_kind,
            is_array: false,
            upsample_factor: 1,
        }
    }

    pub fn array_of(primitive_kind: PrimitiveKind) -> Self {
        Self {
            primitive_kind,
            is_array: true,
            upsample_factor: 1,
        }
    }

    pub fn with_upsample_factor(self, upsample_factor: u32) -> Self {
        Self {
            upsample_factor,
            ..self
        }
    }

    pub fn is_void(&self) -> bool {
        self.primitive_kind == PrimitiveKind::Void
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array {
            write!(f, "{}[]", self.primitive_kind)?;
        } else {
            write!(f, "{}", self.primitive_kind)?;
        }
        if self.upsample_factor != 1 {
            write!(f, "@{}x", self.upsample_factor)?;
        }
        Ok(())
    }
}

/// Two data types are edge-compatible when their primitive kind and
/// array-ness match and their upsample factors are compatible. This is
/// strictly weaker than [assignable]; it does not consider mutability.
pub fn upsample_factors_compatible(a: u32, b: u32) -> bool {
    a == 1 || b == 1 || a == b
}

pub fn data_types_compatible(a: &DataType, b: &DataType) -> bool {
    a.primitive_kind == b.primitive_kind
        && a.is_array == b.is_array
        && upsample_factors_compatible(a.upsample_factor, b.upsample_factor)
}

/// Whether a named value (or argument) is read-only, write-only, or neither
/// qualified direction is in play. This is orthogonal to [DataMutability]:
/// `qualifier` describes how a *declaration* may be used (as an in-argument,
/// out-argument, or ordinary local), while mutability describes whether a
/// *value* is known at compile time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Qualifier {
    None,
    In,
    Out,
}

/// Whether a value is fixed at compile time. `DependentConstant` is a
/// declaration-time annotation meaning "constant iff every dependent-constant
/// input to this value's computation is constant"; it must be *resolved* to
/// `Constant` or `Variable` before two [QualifiedDataType]s are compared with
/// [assignable] (resolution happens per call site in the validator/builder,
/// see `spec.md` §3.1 and the native-module-call handling in the builder).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataMutability {
    Constant,
    DependentConstant,
    Variable,
}

impl DataMutability {
    /// Resolve a dependent-constant mutability against whether all of its
    /// dependent-constant inputs were themselves constant.
    pub fn resolve_dependent(self, all_dependents_constant: bool) -> Self {
        match self {
            Self::DependentConstant => {
                if all_dependents_constant {
                    Self::Constant
                } else {
                    Self::Variable
                }
            }
            other => other,
        }
    }
}

/// A [DataType] plus a [DataMutability]. This is the type of an actual value
/// flowing through the program (as opposed to [DataType], which is the type
/// of a declaration slot before mutability is known).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedDataType {
    pub data_type: DataType,
    pub mutability: DataMutability,
}

impl QualifiedDataType {
    pub fn new(data_type: DataType, mutability: DataMutability) -> Self {
        Self {
            data_type,
            mutability,
        }
    }

    pub fn constant(data_type: DataType) -> Self {
        Self::new(data_type, DataMutability::Constant)
    }

    pub fn variable(data_type: DataType) -> Self {
        Self::new(data_type, DataMutability::Variable)
    }
}

/// Assignability: can a value of type `from` flow into a slot of type `to`?
/// Per `spec.md` §3.1: primitive kind and array-ness must match, upsample
/// factors must be compatible (1 is polymorphic). For mutability: a `to` of
/// `Variable` or `DependentConstant` accepts anything (a dependent-constant
/// slot is polymorphic over its own actual argument -- the tag only affects
/// how the *output*'s mutability resolves, not what may be passed in); a `to`
/// of `Constant` requires `from` to be exactly `Constant` (constant ->
/// variable is allowed, variable -> constant is not). `from` is assumed
/// already resolved -- a still-unresolved `DependentConstant` on `from`
/// should not reach this function (see [DataMutability::resolve_dependent]).
pub fn assignable(from: &QualifiedDataType, to: &QualifiedDataType) -> bool {
    if !data_types_compatible(&from.data_type, &to.data_type) {
        return false;
    }
    match to.mutability {
        DataMutability::Variable | DataMutability::DependentConstant => true,
        DataMutability::Constant => from.mutability == DataMutability::Constant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real() -> DataType {
        DataType::scalar(PrimitiveKind::Real)
    }

    #[test]
    fn constant_assignable_to_variable() {
        let from = QualifiedDataType::constant(real());
        let to = QualifiedDataType::variable(real());
        assert!(assignable(&from, &to));
    }

    #[test]
    fn variable_not_assignable_to_constant() {
        let from = QualifiedDataType::variable(real());
        let to = QualifiedDataType::constant(real());
        assert!(!assignable(&from, &to));
    }

    #[test]
    fn mismatched_primitive_kind_not_assignable() {
        let from = QualifiedDataType::constant(DataType::scalar(PrimitiveKind::Bool));
        let to = QualifiedDataType::constant(real());
        assert!(!assignable(&from, &to));
    }

    #[test]
    fn mismatched_array_ness_not_assignable() {
        let from = QualifiedDataType::constant(real());
        let to = QualifiedDataType::constant(DataType::array_of(PrimitiveKind::Real));
        assert!(!assignable(&from, &to));
    }

    #[test]
    fn upsample_factor_one_is_polymorphic() {
        let from = QualifiedDataType::constant(real().with_upsample_factor(1));
        let to = QualifiedDataType::constant(real().with_upsample_factor(4));
        assert!(assignable(&from, &to));
    }

    #[test]
    fn mismatched_upsample_factor_not_assignable() {
        let from = QualifiedDataType::constant(real().with_upsample_factor(2));
        let to = QualifiedDataType::constant(real().with_upsample_factor(4));
        assert!(!assignable(&from, &to));
    }

    #[test]
    fn resolve_dependent_constant() {
        assert_eq!(
            DataMutability::DependentConstant.resolve_dependent(true),
            DataMutability::Constant
        );
        assert_eq!(
            DataMutability::DependentConstant.resolve_dependent(false),
            DataMutability::Variable
        );
    }
}
