use super::handle::NodeHandle;
use crate::registry::NativeModuleHandle;
use crate::types::QualifiedDataType;

/// The distinguished output index for the `remain_active` output, as
/// opposed to the dense `0..n` indices used for ordinary outputs
/// (`spec.md` §3.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OutputIndex {
    Ordinary(u32),
    RemainActive,
}

/// A scalar constant value. Strings are stored by offset into the owning
/// graph's [super::string_table::StringTable].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ConstantData {
    Real(f64),
    Bool(bool),
    StringOffset(u32),
}

/// The kind of a graph node, together with whatever data distinguishes it
/// from other nodes of the same kind. See the node-type table in
/// `spec.md` §3.3 for the input/output arity contract each kind must
/// satisfy.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Constant(ConstantData),
    Array,
    NativeModuleCall {
        native_module: NativeModuleHandle,
        upsample_factor: u32,
    },
    IndexedInput {
        index: u32,
    },
    IndexedOutput {
        index: u32,
    },
    Input {
        index: u32,
    },
    Output {
        index: OutputIndex,
    },
    TemporaryReference,
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Array => "array",
            Self::NativeModuleCall { .. } => "native_module_call",
            Self::IndexedInput { .. } => "indexed_input",
            Self::IndexedOutput { .. } => "indexed_output",
            Self::Input { .. } => "input",
            Self::Output { .. } => "output",
            Self::TemporaryReference => "temporary_reference",
        }
    }
}

/// A node plus its edges. `data_type` is `Some` for every node kind that
/// carries a value on its edges (constant, array, indexed-input,
/// indexed-output, input, output) and `None` for the two kinds that don't
/// (native-module-call, temporary-reference) -- see
/// `DESIGN.md`'s note on why full dependent-constant resolution is *not*
/// stored here but computed on demand by [crate::const_eval].
#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub kind: NodeKind,
    pub data_type: Option<QualifiedDataType>,
    pub(super) incoming: Vec<NodeHandle>,
    pub(super) outgoing: Vec<NodeHandle>,
}

impl GraphNode {
    pub(super) fn new(kind: NodeKind, data_type: Option<QualifiedDataType>) -> Self {
        Self {
            kind,
            data_type,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn incoming_edges(&self) -> &[NodeHandle] {
        &self.incoming
    }

    pub fn outgoing_edges(&self) -> &[NodeHandle] {
        &self.outgoing
    }
}
