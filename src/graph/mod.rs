//! The dataflow graph: a directed acyclic multigraph of [NodeKind]s, built by
//! `crate::builder` from a validated AST and consumed by `crate::optimize`
//! and `crate::serialize`. Grounded on
//! `examples/original_source/source/instrument/native_module_graph.h`'s
//! public API, adapted to the WaveLang node-type table in `spec.md` §3.3.

pub mod handle;
pub mod node;
pub mod string_table;

use crate::error::GraphError;
use crate::registry::NativeModuleHandle;
use crate::types::{assignable, DataMutability, QualifiedDataType};

pub use handle::NodeHandle;
pub use node::{ConstantData, GraphNode, NodeKind, OutputIndex};
pub use string_table::StringTable;

/// A node slot. `None` when the index has been freed and is sitting on the
/// free list awaiting reuse; the salt bumps on every free so handles minted
/// before the free can be told apart from ones minted after.
struct Slot {
    salt: u32,
    node: Option<GraphNode>,
}

/// One instance graph: the body of a single `voice_main`/`fx_main` (or a
/// module inlined into one). See `spec.md` §3.3.
#[derive(Default)]
pub struct NativeModuleGraph {
    nodes: Vec<Slot>,
    free_indices: Vec<u32>,
    string_table: StringTable,
    /// Propagation delay, in samples, that this graph's output lags its
    /// input by. Set by the builder from the native modules it inlines;
    /// `0` for a graph with no latency-introducing calls (`spec.md` §3.3).
    output_latency: i32,
}

impl Slot {
    fn new(node: GraphNode) -> Self {
        Self { salt: 0, node: Some(node) }
    }
}

impl NativeModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a string to the table, returning its offset. Used by
    /// [crate::serialize] to rebuild the table in its original order so the
    /// offsets baked into already-reconstructed `StringOffset` nodes line up.
    pub(crate) fn intern_raw(&mut self, value: &str) -> u32 {
        self.string_table.insert(value)
    }

    pub fn string_table(&self) -> &StringTable {
        &self.string_table
    }

    pub fn output_latency(&self) -> i32 {
        self.output_latency
    }

    pub fn set_output_latency(&mut self, latency: i32) {
        self.output_latency = latency;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_indices.len()
    }

    /// Allocate a node, reusing a freed slot (and its bumped salt) when one
    /// is available.
    fn insert(&mut self, node: GraphNode) -> NodeHandle {
        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.nodes[index as usize];
            slot.node = Some(node);
            NodeHandle::new(index, slot.salt)
        } else {
            let index = self.nodes.len() as u32;
            self.nodes.push(Slot::new(node));
            NodeHandle::new(index, 0)
        }
    }

    fn slot(&self, handle: NodeHandle) -> Result<&Slot, GraphError> {
        let slot = self
            .nodes
            .get(handle.index() as usize)
            .ok_or(GraphError::StaleHandle)?;
        if slot.salt != handle.salt || slot.node.is_none() {
            return Err(GraphError::StaleHandle);
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, handle: NodeHandle) -> Result<&mut Slot, GraphError> {
        let slot = self
            .nodes
            .get_mut(handle.index() as usize)
            .ok_or(GraphError::StaleHandle)?;
        if slot.salt != handle.salt || slot.node.is_none() {
            return Err(GraphError::StaleHandle);
        }
        Ok(slot)
    }

    pub fn get_node(&self, handle: NodeHandle) -> Result<&GraphNode, GraphError> {
        Ok(self.slot(handle)?.node.as_ref().expect("checked by slot()"))
    }

    fn get_node_mut(&mut self, handle: NodeHandle) -> Result<&mut GraphNode, GraphError> {
        Ok(self.slot_mut(handle)?.node.as_mut().expect("checked by slot()"))
    }

    /// Handles of every live node, in slot order. Not meaningful as a stable
    /// iteration order across `compact()` calls, only within one.
    pub fn node_handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|_| NodeHandle::new(index as u32, slot.salt))
        })
    }

    // -- node construction -------------------------------------------------

    pub fn add_constant_real(&mut self, value: f64, upsample_factor: u32) -> NodeHandle {
        use crate::types::{DataType, PrimitiveKind};
        let data_type = QualifiedDataType::constant(
            DataType::scalar(PrimitiveKind::Real).with_upsample_factor(upsample_factor),
        );
        self.insert(GraphNode::new(NodeKind::Constant(ConstantData::Real(value)), Some(data_type)))
    }

    pub fn add_constant_bool(&mut self, value: bool) -> NodeHandle {
        use crate::types::{DataType, PrimitiveKind};
        let data_type = QualifiedDataType::constant(DataType::scalar(PrimitiveKind::Bool));
        self.insert(GraphNode::new(NodeKind::Constant(ConstantData::Bool(value)), Some(data_type)))
    }

    pub fn add_constant_string(&mut self, value: &str) -> NodeHandle {
        use crate::types::{DataType, PrimitiveKind};
        let offset = self.string_table.insert(value);
        let data_type = QualifiedDataType::constant(DataType::scalar(PrimitiveKind::String));
        self.insert(GraphNode::new(
            NodeKind::Constant(ConstantData::StringOffset(offset)),
            Some(data_type),
        ))
    }

    /// An array node. Its mutability starts at `Constant` and is downgraded
    /// to `Variable` the first time a non-constant value is appended or
    /// written at an index (`spec.md` §3.3's array downgrade rule).
    pub fn add_array(&mut self, element_type: crate::types::DataType) -> NodeHandle {
        let data_type = QualifiedDataType::constant(crate::types::DataType {
            is_array: true,
            ..element_type
        });
        self.insert(GraphNode::new(NodeKind::Array, Some(data_type)))
    }

    /// Append `value` as the next element of `array`, downgrading the
    /// array's mutability to `Variable` if `value` is not constant.
    pub fn add_array_value(&mut self, array: NodeHandle, value: NodeHandle) -> Result<(), GraphError> {
        self.downgrade_array_if_needed(array, value)?;
        self.add_edge(value, array)
    }

    /// Overwrite the element edge at `index`, returning the handle of the
    /// element that was previously there (the builder is responsible for
    /// removing it if it is now unreferenced). Per `spec.md` §4.2, an
    /// index-assignment to an already-built array rebuilds the edge list
    /// rather than mutating the existing edge in place, since edges have no
    /// identity of their own.
    pub fn set_array_value_at_index(
        &mut self,
        array: NodeHandle,
        index: u32,
        value: NodeHandle,
    ) -> Result<NodeHandle, GraphError> {
        self.downgrade_array_if_needed(array, value)?;
        let old = {
            let node = self.get_node(array)?;
            *node
                .incoming_edges()
                .get(index as usize)
                .ok_or(GraphError::MissingInputIndex(index))?
        };
        self.remove_edge(old, array)?;
        self.add_edge_at(value, array, index as usize)?;
        Ok(old)
    }

    fn downgrade_array_if_needed(&mut self, array: NodeHandle, value: NodeHandle) -> Result<(), GraphError> {
        let value_is_constant = self.is_node_constant(value);
        let node = self.get_node_mut(array)?;
        if !matches!(node.kind, NodeKind::Array) {
            return Err(GraphError::IncompatibleEdgeType);
        }
        if !value_is_constant {
            if let Some(data_type) = node.data_type.as_mut() {
                data_type.mutability = DataMutability::Variable;
            }
        }
        Ok(())
    }

    /// A native-module-call node together with its indexed-input and
    /// indexed-output children, wired with internal edges as
    /// `native_module_graph.h` describes: one `IndexedInput` per in-argument
    /// feeding the call, one `IndexedOutput` per out-argument fed by the
    /// call. The builder still has to wire each indexed-input's *producer*
    /// and each indexed-output's *consumer(s)* with [Self::add_edge].
    pub fn add_native_module_call(
        &mut self,
        native_module: NativeModuleHandle,
        upsample_factor: u32,
        in_arg_types: &[QualifiedDataType],
        out_arg_types: &[QualifiedDataType],
    ) -> NodeHandle {
        let call = self.insert(GraphNode::new(
            NodeKind::NativeModuleCall {
                native_module,
                upsample_factor,
            },
            None,
        ));
        for (index, qdt) in in_arg_types.iter().enumerate() {
            let input = self.insert(GraphNode::new(
                NodeKind::IndexedInput { index: index as u32 },
                Some(*qdt),
            ));
            self.add_edge(input, call).expect("fresh nodes cannot cycle");
        }
        for (index, qdt) in out_arg_types.iter().enumerate() {
            let output = self.insert(GraphNode::new(
                NodeKind::IndexedOutput { index: index as u32 },
                Some(*qdt),
            ));
            self.add_edge(call, output).expect("fresh nodes cannot cycle");
        }
        call
    }

    pub fn add_input_node(&mut self, index: u32, data_type: QualifiedDataType) -> NodeHandle {
        self.insert(GraphNode::new(NodeKind::Input { index }, Some(data_type)))
    }

    pub fn add_output_node(&mut self, index: OutputIndex, data_type: QualifiedDataType) -> NodeHandle {
        self.insert(GraphNode::new(NodeKind::Output { index }, Some(data_type)))
    }

    pub fn add_temporary_reference_node(&mut self) -> NodeHandle {
        self.insert(GraphNode::new(NodeKind::TemporaryReference, None))
    }

    /// Insert a node with an already-fully-formed kind/type, bypassing the
    /// `add_*` conveniences' own child-node creation (e.g.
    /// [Self::add_native_module_call] auto-creating its indexed in/out
    /// children). [crate::serialize] needs this because a serialized graph
    /// already enumerates every node, including those children, individually.
    pub(crate) fn insert_raw(&mut self, kind: NodeKind, data_type: Option<QualifiedDataType>) -> NodeHandle {
        self.insert(GraphNode::new(kind, data_type))
    }

    /// Remove a node. Fails if it still has any edges; callers must
    /// [Self::remove_edge] everything touching it first, so removal order
    /// (and thus what ends up unreferenced) is always explicit rather than
    /// an implicit side effect of this call.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Result<(), GraphError> {
        {
            let node = self.get_node(handle)?;
            if !node.incoming_edges().is_empty() || !node.outgoing_edges().is_empty() {
                return Err(GraphError::IncompatibleEdgeType);
            }
        }
        let slot = self.slot_mut(handle)?;
        slot.node = None;
        slot.salt = slot.salt.wrapping_add(1);
        self.free_indices.push(handle.index());
        Ok(())
    }

    // -- edges ---------------------------------------------------------

    pub fn add_edge(&mut self, from: NodeHandle, to: NodeHandle) -> Result<(), GraphError> {
        self.add_edge_at(from, to, usize::MAX)
    }

    fn add_edge_at(&mut self, from: NodeHandle, to: NodeHandle, at: usize) -> Result<(), GraphError> {
        {
            let to_node = self.get_node(to)?;
            if to_node.incoming_edges().contains(&from) {
                return Err(GraphError::DuplicateEdge);
            }
        }
        self.check_edge_type(from, to)?;
        if self.has_path(to, from) {
            return Err(GraphError::WouldCycle);
        }
        {
            let from_node = self.get_node_mut(from)?;
            from_node.outgoing.push(to);
        }
        let to_node = self.get_node_mut(to)?;
        if at >= to_node.incoming.len() {
            to_node.incoming.push(from);
        } else {
            to_node.incoming.insert(at, from);
        }
        Ok(())
    }

    pub fn remove_edge(&mut self, from: NodeHandle, to: NodeHandle) -> Result<(), GraphError> {
        {
            let from_node = self.get_node_mut(from)?;
            let pos = from_node
                .outgoing
                .iter()
                .position(|h| *h == to)
                .ok_or(GraphError::IncompatibleEdgeType)?;
            from_node.outgoing.remove(pos);
        }
        let to_node = self.get_node_mut(to)?;
        let pos = to_node
            .incoming
            .iter()
            .position(|h| *h == from)
            .ok_or(GraphError::IncompatibleEdgeType)?;
        to_node.incoming.remove(pos);
        Ok(())
    }

    fn check_edge_type(&self, from: NodeHandle, to: NodeHandle) -> Result<(), GraphError> {
        let from_node = self.get_node(from)?;
        let to_node = self.get_node(to)?;
        match (&from_node.data_type, &to_node.data_type) {
            (Some(from_qdt), Some(to_qdt)) => {
                if assignable(from_qdt, to_qdt) {
                    Ok(())
                } else {
                    Err(GraphError::IncompatibleEdgeType)
                }
            }
            // native-module-call and temporary-reference nodes carry no
            // type of their own; edges touching them are typed at the
            // indexed-input/output level instead.
            _ => Ok(()),
        }
    }

    /// Depth-first search: is there a path from `from` to `to` along
    /// existing outgoing edges? Used to reject an edge that would close a
    /// cycle before it is ever added (`spec.md` §3.3 acyclicity invariant).
    fn has_path(&self, from: NodeHandle, to: NodeHandle) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut visited = std::collections::HashSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if current == to {
                return true;
            }
            if let Ok(node) = self.get_node(current) {
                stack.extend(node.outgoing_edges().iter().copied());
            }
        }
        false
    }

    /// Cheap structural check: is this node's *declared* type already known
    /// to be constant? `true` for constant nodes and for array nodes whose
    /// mutability has not been downgraded; `false` for everything else,
    /// including native-module-call outputs whose dependent-constant
    /// resolution requires walking their inputs -- that recursive,
    /// registry-aware check lives in `crate::const_eval`, not here, so this
    /// stays O(1) for callers (the optimizer's rewrite-applicability checks)
    /// that only need a fast conservative answer.
    pub fn is_node_constant(&self, handle: NodeHandle) -> bool {
        match self.get_node(handle) {
            Ok(node) => node
                .data_type
                .map(|qdt| qdt.mutability == DataMutability::Constant)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove freed slots and reassign dense indices, then sweep the string
    /// table down to only the offsets still referenced by live constant
    /// nodes. Returns the old-to-new handle remap so callers (the optimizer,
    /// serialization) can translate any handles they are holding onto.
    pub fn compact(&mut self) -> std::collections::HashMap<NodeHandle, NodeHandle> {
        let mut remap = std::collections::HashMap::new();
        let mut new_nodes = Vec::new();
        for (old_index, slot) in self.nodes.iter().enumerate() {
            if let Some(node) = &slot.node {
                let old_handle = NodeHandle::new(old_index as u32, slot.salt);
                let new_handle = NodeHandle::new(new_nodes.len() as u32, 0);
                remap.insert(old_handle, new_handle);
                new_nodes.push(node.clone());
            }
        }
        for node in &mut new_nodes {
            for h in node.incoming.iter_mut() {
                *h = remap[h];
            }
            for h in node.outgoing.iter_mut() {
                *h = remap[h];
            }
        }
        self.nodes = new_nodes.into_iter().map(Slot::new).collect();
        self.free_indices.clear();

        let used_offsets: Vec<u32> = self
            .nodes
            .iter()
            .filter_map(|slot| slot.node.as_ref())
            .filter_map(|node| match &node.kind {
                NodeKind::Constant(ConstantData::StringOffset(offset)) => Some(*offset),
                _ => None,
            })
            .collect();
        self.string_table.retain_offsets(used_offsets);

        remap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, PrimitiveKind};

    #[test]
    fn constant_to_variable_edge_allowed() {
        let mut graph = NativeModuleGraph::new();
        let c = graph.add_constant_real(1.0, 1);
        let out = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        assert!(graph.add_edge(c, out).is_ok());
    }

    #[test]
    fn mismatched_type_edge_rejected() {
        let mut graph = NativeModuleGraph::new();
        let c = graph.add_constant_bool(true);
        let out = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        assert!(matches!(
            graph.add_edge(c, out),
            Err(GraphError::IncompatibleEdgeType)
        ));
    }

    #[test]
    fn self_edge_rejected_as_cycle() {
        let mut graph = NativeModuleGraph::new();
        let a = graph.add_input_node(0, QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)));
        let b = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_edge(a, b).unwrap();
        assert!(matches!(graph.add_edge(b, a), Err(GraphError::WouldCycle)));
    }

    #[test]
    fn duplicate_edge_rejected() {
        let mut graph = NativeModuleGraph::new();
        let a = graph.add_constant_real(1.0, 1);
        let b = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_edge(a, b).unwrap();
        assert!(matches!(graph.add_edge(a, b), Err(GraphError::DuplicateEdge)));
    }

    #[test]
    fn stale_handle_after_compact() {
        let mut graph = NativeModuleGraph::new();
        let a = graph.add_constant_real(1.0, 1);
        let b = graph.add_constant_real(2.0, 1);
        graph.remove_node(a).unwrap();
        let remap = graph.compact();
        assert!(remap.contains_key(&b));
        assert!(graph.get_node(a).is_err());
    }

    #[test]
    fn array_downgrades_to_variable_on_non_constant_append() {
        let mut graph = NativeModuleGraph::new();
        let array = graph.add_array(DataType::scalar(PrimitiveKind::Real));
        let variable_input = graph.add_input_node(
            0,
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_array_value(array, variable_input).unwrap();
        assert!(!graph.is_node_constant(array));
    }

    #[test]
    fn remove_node_with_edges_rejected() {
        let mut graph = NativeModuleGraph::new();
        let a = graph.add_constant_real(1.0, 1);
        let b = graph.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        graph.add_edge(a, b).unwrap();
        assert!(graph.remove_node(a).is_err());
    }
}
