//! Binary serialization of an [Instrument] to and from the wire format
//! described by `spec.md` §4.5: a magic/version header, a variant count,
//! then per-variant globals and 0-2 graphs, each graph written as its node
//! records, edge records, and string table.
//!
//! No crate in the wider dependency stack offers a binary encoding (the
//! `serde`/`validator` pair covers structured config and validation, not a
//! packed wire format), so this hand-rolls little-endian `std::io` framing
//! the way `examples/original_source` itself does for its native binary
//! instrument format -- see `DESIGN.md`.

use std::convert::TryInto;

use crate::error::InstrumentError;
use crate::graph::{ConstantData, NativeModuleGraph, NodeHandle, NodeKind, OutputIndex};
use crate::instrument::{Instrument, InstrumentGlobals, InstrumentVariant};
use crate::registry::{NativeModuleRegistry, NativeModuleUid};
use crate::types::{DataMutability, DataType, PrimitiveKind, QualifiedDataType};
use std::collections::HashMap;

use crate::consts::{INSTRUMENT_MAGIC, INSTRUMENT_VERSION};

/// Serialize a (not necessarily validated) instrument. Callers that need the
/// round-trip invariant (`spec.md` §8) to hold should validate before and
/// after.
pub fn save(instrument: &Instrument, registry: &dyn NativeModuleRegistry) -> Result<Vec<u8>, InstrumentError> {
    let mut w = ByteWriter::new();
    w.write_bytes(INSTRUMENT_MAGIC);
    w.write_u32(INSTRUMENT_VERSION);
    w.write_u32(instrument.variants.len() as u32);
    for variant in &instrument.variants {
        write_globals(&mut w, &variant.globals);
        write_optional_graph(&mut w, variant.voice_graph.as_ref(), registry)?;
        write_optional_graph(&mut w, variant.fx_graph.as_ref(), registry)?;
    }
    Ok(w.into_bytes())
}

/// Deserialize and validate an instrument. Native-module UIDs are resolved
/// against `registry`; an unresolvable UID fails the whole load rather than
/// producing a graph with a dangling call, per `spec.md` §4.5.
pub fn load(bytes: &[u8], registry: &dyn NativeModuleRegistry) -> Result<Instrument, InstrumentError> {
    let mut r = ByteReader::new(bytes);
    let magic = r.read_bytes(INSTRUMENT_MAGIC.len())?;
    if magic != INSTRUMENT_MAGIC {
        return Err(InstrumentError::Malformed("bad magic".to_string()));
    }
    let version = r.read_u32()?;
    if version != INSTRUMENT_VERSION {
        return Err(InstrumentError::Malformed(format!("unsupported version {}", version)));
    }
    let variant_count = r.read_u32()?;
    let mut variants = Vec::with_capacity(variant_count as usize);
    for _ in 0..variant_count {
        let globals = read_globals(&mut r)?;
        let voice_graph = read_optional_graph(&mut r, registry)?;
        let fx_graph = read_optional_graph(&mut r, registry)?;
        variants.push(InstrumentVariant { globals, voice_graph, fx_graph });
    }
    let instrument = Instrument { variants };
    instrument.validate()?;
    Ok(instrument)
}

fn write_globals(w: &mut ByteWriter, globals: &InstrumentGlobals) {
    w.write_u32(globals.max_voices);
    w.write_u32(globals.sample_rate);
    w.write_u32(globals.chunk_size);
    w.write_bool(globals.activate_fx_immediately);
}

fn read_globals(r: &mut ByteReader) -> Result<InstrumentGlobals, InstrumentError> {
    Ok(InstrumentGlobals {
        max_voices: r.read_u32()?,
        sample_rate: r.read_u32()?,
        chunk_size: r.read_u32()?,
        activate_fx_immediately: r.read_bool()?,
    })
}

fn write_optional_graph(
    w: &mut ByteWriter,
    graph: Option<&NativeModuleGraph>,
    registry: &dyn NativeModuleRegistry,
) -> Result<(), InstrumentError> {
    match graph {
        Some(graph) => {
            w.write_bool(true);
            write_graph(w, graph, registry)
        }
        None => {
            w.write_bool(false);
            Ok(())
        }
    }
}

fn read_optional_graph(
    r: &mut ByteReader,
    registry: &dyn NativeModuleRegistry,
) -> Result<Option<NativeModuleGraph>, InstrumentError> {
    if r.read_bool()? {
        Ok(Some(read_graph(r, registry)?))
    } else {
        Ok(None)
    }
}

fn write_graph(
    w: &mut ByteWriter,
    graph: &NativeModuleGraph,
    registry: &dyn NativeModuleRegistry,
) -> Result<(), InstrumentError> {
    let handles: Vec<NodeHandle> = graph.node_handles().collect();
    let dense_index: HashMap<NodeHandle, u32> =
        handles.iter().enumerate().map(|(i, h)| (*h, i as u32)).collect();

    w.write_i32(graph.output_latency());
    w.write_u32(handles.len() as u32);
    for &handle in &handles {
        let node = graph.get_node(handle)?;
        write_node_kind(w, &node.kind, registry)?;
        if let Some(data_type) = node.data_type {
            write_qualified_data_type(w, &data_type);
        }
    }

    // Per-edge records are just `(from_index, to_index)` pairs written in
    // each node's own incoming-edge order, which is all that is needed to
    // round-trip: edge "slots" aren't a field of this graph model, they're
    // implied by vec position and by kind-specific index fields like
    // `IndexedInput { index }`. Recorded as a deliberate simplification in
    // `DESIGN.md` rather than inventing an unused slot field.
    let mut edges = Vec::new();
    for &to in &handles {
        let node = graph.get_node(to)?;
        for &from in node.incoming_edges() {
            edges.push((dense_index[&from], dense_index[&to]));
        }
    }
    w.write_u32(edges.len() as u32);
    for (from, to) in edges {
        w.write_u32(from);
        w.write_u32(to);
    }

    w.write_u32(graph.string_table().len() as u32);
    for s in graph.string_table().iter() {
        w.write_string(s);
    }
    Ok(())
}

fn read_graph(r: &mut ByteReader, registry: &dyn NativeModuleRegistry) -> Result<NativeModuleGraph, InstrumentError> {
    let mut graph = NativeModuleGraph::new();
    graph.set_output_latency(r.read_i32()?);

    let node_count = r.read_u32()?;
    let mut handles = Vec::with_capacity(node_count as usize);
    for _ in 0..node_count {
        let kind = read_node_kind(r, registry)?;
        let data_type = if node_kind_carries_data_type(&kind) { Some(read_qualified_data_type(r)?) } else { None };
        handles.push(graph.insert_raw(kind, data_type));
    }

    let edge_count = r.read_u32()?;
    for _ in 0..edge_count {
        let from = r.read_u32()?;
        let to = r.read_u32()?;
        let from_handle = *handles.get(from as usize).ok_or_else(|| InstrumentError::Malformed("edge index out of range".to_string()))?;
        let to_handle = *handles.get(to as usize).ok_or_else(|| InstrumentError::Malformed("edge index out of range".to_string()))?;
        graph.add_edge(from_handle, to_handle)?;
    }

    let string_count = r.read_u32()?;
    for _ in 0..string_count {
        graph.intern_raw(&r.read_string()?);
    }

    Ok(graph)
}

fn node_kind_carries_data_type(kind: &NodeKind) -> bool {
    !matches!(kind, NodeKind::NativeModuleCall { .. } | NodeKind::TemporaryReference)
}

fn write_node_kind(w: &mut ByteWriter, kind: &NodeKind, registry: &dyn NativeModuleRegistry) -> Result<(), InstrumentError> {
    match kind {
        NodeKind::Constant(ConstantData::Real(v)) => {
            w.write_u8(0);
            w.write_f64(*v);
        }
        NodeKind::Constant(ConstantData::Bool(v)) => {
            w.write_u8(1);
            w.write_bool(*v);
        }
        NodeKind::Constant(ConstantData::StringOffset(offset)) => {
            w.write_u8(2);
            w.write_u32(*offset);
        }
        NodeKind::Array => {
            w.write_u8(3);
        }
        NodeKind::NativeModuleCall { native_module, upsample_factor } => {
            w.write_u8(4);
            let uid = registry.lookup(*native_module).uid;
            w.write_u64(uid.0);
            w.write_u32(*upsample_factor);
        }
        NodeKind::IndexedInput { index } => {
            w.write_u8(5);
            w.write_u32(*index);
        }
        NodeKind::IndexedOutput { index } => {
            w.write_u8(6);
            w.write_u32(*index);
        }
        NodeKind::Input { index } => {
            w.write_u8(7);
            w.write_u32(*index);
        }
        NodeKind::Output { index } => {
            w.write_u8(8);
            match index {
                OutputIndex::Ordinary(i) => {
                    w.write_u8(0);
                    w.write_u32(*i);
                }
                OutputIndex::RemainActive => w.write_u8(1),
            }
        }
        NodeKind::TemporaryReference => {
            w.write_u8(9);
        }
    }
    Ok(())
}

fn read_node_kind(r: &mut ByteReader, registry: &dyn NativeModuleRegistry) -> Result<NodeKind, InstrumentError> {
    Ok(match r.read_u8()? {
        0 => NodeKind::Constant(ConstantData::Real(r.read_f64()?)),
        1 => NodeKind::Constant(ConstantData::Bool(r.read_bool()?)),
        2 => NodeKind::Constant(ConstantData::StringOffset(r.read_u32()?)),
        3 => NodeKind::Array,
        4 => {
            let uid = NativeModuleUid(r.read_u64()?);
            let upsample_factor = r.read_u32()?;
            let native_module =
                registry.lookup_uid(uid).ok_or(InstrumentError::UnknownNativeModuleUid(uid.0))?;
            NodeKind::NativeModuleCall { native_module, upsample_factor }
        }
        5 => NodeKind::IndexedInput { index: r.read_u32()? },
        6 => NodeKind::IndexedOutput { index: r.read_u32()? },
        7 => NodeKind::Input { index: r.read_u32()? },
        8 => {
            let index = match r.read_u8()? {
                0 => OutputIndex::Ordinary(r.read_u32()?),
                1 => OutputIndex::RemainActive,
                other => return Err(InstrumentError::Malformed(format!("bad output index tag {}", other))),
            };
            NodeKind::Output { index }
        }
        9 => NodeKind::TemporaryReference,
        other => return Err(InstrumentError::Malformed(format!("bad node kind tag {}", other))),
    })
}

fn write_qualified_data_type(w: &mut ByteWriter, qdt: &QualifiedDataType) {
    write_data_type(w, &qdt.data_type);
    w.write_u8(match qdt.mutability {
        DataMutability::Constant => 0,
        DataMutability::DependentConstant => 1,
        DataMutability::Variable => 2,
    });
}

fn read_qualified_data_type(r: &mut ByteReader) -> Result<QualifiedDataType, InstrumentError> {
    let data_type = read_data_type(r)?;
    let mutability = match r.read_u8()? {
        0 => DataMutability::Constant,
        1 => DataMutability::DependentConstant,
        2 => DataMutability::Variable,
        other => return Err(InstrumentError::Malformed(format!("bad mutability tag {}", other))),
    };
    Ok(QualifiedDataType::new(data_type, mutability))
}

fn write_data_type(w: &mut ByteWriter, dt: &DataType) {
    w.write_u8(match dt.primitive_kind {
        PrimitiveKind::Void => 0,
        PrimitiveKind::Module => 1,
        PrimitiveKind::Real => 2,
        PrimitiveKind::Bool => 3,
        PrimitiveKind::String => 4,
    });
    w.write_bool(dt.is_array);
    w.write_u32(dt.upsample_factor);
}

fn read_data_type(r: &mut ByteReader) -> Result<DataType, InstrumentError> {
    let primitive_kind = match r.read_u8()? {
        0 => PrimitiveKind::Void,
        1 => PrimitiveKind::Module,
        2 => PrimitiveKind::Real,
        3 => PrimitiveKind::Bool,
        4 => PrimitiveKind::String,
        other => return Err(InstrumentError::Malformed(format!("bad primitive kind tag {}", other))),
    };
    let is_array = r.read_bool()?;
    let upsample_factor = r.read_u32()?;
    Ok(DataType { primitive_kind, is_array, upsample_factor })
}

struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_f64(&mut self, v: f64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], InstrumentError> {
        let end = self.pos.checked_add(len).ok_or_else(|| InstrumentError::Malformed("truncated".to_string()))?;
        let slice = self.data.get(self.pos..end).ok_or_else(|| InstrumentError::Malformed("truncated".to_string()))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, InstrumentError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool, InstrumentError> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u32(&mut self) -> Result<u32, InstrumentError> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().expect("length checked")))
    }

    fn read_i32(&mut self) -> Result<i32, InstrumentError> {
        Ok(i32::from_le_bytes(self.read_bytes(4)?.try_into().expect("length checked")))
    }

    fn read_u64(&mut self) -> Result<u64, InstrumentError> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().expect("length checked")))
    }

    fn read_f64(&mut self) -> Result<f64, InstrumentError> {
        Ok(f64::from_le_bytes(self.read_bytes(8)?.try_into().expect("length checked")))
    }

    fn read_string(&mut self) -> Result<String, InstrumentError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| InstrumentError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputIndex;
    use crate::registry::{
        CompileTimeSignature, DataAccess, NativeModuleArgument, NativeModuleHandle, NativeModuleInfo, NativeModuleUid,
    };
    use crate::types::{PrimitiveKind, Qualifier};
    use std::collections::HashMap as StdHashMap;

    struct EmptyRegistry {
        modules: StdHashMap<u32, NativeModuleInfo>,
        by_uid: StdHashMap<u64, NativeModuleHandle>,
    }

    impl EmptyRegistry {
        fn with_add() -> Self {
            let mut modules = StdHashMap::new();
            let mut by_uid = StdHashMap::new();
            modules.insert(
                0,
                NativeModuleInfo {
                    uid: NativeModuleUid(7),
                    name: "add".to_string(),
                    arguments: vec![
                        NativeModuleArgument {
                            name: "a".to_string(),
                            qualifier: Qualifier::In,
                            data_type: DataType::scalar(PrimitiveKind::Real),
                            data_access: DataAccess::Value,
                            is_dependent_constant_input: false,
                        },
                        NativeModuleArgument {
                            name: "b".to_string(),
                            qualifier: Qualifier::In,
                            data_type: DataType::scalar(PrimitiveKind::Real),
                            data_access: DataAccess::Value,
                            is_dependent_constant_input: false,
                        },
                    ],
                    return_type: DataType::scalar(PrimitiveKind::Real),
                    compile_time: None::<CompileTimeSignature>,
                    has_get_latency: false,
                    operator_identity: Some("+"),
                    always_runs_at_compile_time: false,
                    runs_at_compile_time_when_dependent_constants_are_constant: false,
                },
            );
            by_uid.insert(7, NativeModuleHandle(0));
            Self { modules, by_uid }
        }
    }

    impl NativeModuleRegistry for EmptyRegistry {
        fn lookup(&self, handle: NativeModuleHandle) -> &NativeModuleInfo {
            &self.modules[&handle.0]
        }
        fn lookup_uid(&self, uid: NativeModuleUid) -> Option<NativeModuleHandle> {
            self.by_uid.get(&uid.0).copied()
        }
        fn find_by_name(&self, _name: &str) -> Vec<NativeModuleHandle> {
            Vec::new()
        }
        fn optimization_rules_for(&self, _handle: NativeModuleHandle) -> &[crate::optimize::rule::OptimizationRule] {
            &[]
        }
    }

    fn real_qdt() -> QualifiedDataType {
        QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real))
    }

    fn sample_instrument() -> Instrument {
        let mut voice = NativeModuleGraph::new();
        let input = voice.add_input_node(0, real_qdt());
        let s = voice.add_constant_string("hello");
        let call = voice.add_native_module_call(NativeModuleHandle(0), 1, &[real_qdt(), real_qdt()], &[real_qdt()]);
        let inputs = voice.get_node(call).unwrap().incoming_edges().to_vec();
        voice.add_edge(input, inputs[0]).unwrap();
        let two = voice.add_constant_real(2.0, 1);
        voice.add_edge(two, inputs[1]).unwrap();
        let output = voice.get_node(call).unwrap().outgoing_edges()[0];
        let out = voice.add_output_node(OutputIndex::Ordinary(0), real_qdt());
        voice.add_edge(output, out).unwrap();
        let str_out = voice.add_output_node(
            OutputIndex::Ordinary(1),
            QualifiedDataType::constant(DataType::scalar(PrimitiveKind::String)),
        );
        voice.add_edge(s, str_out).unwrap();

        let globals = InstrumentGlobals { max_voices: 8, sample_rate: 48_000, chunk_size: 128, activate_fx_immediately: true };
        Instrument { variants: vec![InstrumentVariant { globals, voice_graph: Some(voice), fx_graph: None }] }
    }

    #[test]
    fn round_trips_a_simple_instrument() {
        let registry = EmptyRegistry::with_add();
        let instrument = sample_instrument();
        let bytes = save(&instrument, &registry).unwrap();
        let loaded = load(&bytes, &registry).unwrap();

        assert_eq!(loaded.variants.len(), 1);
        let variant = &loaded.variants[0];
        assert_eq!(variant.globals, instrument.variants[0].globals);
        let voice = variant.voice_graph.as_ref().unwrap();
        assert_eq!(voice.node_count(), instrument.variants[0].voice_graph.as_ref().unwrap().node_count());
    }

    #[test]
    fn rejects_bad_magic() {
        let registry = EmptyRegistry::with_add();
        let mut bytes = save(&sample_instrument(), &registry).unwrap();
        bytes[0] = b'x';
        assert!(load(&bytes, &registry).is_err());
    }

    #[test]
    fn rejects_unknown_native_module_uid() {
        let registry = EmptyRegistry::with_add();
        let bytes = save(&sample_instrument(), &registry).unwrap();
        struct NoModules;
        impl NativeModuleRegistry for NoModules {
            fn lookup(&self, _handle: NativeModuleHandle) -> &NativeModuleInfo {
                unreachable!()
            }
            fn lookup_uid(&self, _uid: NativeModuleUid) -> Option<NativeModuleHandle> {
                None
            }
            fn find_by_name(&self, _name: &str) -> Vec<NativeModuleHandle> {
                Vec::new()
            }
            fn optimization_rules_for(&self, _handle: NativeModuleHandle) -> &[crate::optimize::rule::OptimizationRule] {
                &[]
            }
        }
        assert!(matches!(load(&bytes, &NoModules), Err(InstrumentError::UnknownNativeModuleUid(7))));
    }
}
