//! An instrument: an ordered set of [InstrumentVariant]s, each bundling a
//! globals header with up to two [crate::graph::NativeModuleGraph]s (voice
//! and fx). `spec.md` §3.4.

use crate::error::InstrumentError;
use crate::graph::NativeModuleGraph;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Per-variant runtime parameters. Validated the same way the teacher
/// validates `HardwareSpec`/`ProgramSpec`: derive [Validate], then only ever
/// hold one behind a [crate::util::Valid] wrapper.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct InstrumentGlobals {
    #[validate(range(min = 1))]
    pub max_voices: u32,
    #[validate(range(min = 1))]
    pub sample_rate: u32,
    #[validate(range(min = 1))]
    pub chunk_size: u32,
    pub activate_fx_immediately: bool,
}

/// A variant bundles a globals header with 0-2 graphs. `spec.md` requires at
/// least one graph and, when both are present, that their arities line up;
/// [InstrumentVariant::validate] checks both (graphs aren't `Validate`-able
/// themselves, so this is hand-written rather than derived).
pub struct InstrumentVariant {
    pub globals: InstrumentGlobals,
    pub voice_graph: Option<NativeModuleGraph>,
    pub fx_graph: Option<NativeModuleGraph>,
}

impl InstrumentVariant {
    pub fn validate(&self) -> Result<(), InstrumentError> {
        let (voice, fx) = match (&self.voice_graph, &self.fx_graph) {
            (None, None) => return Err(InstrumentError::VariantHasNoGraphs),
            (voice, fx) => (voice, fx),
        };
        if let (Some(voice), Some(fx)) = (voice, fx) {
            let voice_outputs = voice
                .node_handles()
                .filter(|h| {
                    matches!(
                        voice.get_node(*h).map(|n| &n.kind),
                        Ok(crate::graph::NodeKind::Output { index }) if !matches!(index, crate::graph::OutputIndex::RemainActive)
                    )
                })
                .count();
            let fx_inputs = fx
                .node_handles()
                .filter(|h| matches!(fx.get_node(*h).map(|n| &n.kind), Ok(crate::graph::NodeKind::Input { .. })))
                .count();
            if voice_outputs != fx_inputs {
                return Err(InstrumentError::GraphArityMismatch { voice_outputs, fx_inputs });
            }
        }
        Ok(())
    }
}

/// An ordered set of variants. `spec.md` §3.4: valid when every variant is
/// valid.
pub struct Instrument {
    pub variants: Vec<InstrumentVariant>,
}

impl Instrument {
    pub fn validate(&self) -> Result<(), InstrumentError> {
        for variant in &self.variants {
            variant.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputIndex;
    use crate::types::{DataType, PrimitiveKind, QualifiedDataType};

    fn globals() -> InstrumentGlobals {
        InstrumentGlobals { max_voices: 16, sample_rate: 44_100, chunk_size: 64, activate_fx_immediately: false }
    }

    #[test]
    fn variant_with_no_graphs_is_invalid() {
        let variant = InstrumentVariant { globals: globals(), voice_graph: None, fx_graph: None };
        assert_eq!(variant.validate(), Err(InstrumentError::VariantHasNoGraphs));
    }

    #[test]
    fn mismatched_voice_fx_arity_is_rejected() {
        let mut voice = NativeModuleGraph::new();
        let c = voice.add_constant_real(1.0, 1);
        let out = voice.add_output_node(
            OutputIndex::Ordinary(0),
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)),
        );
        voice.add_edge(c, out).unwrap();

        let mut fx = NativeModuleGraph::new();
        fx.add_input_node(0, QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)));
        fx.add_input_node(1, QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Real)));

        let variant = InstrumentVariant { globals: globals(), voice_graph: Some(voice), fx_graph: Some(fx) };
        assert!(matches!(variant.validate(), Err(InstrumentError::GraphArityMismatch { voice_outputs: 1, fx_inputs: 2 })));
    }

    #[test]
    fn single_graph_variant_is_valid() {
        let mut voice = NativeModuleGraph::new();
        let c = voice.add_constant_bool(true);
        let out = voice.add_output_node(
            OutputIndex::RemainActive,
            QualifiedDataType::variable(DataType::scalar(PrimitiveKind::Bool)),
        );
        voice.add_edge(c, out).unwrap();

        let variant = InstrumentVariant { globals: globals(), voice_graph: Some(voice), fx_graph: None };
        assert!(variant.validate().is_ok());
    }

    #[test]
    fn invalid_globals_rejected_by_validator() {
        use crate::util::Valid;
        let bad = InstrumentGlobals { max_voices: 0, sample_rate: 44_100, chunk_size: 64, activate_fx_immediately: false };
        assert!(Valid::validate(bad).is_err());
    }
}
