//! Core implementation of the WaveLang audio-DSL compiler. The main usage of
//! this crate is to turn a validated [ast::File] into one or more
//! [instrument::Instrument]s that a host runtime can load and play. A
//! compilation runs against a [registry::NativeModuleRegistry], which is the
//! host's catalog of built-in signal-processing primitives; this crate only
//! consumes that catalog, it never populates one.
//!
//! ```ignore
//! use wavelang_compiler_core::{compile, registry::NativeModuleRegistry};
//!
//! fn compile_one(file: &wavelang_compiler_core::ast::File<wavelang_compiler_core::util::Span>,
//!                 registry: &dyn NativeModuleRegistry) {
//!     match compile(file, registry) {
//!         Ok(instrument) => { let _ = instrument; }
//!         Err(errors) => eprintln!("{}", errors),
//!     }
//! }
//! ```

#![deny(clippy::all, unused_must_use)]

#[macro_use]
extern crate validator_derive;

pub mod ast;
pub mod builder;
pub mod const_eval;
pub mod consts;
pub mod error;
pub mod graph;
pub mod instrument;
pub mod optimize;
pub mod registry;
pub mod serialize;
pub mod types;
pub mod util;
pub mod validate;

pub use error::{Diagnostic, DiagnosticKind, Diagnostics, GraphError, InstrumentError};
pub use instrument::{Instrument, InstrumentGlobals, InstrumentVariant};
pub use util::Valid;
pub use validator; // Consumers constructing their own `Validate` types need this.

use consts::{FX_ENTRY_POINT, VOICE_ENTRY_POINT};
use registry::NativeModuleRegistry;
use thiserror::Error;

/// Everything that can go wrong turning source into a playable instrument:
/// either the AST failed validation, or the built/optimized graphs violate
/// an instrument-level invariant (`spec.md` §3.4). The latter is always a
/// compiler bug -- a validated AST should never build an invalid instrument
/// -- but it's still surfaced as a typed error rather than a panic so a
/// caller embedding this crate doesn't get taken down by one.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0}")]
    Validation(Diagnostics),
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
}

/// Run the full pipeline: validate, then build and optimize whichever of the
/// voice/fx graphs the file declares, then assemble a single-variant
/// [Instrument]. Multi-variant instruments (distinct globals per variant)
/// are a host-side concern -- this crate only ever produces the one variant
/// implied by a single compiled file (`spec.md` §1's scope note).
pub fn compile(
    file: &ast::File<util::Span>,
    source: &str,
    globals: InstrumentGlobals,
    registry: &dyn NativeModuleRegistry,
) -> Result<Instrument, CompileError> {
    log::debug!("validating file ({} top-level statements)", file.top_level.statements.len());
    let validation = validate::validate(file, registry);
    if !validation.is_ok() {
        log::trace!("validation failed with {} diagnostics", validation.diagnostics.len());
        return Err(CompileError::Validation(Diagnostics::new(validation.diagnostics, source.to_string())));
    }

    let voice_graph = build_entry_point(file, VOICE_ENTRY_POINT, validation.has_voice_entry, registry, source)?;
    let fx_graph = build_entry_point(file, FX_ENTRY_POINT, validation.has_fx_entry, registry, source)?;

    let instrument = Instrument { variants: vec![InstrumentVariant { globals, voice_graph, fx_graph }] };
    instrument.validate()?;
    log::debug!("compiled instrument with 1 variant");
    Ok(instrument)
}

fn build_entry_point(
    file: &ast::File<util::Span>,
    entry_point_name: &str,
    has_entry: bool,
    registry: &dyn NativeModuleRegistry,
    source: &str,
) -> Result<Option<graph::NativeModuleGraph>, CompileError> {
    if !has_entry {
        return Ok(None);
    }
    let output = builder::build_graph(file, entry_point_name, registry);
    if !output.is_ok() {
        log::trace!("{} build failed with {} diagnostics", entry_point_name, output.diagnostics.len());
        return Err(CompileError::Validation(Diagnostics::new(output.diagnostics, source.to_string())));
    }
    let mut graph = output.graph;
    log::trace!("optimizing {} ({} nodes before)", entry_point_name, graph.node_count());
    optimize::optimize(&mut graph, registry);
    log::trace!("optimized {} ({} nodes after)", entry_point_name, graph.node_count());
    Ok(Some(graph))
}
