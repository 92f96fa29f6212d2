//! Small shared types used across the compiler core: the generic AST node
//! wrapper, source spans, and a `Valid<T>` wrapper around `validator`-checked
//! data.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Formatter};
use std::ops::Deref;
use validator::Validate;

/// A generic AST node container. Holds the node's data plus some metadata
/// (almost always a [Span]). Every AST type in [crate::ast] is generic over
/// the metadata type so that tests can build trees without real spans.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Node<T, M>(pub T, pub M);

impl<T, M> Node<T, M> {
    pub fn value(&self) -> &T {
        &self.0
    }

    pub fn metadata(&self) -> &M {
        &self.1
    }

    pub fn into_value(self) -> T {
        self.0
    }

    /// Build a new `Node` by mapping the data field; metadata is preserved.
    pub fn map<U>(self, mapper: impl FnOnce(T) -> U) -> Node<U, M> {
        Node(mapper(self.0), self.1)
    }
}

/// A half-open byte range plus line/column info, identifying the slice of
/// source text a diagnostic is about. Produced by the (external) parser;
/// the compiler core only ever reads it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub start_offset: u32,
    pub end_offset: u32,
}

impl Span {
    pub const DUMMY: Span = Span {
        start_line: 0,
        start_col: 0,
        start_offset: 0,
        end_offset: 0,
    };

    /// Slice the original source text that this span covers. Returns an
    /// empty string if the span is out of bounds for the given source (this
    /// can happen for synthetic spans used in hand-built test ASTs).
    pub fn get_source_slice<'a>(&self, src: &'a str) -> &'a str {
        src.get(self.start_offset as usize..self.end_offset as usize)
            .unwrap_or("")
    }
}

/// Write a `^^^` style highlight of `span` underneath the relevant line of
/// `src`, for alternate (`{:#}`) display of diagnostics.
pub fn fmt_src_highlights(
    f: &mut Formatter<'_>,
    span: &Span,
    src: &str,
) -> fmt::Result {
    if let Some(line) = src.lines().nth(span.start_line as usize) {
        writeln!(f)?;
        write!(f, "  {}", line)?;
        let highlight_len = (span.end_offset - span.start_offset).max(1) as usize;
        write!(
            f,
            "\n  {}{}",
            " ".repeat(span.start_col as usize),
            "^".repeat(highlight_len)
        )?;
    }
    Ok(())
}

/// A small wrapper indicating that the wrapped value has passed
/// `validator::Validate::validate`. Can only be constructed via
/// [Valid::validate], so holding a `Valid<T>` is proof the value was checked.
#[derive(Copy, Clone, Debug)]
pub struct Valid<T: Validate> {
    inner: T,
}

impl<T: Validate> Valid<T> {
    pub fn validate(value: T) -> Result<Self, validator::ValidationErrors> {
        value.validate()?;
        Ok(Self { inner: value })
    }
}

impl<T: Validate> Deref for Valid<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}
