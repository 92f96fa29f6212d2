//! Builder scope stack: maps names to the graph node handle they currently
//! point at, mirroring the validator's scope stack but carrying values
//! instead of types (`spec.md` §4.2).

use crate::graph::NodeHandle;
use std::collections::HashMap;

#[derive(Default)]
pub struct BuilderScope {
    bindings: HashMap<String, NodeHandle>,
}

impl BuilderScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: String, handle: NodeHandle) {
        self.bindings.insert(name, handle);
    }

    pub fn get_local(&self, name: &str) -> Option<NodeHandle> {
        self.bindings.get(name).copied()
    }
}

#[derive(Default)]
pub struct BuilderScopeStack {
    frames: Vec<BuilderScope>,
}

impl BuilderScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.frames.push(BuilderScope::new());
    }

    pub fn pop(&mut self) -> BuilderScope {
        self.frames.pop().expect("popped an empty builder scope stack")
    }

    /// Rebind `name` to `handle` in the innermost scope that already binds
    /// it (so an assignment inside a repeat body correctly rebinds an
    /// outer-scope name), falling back to declaring it in the current scope.
    pub fn bind(&mut self, name: &str, handle: NodeHandle) {
        for frame in self.frames.iter_mut().rev() {
            if frame.bindings.contains_key(name) {
                frame.bindings.insert(name.to_string(), handle);
                return;
            }
        }
        self.frames
            .last_mut()
            .expect("empty builder scope stack")
            .bind(name.to_string(), handle);
    }

    pub fn lookup(&self, name: &str) -> Option<NodeHandle> {
        self.frames.iter().rev().find_map(|frame| frame.get_local(name))
    }

    pub fn current_mut(&mut self) -> &mut BuilderScope {
        self.frames.last_mut().expect("empty builder scope stack")
    }
}
