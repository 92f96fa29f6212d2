//! Scope stack for the validator. `spec.md` §4.1.1/§4.1.2.

use crate::types::{DataType, Qualifier};
use std::collections::HashMap;

/// What a name is bound to, plus the per-statement bookkeeping the
/// assignment-discipline rules (§4.1.2) need.
#[derive(Clone, Debug)]
pub struct IdentifierRecord {
    pub qualifier: Qualifier,
    pub data_type: DataType,
    pub is_module: bool,
    /// Number of declared overloads so far, for module identifiers only.
    pub overload_count: u32,
    /// `-1` until the value has been written for the first time.
    pub last_statement_assigned: i64,
    pub last_statement_used: i64,
}

impl IdentifierRecord {
    pub fn new_value(qualifier: Qualifier, data_type: DataType, assigned_at_entry: bool) -> Self {
        Self {
            qualifier,
            data_type,
            is_module: false,
            overload_count: 0,
            last_statement_assigned: if assigned_at_entry { 0 } else { -1 },
            last_statement_used: -1,
        }
    }

    pub fn new_module(data_type: DataType) -> Self {
        Self {
            qualifier: Qualifier::None,
            data_type,
            is_module: true,
            overload_count: 1,
            last_statement_assigned: 0,
            last_statement_used: -1,
        }
    }
}

/// A single scope frame: just an identifier namespace. The statement counter
/// that gives assignment-order meaning lives on the validator itself, not
/// here -- a `repeat` loop body is a fresh `Scope` frame but *not* a fresh
/// statement sequence, so resetting it per frame would make every loop
/// body's first statement collide with statement 0 of its enclosing module.
#[derive(Default)]
pub struct Scope {
    identifiers: HashMap<String, IdentifierRecord>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: String, record: IdentifierRecord) -> Result<(), ()> {
        if self.identifiers.contains_key(&name) {
            return Err(());
        }
        self.identifiers.insert(name, record);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&IdentifierRecord> {
        self.identifiers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut IdentifierRecord> {
        self.identifiers.get_mut(name)
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.identifiers.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IdentifierRecord)> {
        self.identifiers.iter()
    }
}

/// A stack of scopes, innermost last. Lookup walks outward.
#[derive(Default)]
pub struct ScopeStack {
    frames: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.frames.push(Scope::new());
    }

    pub fn pop(&mut self) -> Scope {
        self.frames.pop().expect("popped an empty scope stack")
    }

    pub fn current(&self) -> &Scope {
        self.frames.last().expect("empty scope stack")
    }

    pub fn current_mut(&mut self) -> &mut Scope {
        self.frames.last_mut().expect("empty scope stack")
    }

    /// Look up a name, walking outward from the innermost scope. Returns the
    /// depth (0 = innermost) the identifier was found at along with the
    /// record, since a handful of rules (assignment target resolution) need
    /// to mutate the scope that actually owns the name.
    pub fn lookup(&self, name: &str) -> Option<(usize, &IdentifierRecord)> {
        for (depth, frame) in self.frames.iter().rev().enumerate() {
            if let Some(record) = frame.get(name) {
                return Some((depth, record));
            }
        }
        None
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut IdentifierRecord> {
        for frame in self.frames.iter_mut().rev() {
            if frame.contains_local(name) {
                return frame.get_mut(name);
            }
        }
        None
    }

    pub fn declare_in_current(&mut self, name: String, record: IdentifierRecord) -> Result<(), ()> {
        self.current_mut().declare(name, record)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
