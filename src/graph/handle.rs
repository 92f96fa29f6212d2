use std::fmt;

/// An opaque reference to a node in a [super::NativeModuleGraph]. Carries a
/// salt that bumps every time the slot it points at is freed, so that a
/// handle captured before a `remove_node` can be detected as stale rather
/// than silently aliasing whatever node was later allocated into the same
/// slot (`spec.md` §3.3: "Node handles are opaque, salted ... so stale
/// handles can be diagnosed").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub(super) index: u32,
    pub(super) salt: u32,
}

impl NodeHandle {
    pub(super) fn new(index: u32, salt: u32) -> Self {
        Self { index, salt }
    }

    /// The node's current dense index. Only meaningful immediately after a
    /// `compact()` call, and only until the next node is added or removed.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}.{}", self.index, self.salt)
    }
}
