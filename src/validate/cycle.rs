//! Module-call cycle detection: tricolor depth-first traversal over module
//! indices. `spec.md` §4.1.4, §9 ("not pointers").

use std::collections::HashMap;

#[derive(Copy, Clone, PartialEq, Eq)]
enum Color {
    Unvisited,
    OnStack,
    Done,
}

/// Adjacency list of the module-call graph: one entry per non-native module,
/// indexed by a small integer assigned as modules are registered in pass 1.
#[derive(Default)]
pub struct ModuleCallGraph {
    names: Vec<String>,
    index_of: HashMap<String, usize>,
    edges: Vec<Vec<usize>>,
}

impl ModuleCallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module node if it isn't already present, returning its
    /// index either way.
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&index) = self.index_of.get(name) {
            return index;
        }
        let index = self.names.len();
        self.names.push(name.to_string());
        self.index_of.insert(name.to_string(), index);
        self.edges.push(Vec::new());
        index
    }

    pub fn add_edge(&mut self, caller: usize, callee: usize) {
        self.edges[caller].push(callee);
    }

    /// Look up a node's index without registering it, for call sites that
    /// must not create module-call-graph nodes for native callees.
    pub fn get_index(&self, name: &str) -> Option<usize> {
        self.index_of.get(name).copied()
    }

    /// `true` if the call graph contains a directed cycle. Per §4.1.4, only
    /// the *existence* of a cycle is reported, not each one found.
    pub fn has_cycle(&self) -> bool {
        let mut color = vec![Color::Unvisited; self.names.len()];
        for start in 0..self.names.len() {
            if color[start] == Color::Unvisited && self.visit(start, &mut color) {
                return true;
            }
        }
        false
    }

    fn visit(&self, node: usize, color: &mut [Color]) -> bool {
        color[node] = Color::OnStack;
        for &next in &self.edges[node] {
            match color[next] {
                Color::OnStack => return true,
                Color::Unvisited => {
                    if self.visit(next, color) {
                        return true;
                    }
                }
                Color::Done => {}
            }
        }
        color[node] = Color::Done;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cycle_in_dag() {
        let mut graph = ModuleCallGraph::new();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        graph.add_edge(a, b);
        assert!(!graph.has_cycle());
    }

    #[test]
    fn direct_cycle_detected() {
        let mut graph = ModuleCallGraph::new();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        graph.add_edge(a, b);
        graph.add_edge(b, a);
        assert!(graph.has_cycle());
    }

    #[test]
    fn self_call_is_a_cycle() {
        let mut graph = ModuleCallGraph::new();
        let a = graph.add_node("a");
        graph.add_edge(a, a);
        assert!(graph.has_cycle());
    }
}
