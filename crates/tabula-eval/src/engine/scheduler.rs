use super::graph::DependencyGraph;
use super::vertex::FieldNodeId;
use crate::error::EngineError;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

pub struct Scheduler<'a> {
    graph: &'a DependencyGraph,
}

#[derive(Debug)]
pub struct Layer {
    pub vertices: Vec<FieldNodeId>,
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// Strongly connected components of the dependency relation reachable
    /// from `roots`. A component is emitted only after every component it
    /// reads from.
    pub fn components(&self, roots: &[FieldNodeId]) -> Vec<Vec<FieldNodeId>> {
        let mut tarjan = Tarjan::default();
        for &root in roots {
            if !tarjan.index.contains_key(&root) {
                tarjan.visit(self.graph, root);
            }
        }
        tarjan.components
    }

    /// Components that are cycles: several fields, or one field reading itself.
    pub fn cycles(&self, roots: &[FieldNodeId]) -> Vec<Vec<FieldNodeId>> {
        self.components(roots)
            .into_iter()
            .filter(|c| match c.as_slice() {
                [single] => self
                    .graph
                    .node(*single)
                    .dependencies
                    .iter()
                    .any(|e| e.node == *single),
                _ => true,
            })
            .collect()
    }

    /// Kahn's algorithm restricted to `subset`. Each layer only depends on
    /// earlier layers; vertices inside a layer are ordered by arena id.
    /// Vertices left over once no vertex is ready sit on a cycle.
    pub fn build_layers(&self, subset: &FxHashSet<FieldNodeId>) -> Result<Vec<Layer>, EngineError> {
        let mut in_degree: FxHashMap<FieldNodeId, usize> = FxHashMap::default();
        for &v in subset {
            let mut deps: Vec<FieldNodeId> = self
                .graph
                .node(v)
                .dependencies
                .iter()
                .map(|e| e.node)
                .filter(|d| subset.contains(d))
                .collect();
            deps.sort_unstable();
            deps.dedup();
            in_degree.insert(v, deps.len());
        }

        let mut ready: BTreeSet<FieldNodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(v, _)| *v)
            .collect();
        let mut layers = Vec::new();
        let mut placed = 0usize;

        while !ready.is_empty() {
            let current: Vec<FieldNodeId> = std::mem::take(&mut ready).into_iter().collect();
            for &v in &current {
                let mut seen: FxHashSet<FieldNodeId> = FxHashSet::default();
                for edge in &self.graph.node(v).dependents {
                    if !seen.insert(edge.node) {
                        continue;
                    }
                    if let Some(d) = in_degree.get_mut(&edge.node) {
                        *d -= 1;
                        if *d == 0 {
                            ready.insert(edge.node);
                        }
                    }
                }
            }
            placed += current.len();
            layers.push(Layer { vertices: current });
        }

        if placed < subset.len() {
            let mut stuck: Vec<FieldNodeId> = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(v, _)| v)
                .collect();
            stuck.sort_unstable();
            return Err(EngineError::CyclicDependency {
                cycle: stuck
                    .into_iter()
                    .map(|v| self.graph.node(v).qualified_name())
                    .collect(),
            });
        }

        Ok(layers)
    }
}

/// Recursive Tarjan walk over `dependencies` edges.
#[derive(Default)]
struct Tarjan {
    next: usize,
    index: FxHashMap<FieldNodeId, usize>,
    low: FxHashMap<FieldNodeId, usize>,
    stack: Vec<FieldNodeId>,
    on_stack: FxHashSet<FieldNodeId>,
    components: Vec<Vec<FieldNodeId>>,
}

impl Tarjan {
    fn visit(&mut self, graph: &DependencyGraph, v: FieldNodeId) {
        self.index.insert(v, self.next);
        self.low.insert(v, self.next);
        self.next += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        for edge in &graph.node(v).dependencies {
            let w = edge.node;
            let reach = if !self.index.contains_key(&w) {
                self.visit(graph, w);
                self.low[&w]
            } else if self.on_stack.contains(&w) {
                self.index[&w]
            } else {
                // finished component
                continue;
            };
            if reach < self.low[&v] {
                self.low.insert(v, reach);
            }
        }

        if self.low[&v] != self.index[&v] {
            return;
        }
        let mut component = Vec::new();
        while let Some(w) = self.stack.pop() {
            self.on_stack.remove(&w);
            component.push(w);
            if w == v {
                break;
            }
        }
        self.components.push(component);
    }
}
