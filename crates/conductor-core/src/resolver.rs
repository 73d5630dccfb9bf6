//! Dependency resolution for plan steps
//!
//! Steps and their dependency edges are loaded into a `petgraph` digraph
//! (edge `from -> to` means `from` must run first). Ordering is a
//! three-color depth-first traversal over each step's prerequisites, so a
//! step is emitted only after everything it depends on.
//!
//! # Invariants
//!
//! - Every edge's `to` appears after its `from` in the resolved order
//! - Independent steps keep their original list position as tie-break
//! - A cycle aborts resolution with [`ConductorError::CircularDependency`]

use crate::error::{ConductorError, Result};
use crate::plan::{DependencyCondition, PlanDependency, PlanStep};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    Visiting,
    Visited,
}

/// Step dependency graph, indexed by position in the step list
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<usize, DependencyCondition>,
    ids: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph from a step list and its edges
    ///
    /// # Errors
    ///
    /// Returns `UnknownStep` if an edge names a step that is not in `steps`.
    pub fn build(steps: &[PlanStep], dependencies: &[PlanDependency]) -> Result<Self> {
        let ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
        Self::from_ids(ids, dependencies)
    }

    /// Build the graph from bare step ids
    pub fn from_ids(ids: Vec<String>, dependencies: &[PlanDependency]) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(ids.len(), dependencies.len());
        let mut node_map: HashMap<&str, NodeIndex> = HashMap::with_capacity(ids.len());

        for (position, id) in ids.iter().enumerate() {
            let node = graph.add_node(position);
            node_map.insert(id.as_str(), node);
        }

        for dep in dependencies {
            let from = node_map
                .get(dep.from.as_str())
                .ok_or_else(|| ConductorError::UnknownStep(dep.from.clone()))?;
            let to = node_map
                .get(dep.to.as_str())
                .ok_or_else(|| ConductorError::UnknownStep(dep.to.clone()))?;
            graph.add_edge(*from, *to, dep.condition);
        }

        Ok(Self { graph, ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Prerequisites of the step at `index`, with the edge condition
    ///
    /// Sorted by prerequisite position.
    pub fn prerequisites(&self, index: usize) -> Vec<(usize, DependencyCondition)> {
        let mut prereqs: Vec<(usize, DependencyCondition)> = self
            .graph
            .edges_directed(NodeIndex::new(index), Direction::Incoming)
            .map(|edge| (self.graph[edge.source()], *edge.weight()))
            .collect();
        prereqs.sort_by_key(|(position, _)| *position);
        prereqs
    }

    /// Steps that depend directly on the step at `index`
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        let mut dependents: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect();
        dependents.sort_unstable();
        dependents.dedup();
        dependents
    }

    /// Dependency-first execution order as step indices
    ///
    /// # Errors
    ///
    /// Returns `CircularDependency` carrying the offending path.
    pub fn resolve(&self) -> Result<Vec<usize>> {
        let mut colors = vec![Color::Unvisited; self.len()];
        let mut order = Vec::with_capacity(self.len());
        let mut path = Vec::new();

        for index in 0..self.len() {
            if colors[index] == Color::Unvisited {
                self.visit(index, &mut colors, &mut path, &mut order)?;
            }
        }

        Ok(order)
    }

    fn visit(
        &self,
        index: usize,
        colors: &mut [Color],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<()> {
        colors[index] = Color::Visiting;
        path.push(index);

        for (prereq, _) in self.prerequisites(index) {
            match colors[prereq] {
                Color::Visiting => return Err(self.cycle_error(prereq, path)),
                Color::Unvisited => self.visit(prereq, colors, path, order)?,
                Color::Visited => {}
            }
        }

        path.pop();
        colors[index] = Color::Visited;
        order.push(index);
        Ok(())
    }

    /// Cycle from `start` back to itself, in edge direction
    fn cycle_error(&self, start: usize, path: &[usize]) -> ConductorError {
        let begin = path.iter().position(|&i| i == start).unwrap_or(0);
        let mut cycle: Vec<String> = path[begin..]
            .iter()
            .rev()
            .map(|&i| self.ids[i].clone())
            .collect();
        cycle.insert(0, self.ids[start].clone());
        ConductorError::CircularDependency { cycle }
    }
}

/// Resolve `steps` into dependency-first index order
pub fn resolve(steps: &[PlanStep], dependencies: &[PlanDependency]) -> Result<Vec<usize>> {
    DependencyGraph::build(steps, dependencies)?.resolve()
}

/// Resolve `steps` into dependency-first id order
pub fn resolve_ids(steps: &[PlanStep], dependencies: &[PlanDependency]) -> Result<Vec<String>> {
    let order = resolve(steps, dependencies)?;
    Ok(order.into_iter().map(|i| steps[i].id.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn named(order: Vec<usize>, names: &[&str]) -> Vec<String> {
        order.into_iter().map(|i| names[i].to_string()).collect()
    }

    #[test]
    fn test_linear_chain() {
        let names = ["a", "b", "c"];
        let deps = vec![PlanDependency::new("a", "b"), PlanDependency::new("b", "c")];
        let graph = DependencyGraph::from_ids(ids(&names), &deps).unwrap();

        assert_eq!(named(graph.resolve().unwrap(), &names), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_reversed_input_is_reordered() {
        let names = ["c", "b", "a"];
        let deps = vec![PlanDependency::new("a", "b"), PlanDependency::new("b", "c")];
        let graph = DependencyGraph::from_ids(ids(&names), &deps).unwrap();

        assert_eq!(named(graph.resolve().unwrap(), &names), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_independent_steps_keep_input_order() {
        let names = ["x", "y", "z"];
        let graph = DependencyGraph::from_ids(ids(&names), &[]).unwrap();
        assert_eq!(graph.resolve().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_two_node_cycle() {
        let names = ["a", "b"];
        let deps = vec![PlanDependency::new("a", "b"), PlanDependency::new("b", "a")];
        let graph = DependencyGraph::from_ids(ids(&names), &deps).unwrap();

        match graph.resolve() {
            Err(ConductorError::CircularDependency { cycle }) => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let deps = vec![PlanDependency::new("a", "a")];
        let graph = DependencyGraph::from_ids(ids(&["a"]), &deps).unwrap();
        assert!(matches!(
            graph.resolve(),
            Err(ConductorError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_step_rejected() {
        let deps = vec![PlanDependency::new("a", "ghost")];
        let err = DependencyGraph::from_ids(ids(&["a"]), &deps).unwrap_err();
        assert!(matches!(err, ConductorError::UnknownStep(id) if id == "ghost"));
    }

    #[test]
    fn test_prerequisites_carry_condition() {
        let deps = vec![
            PlanDependency::on_success("a", "c"),
            PlanDependency::new("b", "c"),
        ];
        let graph = DependencyGraph::from_ids(ids(&["a", "b", "c"]), &deps).unwrap();

        assert_eq!(
            graph.prerequisites(2),
            vec![
                (0, DependencyCondition::OnSuccess),
                (1, DependencyCondition::Unconditional)
            ]
        );
        assert_eq!(graph.dependents(0), vec![2]);
    }
}
