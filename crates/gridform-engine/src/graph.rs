//! Dependency resolver — orders tasks so every task follows what it links to.
//!
//! Edges run from a dependency to its dependent. Tasks with no ordering
//! constraint between them come out sorted by name, so the same declared set
//! always converges in the same order.

use std::collections::{BTreeSet, HashMap};

use gridform_core::Task;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// A validated, acyclic task set with a fixed apply order.
#[derive(Debug)]
pub struct DependencyGraph {
    tasks: Vec<Task>,
    /// Indices into `tasks`, in apply order.
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Resolve `tasks` into a deterministic topological order.
    pub fn build(tasks: Vec<Task>) -> EngineResult<Self> {
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::with_capacity(tasks.len());

        for (i, task) in tasks.iter().enumerate() {
            if nodes.insert(task.name(), graph.add_node(i)).is_some() {
                return Err(EngineError::DuplicateTask(task.name().to_string()));
            }
        }

        for task in &tasks {
            let to = nodes[task.name()];
            for dep in task.dependencies() {
                let from = nodes.get(dep.as_str()).ok_or_else(|| {
                    EngineError::UnknownDependency {
                        task: task.name().to_string(),
                        missing: dep.clone(),
                    }
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        let mut cyclic: Vec<String> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|n| tasks[graph[n]].name().to_string())
            .collect();
        if !cyclic.is_empty() {
            cyclic.sort();
            return Err(EngineError::Cycle { tasks: cyclic });
        }

        // Kahn's algorithm, always releasing the lexically smallest ready task.
        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<(&str, NodeIndex)> = graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .map(|n| (tasks[graph[n]].name(), n))
            .collect();

        let mut order = Vec::with_capacity(tasks.len());
        while let Some((_, n)) = ready.pop_first() {
            order.push(graph[n]);
            for next in graph.neighbors_directed(n, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.insert((tasks[graph[next]].name(), next));
                }
            }
        }

        debug!(tasks = order.len(), edges = graph.edge_count(), "dependency graph resolved");
        Ok(Self { tasks, order })
    }

    /// Tasks in apply order.
    pub fn ordered(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().map(|&i| &self.tasks[i])
    }

    /// Task names in apply order.
    pub fn names(&self) -> Vec<&str> {
        self.ordered().map(Task::name).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridform_core::kinds;

    fn task(name: &str, links: &[&str]) -> Task {
        let mut builder = Task::builder(kinds::NETWORK, name);
        for (i, target) in links.iter().enumerate() {
            builder = builder.link(&format!("ref{i}"), target);
        }
        builder.build()
    }

    fn position(graph: &DependencyGraph, name: &str) -> usize {
        graph.names().iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn dependencies_come_first() {
        let graph = DependencyGraph::build(vec![
            task("forwarding-rule", &["address", "target-pool"]),
            task("target-pool", &["health-check"]),
            task("health-check", &[]),
            task("address", &[]),
        ])
        .unwrap();

        assert!(position(&graph, "health-check") < position(&graph, "target-pool"));
        assert!(position(&graph, "target-pool") < position(&graph, "forwarding-rule"));
        assert!(position(&graph, "address") < position(&graph, "forwarding-rule"));
    }

    #[test]
    fn independent_tasks_sorted_by_name() {
        let graph = DependencyGraph::build(vec![
            task("zeta", &[]),
            task("alpha", &[]),
            task("mid", &["zeta"]),
            task("beta", &[]),
        ])
        .unwrap();
        assert_eq!(graph.names(), vec!["alpha", "beta", "zeta", "mid"]);
    }

    #[test]
    fn order_independent_of_input_order() {
        let a = DependencyGraph::build(vec![
            task("subnet-a", &["net"]),
            task("net", &[]),
            task("subnet-b", &["net"]),
        ])
        .unwrap();
        let b = DependencyGraph::build(vec![
            task("subnet-b", &["net"]),
            task("subnet-a", &["net"]),
            task("net", &[]),
        ])
        .unwrap();
        assert_eq!(a.names(), b.names());
        assert_eq!(a.names(), vec!["net", "subnet-a", "subnet-b"]);
    }

    #[test]
    fn two_task_cycle_detected() {
        let err = DependencyGraph::build(vec![
            task("a", &["b"]),
            task("b", &["a"]),
            task("c", &[]),
        ])
        .unwrap_err();
        match err {
            EngineError::Cycle { tasks } => assert_eq!(tasks, vec!["a", "b"]),
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let err = DependencyGraph::build(vec![task("a", &["a"])]).unwrap_err();
        assert!(matches!(err, EngineError::Cycle { .. }));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let err = DependencyGraph::build(vec![task("rule", &["missing-net"])]).unwrap_err();
        match err {
            EngineError::UnknownDependency { task, missing } => {
                assert_eq!(task, "rule");
                assert_eq!(missing, "missing-net");
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = DependencyGraph::build(vec![task("a", &[]), task("a", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTask(name) if name == "a"));
    }

    #[test]
    fn empty_set_is_valid() {
        let graph = DependencyGraph::build(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.ordered().count(), 0);
    }
}
