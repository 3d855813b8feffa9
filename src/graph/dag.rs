//! Dependency graph construction and deterministic topological ordering.

use std::collections::BTreeSet;

use crate::error::PlanError;
use crate::model::Deployment;

use super::resolver::Reference;

/// Directed acyclic graph of resources; an edge runs from a dependency to its
/// dependent.
///
/// Node indices equal declaration positions in the source [`Deployment`].
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Builds the graph and computes its topological order.
    ///
    /// Among nodes that are ready at the same time, the one declared first
    /// comes first.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::CyclicDependency`] naming the full cycle path.
    pub fn build(
        deployment: &Deployment,
        references: &BTreeSet<Reference>,
    ) -> Result<Self, PlanError> {
        let ids: Vec<String> = deployment.nodes().iter().map(|n| n.id.clone()).collect();
        let mut dependencies = vec![BTreeSet::new(); ids.len()];
        let mut dependents = vec![BTreeSet::new(); ids.len()];

        for reference in references {
            let (Some(source), Some(target)) = (
                deployment.get(&reference.source),
                deployment.get(&reference.target),
            ) else {
                continue;
            };
            dependencies[source.position].insert(target.position);
            dependents[target.position].insert(source.position);
        }

        if let Some(cycle) = find_cycle(&dependencies) {
            return Err(PlanError::CyclicDependency {
                cycle: cycle.into_iter().map(|i| ids[i].clone()).collect(),
            });
        }

        let order = stable_order(&dependencies, |i| i)
            .ok_or_else(|| PlanError::CyclicDependency { cycle: Vec::new() })?;

        tracing::debug!(nodes = ids.len(), "Built dependency graph");

        Ok(Self {
            ids,
            dependencies,
            dependents,
            order,
        })
    }

    /// Resource ids in topological order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.ids[i].as_str()).collect()
    }

    /// Direct dependencies of a resource, in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.lookup(id, &self.dependencies)
    }

    /// Direct dependents of a resource, in declaration order.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.lookup(id, &self.dependents)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Every edge as `(dependency, dependent)`, for rendering.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.dependents
            .iter()
            .enumerate()
            .flat_map(|(from, tos)| {
                tos.iter()
                    .map(move |&to| (self.ids[from].as_str(), self.ids[to].as_str()))
            })
            .collect()
    }

    fn lookup<'a>(&'a self, id: &str, adjacency: &'a [BTreeSet<usize>]) -> Vec<&'a str> {
        self.ids
            .iter()
            .position(|n| n == id)
            .map(|i| {
                adjacency[i]
                    .iter()
                    .map(|&j| self.ids[j].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Finds a cycle with a depth-first search over `dependencies[i]`.
///
/// The returned path starts and ends at the same node, e.g. `[a, b, a]`.
pub(crate) fn find_cycle(dependencies: &[BTreeSet<usize>]) -> Option<Vec<usize>> {
    fn visit(
        node: usize,
        dependencies: &[BTreeSet<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::InProgress;
        path.push(node);

        for &next in &dependencies[node] {
            match marks[next] {
                Mark::InProgress => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, dependencies, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; dependencies.len()];
    let mut path = Vec::new();

    (0..dependencies.len()).find_map(|start| {
        if marks[start] == Mark::Unvisited {
            visit(start, dependencies, &mut marks, &mut path)
        } else {
            None
        }
    })
}

/// Kahn's algorithm with a priority tiebreak.
///
/// Among ready nodes the one with the lowest `(priority(i), i)` goes first.
/// Returns `None` if the graph has a cycle.
pub(crate) fn stable_order<K, F>(dependencies: &[BTreeSet<usize>], priority: F) -> Option<Vec<usize>>
where
    K: Ord,
    F: Fn(usize) -> K,
{
    let count = dependencies.len();
    let mut remaining: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut dependents = vec![Vec::new(); count];
    for (node, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(node);
        }
    }

    let mut ready: BTreeSet<(K, usize)> = (0..count)
        .filter(|&i| remaining[i] == 0)
        .map(|i| (priority(i), i))
        .collect();
    let mut order = Vec::with_capacity(count);

    while let Some((_, node)) = ready.pop_first() {
        order.push(node);
        for &dependent in &dependents[node] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert((priority(dependent), dependent));
            }
        }
    }

    (order.len() == count).then_some(order)
}
