//! Dependency graph engine
//!
//! Validates stage specifications into an acyclic [`StageGraph`], computes a
//! deterministic topological order and answers readiness queries against a
//! [`RunState`].

use crate::error::DagError;
use crate::spec::StageSpec;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use picker_artifact::StageStatus;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Per-stage execution status for one symbol's run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    statuses: HashMap<String, StageStatus>,
}

impl RunState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of a stage; `NotStarted` if never set
    #[must_use]
    pub fn status(&self, stage: &str) -> StageStatus {
        self.statuses.get(stage).copied().unwrap_or_default()
    }

    pub fn set(&mut self, stage: impl Into<String>, status: StageStatus) {
        self.statuses.insert(stage.into(), status);
    }

    #[must_use]
    pub fn count(&self, status: StageStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }
}

/// Validated, acyclic set of stages
///
/// Node indices in the inner graph equal declaration indices; edges point
/// from an upstream stage to the stage that depends on it.
#[derive(Debug, Clone)]
pub struct StageGraph {
    specs: Vec<StageSpec>,
    index: HashMap<String, usize>,
    graph: DiGraph<usize, ()>,
    order: Vec<usize>,
}

impl StageGraph {
    /// Validate specs and compute the execution order
    ///
    /// # Errors
    /// - `DagError::Empty` when no stage is declared
    /// - `DagError::DuplicateStage` for a repeated name
    /// - `DagError::UnknownUpstream` for a dependency on an undeclared stage
    /// - `DagError::CyclicDependency` naming one cycle (self dependencies included)
    /// - `DagError::UnsatisfiedInput` when an input kind has no producer upstream
    pub fn new(specs: impl IntoIterator<Item = StageSpec>) -> Result<Self, DagError> {
        let mut specs: Vec<StageSpec> = specs.into_iter().collect();
        if specs.is_empty() {
            return Err(DagError::Empty);
        }

        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(DagError::DuplicateStage(spec.name.clone()));
            }
        }

        let mut graph = DiGraph::with_capacity(specs.len(), specs.len());
        for i in 0..specs.len() {
            graph.add_node(i);
        }

        for (i, spec) in specs.iter_mut().enumerate() {
            let mut seen = HashSet::new();
            spec.after.retain(|u| seen.insert(u.clone()));
            for upstream in &spec.after {
                if *upstream == spec.name {
                    return Err(DagError::CyclicDependency {
                        cycle: vec![spec.name.clone(), spec.name.clone()],
                    });
                }
                let Some(&u) = index.get(upstream) else {
                    return Err(DagError::UnknownUpstream {
                        stage: spec.name.clone(),
                        upstream: upstream.clone(),
                    });
                };
                graph.add_edge(NodeIndex::new(u), NodeIndex::new(i), ());
            }
        }

        let order = kahn_order(&graph);
        if order.len() < specs.len() {
            let cycle = name_cycle(&graph)
                .into_iter()
                .map(|i| specs[i].name.clone())
                .collect();
            return Err(DagError::CyclicDependency { cycle });
        }

        for spec in &specs {
            for kind in &spec.inputs {
                let produced = spec
                    .after
                    .iter()
                    .filter_map(|u| index.get(u))
                    .any(|&u| specs[u].output == *kind);
                if !produced {
                    return Err(DagError::UnsatisfiedInput {
                        stage: spec.name.clone(),
                        kind: *kind,
                    });
                }
            }
        }

        Ok(Self {
            specs,
            index,
            graph,
            order,
        })
    }

    /// Stage names in execution order
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.specs[i].name.as_str())
            .collect()
    }

    /// Specs in execution order
    pub fn ordered_specs(&self) -> impl Iterator<Item = &StageSpec> {
        self.order.iter().map(move |&i| &self.specs[i])
    }

    /// Specs in declaration order
    #[must_use]
    pub fn specs(&self) -> &[StageSpec] {
        &self.specs
    }

    #[must_use]
    pub fn spec(&self, name: &str) -> Option<&StageSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Direct upstreams of a stage, in declared order
    #[must_use]
    pub fn upstreams(&self, name: &str) -> &[String] {
        match self.spec(name) {
            Some(spec) => &spec.after,
            None => &[],
        }
    }

    /// Transitive dependents of a stage, in execution order
    #[must_use]
    pub fn downstream_of(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, NodeIndex::new(start));
        while let Some(node) = dfs.next(&self.graph) {
            if node.index() != start {
                reached.insert(node.index());
            }
        }
        self.order
            .iter()
            .filter(|i| reached.contains(i))
            .map(|&i| self.specs[i].name.as_str())
            .collect()
    }

    /// Stages without upstreams, in execution order
    #[must_use]
    pub fn roots(&self) -> Vec<&str> {
        self.filter_ordered(|i| {
            self.graph
                .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                .next()
                .is_none()
        })
    }

    /// Stages nothing depends on, in execution order
    #[must_use]
    pub fn terminal_stages(&self) -> Vec<&str> {
        self.filter_ordered(|i| {
            self.graph
                .neighbors_directed(NodeIndex::new(i), Direction::Outgoing)
                .next()
                .is_none()
        })
    }

    /// Not-yet-started stages whose upstreams have all succeeded
    #[must_use]
    pub fn ready_stages(&self, state: &RunState) -> Vec<&str> {
        self.ordered_specs()
            .filter(|spec| state.status(&spec.name) == StageStatus::NotStarted)
            .filter(|spec| {
                spec.after
                    .iter()
                    .all(|u| state.status(u) == StageStatus::Succeeded)
            })
            .map(|spec| spec.name.as_str())
            .collect()
    }

    /// Mark a stage failed and every unfinished dependent skipped
    ///
    /// Returns the names of the skipped stages.
    pub fn fail_stage(&self, state: &mut RunState, name: &str) -> Vec<String> {
        state.set(name, StageStatus::Failed);
        let mut skipped = Vec::new();
        for dependent in self.downstream_of(name) {
            if !state.status(dependent).is_terminal() {
                state.set(dependent, StageStatus::Skipped);
                skipped.push(dependent.to_string());
            }
        }
        skipped
    }

    /// Mark every not-started stage cancelled, returning their names
    pub fn cancel_unstarted(&self, state: &mut RunState) -> Vec<String> {
        let mut cancelled = Vec::new();
        for name in self.order() {
            if state.status(name) == StageStatus::NotStarted {
                state.set(name, StageStatus::Cancelled);
                cancelled.push(name.to_string());
            }
        }
        cancelled
    }

    /// Whether every stage reached a terminal status
    #[must_use]
    pub fn is_settled(&self, state: &RunState) -> bool {
        self.specs.iter().all(|s| state.status(&s.name).is_terminal())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    fn filter_ordered(&self, keep: impl Fn(usize) -> bool) -> Vec<&str> {
        self.order
            .iter()
            .copied()
            .filter(|&i| keep(i))
            .map(|i| self.specs[i].name.as_str())
            .collect()
    }
}

/// Kahn's algorithm; ties go to the lowest declaration index
fn kahn_order(graph: &DiGraph<usize, ()>) -> Vec<usize> {
    let mut indegree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut heap: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(indegree.len());
    while let Some(Reverse(i)) = heap.pop() {
        order.push(i);
        for next in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
            let j = next.index();
            indegree[j] -= 1;
            if indegree[j] == 0 {
                heap.push(Reverse(j));
            }
        }
    }
    order
}

/// One cycle through the strongly connected component holding the lowest
/// declaration index, as a closed path `[a, b, .., a]`
fn name_cycle(graph: &DiGraph<usize, ()>) -> Vec<usize> {
    let Some(component) = kosaraju_scc(graph)
        .into_iter()
        .filter(|c| c.len() > 1)
        .min_by_key(|c| c.iter().map(|n| n.index()).min().unwrap_or(usize::MAX))
    else {
        return Vec::new();
    };
    let members: HashSet<usize> = component.iter().map(|n| n.index()).collect();
    let Some(&start) = members.iter().min() else {
        return Vec::new();
    };

    let mut parent: HashMap<usize, usize> = HashMap::new();
    let mut visited = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(u) = queue.pop_front() {
        let mut next: Vec<usize> = graph
            .neighbors_directed(NodeIndex::new(u), Direction::Outgoing)
            .map(|n| n.index())
            .filter(|j| members.contains(j))
            .collect();
        next.sort_unstable();
        for v in next {
            if v == start {
                let mut path = vec![u];
                let mut cur = u;
                while cur != start {
                    match parent.get(&cur) {
                        Some(&p) => {
                            path.push(p);
                            cur = p;
                        }
                        None => break,
                    }
                }
                path.reverse();
                path.push(start);
                return path;
            }
            if visited.insert(v) {
                parent.insert(v, u);
                queue.push_back(v);
            }
        }
    }
    Vec::new()
}
