//! Parent/child relations between checked sources

use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Dependency cycle between sources: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("source-id {source_id:?} is declared by both {first} and {second}")]
    DuplicateSourceId {
        source_id: String,
        first: String,
        second: String,
    },

    #[error("{source_name} has unknown parent-id {parent_id:?}")]
    UnknownParent {
        source_name: String,
        parent_id: String,
    },
}

/// What the graph needs to know about one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphNode<'a> {
    pub name: &'a str,
    pub source_id: Option<&'a str>,
    pub parent_id: Option<&'a str>,
}

/// Validated dependency edges, indexed by position in the source list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    parents: Vec<Option<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Resolves `parent-id` references and rejects duplicates, dangling references and cycles
    pub fn build(nodes: &[GraphNode<'_>]) -> Result<Self, GraphError> {
        let mut by_id: HashMap<&str, usize> = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            let Some(source_id) = node.source_id else {
                continue;
            };
            if let Some(&first) = by_id.get(source_id) {
                return Err(GraphError::DuplicateSourceId {
                    source_id: source_id.to_string(),
                    first: nodes[first].name.to_string(),
                    second: node.name.to_string(),
                });
            }
            by_id.insert(source_id, index);
        }

        let parents = nodes
            .iter()
            .map(|node| {
                node.parent_id
                    .map(|parent_id| {
                        by_id.get(parent_id).copied().ok_or_else(|| GraphError::UnknownParent {
                            source_name: node.name.to_string(),
                            parent_id: parent_id.to_string(),
                        })
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let order = topological_order(&parents).map_err(|cycle| {
            GraphError::Cycle(cycle.into_iter().map(|i| nodes[i].name.to_string()).collect())
        })?;
        debug!(
            "Dependency graph: {} source(s), {} edge(s)",
            nodes.len(),
            parents.iter().flatten().count()
        );

        Ok(Self { parents, order })
    }

    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.parents.get(index).copied().flatten()
    }

    /// Breadth-first schedule: roots in manifest order, then their children
    /// level by level, so every parent precedes its children
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Kahn's algorithm over single-parent edges; on failure returns one cycle
fn topological_order(parents: &[Option<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); parents.len()];
    for (child, parent) in parents.iter().enumerate() {
        if let Some(parent) = parent {
            children[*parent].push(child);
        }
    }

    let mut queue: VecDeque<usize> = (0..parents.len()).filter(|&i| parents[i].is_none()).collect();
    let mut order = Vec::with_capacity(parents.len());
    while let Some(index) = queue.pop_front() {
        order.push(index);
        queue.extend(children[index].iter().copied());
    }

    if order.len() == parents.len() {
        return Ok(order);
    }

    // Every unvisited node sits on or below a cycle; walk up until a node repeats
    let visited: Vec<bool> = {
        let mut visited = vec![false; parents.len()];
        for &index in &order {
            visited[index] = true;
        }
        visited
    };
    let start = (0..parents.len()).find(|&i| !visited[i]).unwrap_or(0);
    let mut path = vec![start];
    let mut current = start;
    while let Some(parent) = parents[current] {
        if let Some(position) = path.iter().position(|&i| i == parent) {
            let mut cycle = path.split_off(position);
            cycle.push(parent);
            return Err(cycle);
        }
        path.push(parent);
        current = parent;
    }
    Err(path)
}
