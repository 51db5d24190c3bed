//! Resource Graph.
//!
//! Arena of declared resources addressed by id, with explicit edge lists.
//! Edges point from dependent to dependency. The graph is built once per
//! pass and rejected outright if it contains a cycle.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::addr::ResourceId;
use crate::error::CoreError;
use crate::resource::Resource;
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone)]
pub struct ResourceGraph {
    nodes: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    /// `deps[i]`: direct dependencies of node `i`, ascending.
    deps: Vec<Vec<usize>>,
    /// `rdeps[i]`: direct dependents of node `i`, ascending.
    rdeps: Vec<Vec<usize>>,
    /// Dependencies before dependents; ties broken by declaration order.
    order: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl ResourceGraph {
    pub fn build(resources: Vec<Resource>) -> Result<Self, CoreError> {
        let mut index = HashMap::with_capacity(resources.len());
        for (i, resource) in resources.iter().enumerate() {
            if index.insert(resource.id.clone(), i).is_some() {
                return Err(CoreError::DuplicateResource(resource.id.clone()));
            }
        }

        let mut deps = vec![Vec::new(); resources.len()];
        let mut rdeps = vec![Vec::new(); resources.len()];
        for (i, resource) in resources.iter().enumerate() {
            for target in resource.dependencies() {
                let j = *index
                    .get(&target)
                    .ok_or_else(|| CoreError::UnknownReference {
                        resource: resource.id.clone(),
                        target: target.clone(),
                    })?;
                deps[i].push(j);
                rdeps[j].push(i);
            }
        }
        for list in deps.iter_mut().chain(rdeps.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let mut graph = Self {
            nodes: resources,
            index,
            deps,
            rdeps,
            order: Vec::new(),
        };
        graph.check_acyclic()?;
        graph.order = graph.kahn_order();

        tracing::debug!(resources = graph.nodes.len(), "resource graph built");
        Ok(graph)
    }

    /// Validate every declared resource against the schema registry.
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<(), CoreError> {
        self.nodes.iter().try_for_each(|r| r.validate(registry))
    }

    fn check_acyclic(&self) -> Result<(), CoreError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];

        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            // (node, index of the next edge to follow)
            let mut stack = vec![(start, 0usize)];
            marks[start] = Mark::InProgress;

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if frame.1 < self.deps[node].len() {
                    let next = self.deps[node][frame.1];
                    frame.1 += 1;
                    match marks[next] {
                        Mark::InProgress => {
                            let pos = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                            let mut cycle: Vec<ResourceId> = stack[pos..]
                                .iter()
                                .map(|(n, _)| self.nodes[*n].id.clone())
                                .collect();
                            cycle.push(self.nodes[next].id.clone());
                            return Err(CoreError::Cycle { cycle });
                        }
                        Mark::Unvisited => {
                            marks[next] = Mark::InProgress;
                            stack.push((next, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }

        Ok(())
    }

    fn kahn_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &self.rdeps[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.nodes.iter()
    }

    /// Every resource id, each dependency before its dependents.
    pub fn topological_order(&self) -> Vec<&ResourceId> {
        self.order.iter().map(|&i| &self.nodes[i].id).collect()
    }

    /// Direct dependencies of `id`.
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.index
            .get(id)
            .map(|&i| self.deps[i].iter().map(|&j| &self.nodes[j].id).collect())
            .unwrap_or_default()
    }

    /// Resources that depend on `id` directly.
    pub fn direct_dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.index
            .get(id)
            .map(|&i| self.rdeps[i].iter().map(|&j| &self.nodes[j].id).collect())
            .unwrap_or_default()
    }

    /// Direct and transitive dependents of `id`, in topological order.
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };

        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &dependent in &self.rdeps[node] {
                if !seen[dependent] {
                    seen[dependent] = true;
                    queue.push_back(dependent);
                }
            }
        }

        self.order
            .iter()
            .filter(|&&i| seen[i])
            .map(|&i| &self.nodes[i].id)
            .collect()
    }
}
