//! Library dependency graph.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. The tree is
//! rooted at a sentinel; a node's children are the libraries it needs and
//! its ancestors are the contracts that need it. A library needed by two
//! contracts can only sit under one of them, so every "needs" edge is also
//! recorded separately and [`DependencyGraph::get_consumers`] and
//! [`DependencyGraph::deploy_order`] work from those edges.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use keel_core::{KeelError, Result};
use tracing::trace;

use crate::linker::LinkDef;

pub type NodeId = usize;

const ROOT_NAME: &str = "<root>";

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    children: BTreeSet<NodeId>,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
    /// consumer -> libraries it links against
    needs: BTreeMap<String, BTreeSet<String>>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: ROOT_NAME.into(),
                parent: None,
                children: BTreeSet::new(),
            }],
            index: HashMap::new(),
            needs: BTreeMap::new(),
        }
    }

    /// Build a graph from each contract's link definitions.
    pub fn build<'a, I>(contracts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [LinkDef])>,
    {
        let mut graph = Self::new();
        for (name, defs) in contracts {
            let node = graph.ensure(name);
            for def in defs {
                graph.add_dependent(node, &def.library)?;
            }
        }
        graph.deploy_order()?;
        Ok(graph)
    }

    pub fn root(&self) -> NodeId {
        0
    }

    /// Number of named nodes.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id).map(|n| n.name.as_str())
    }

    /// The node for `name`, added under the root if it is new.
    pub fn ensure(&mut self, name: &str) -> NodeId {
        match self.index.get(name) {
            Some(id) => *id,
            None => self.insert(self.root(), name),
        }
    }

    fn insert(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            parent: Some(parent),
            children: BTreeSet::new(),
        });
        self.nodes[parent].children.insert(id);
        self.index.insert(name.to_string(), id);
        id
    }

    /// Record that `parent` needs `name`. An existing `name` node is moved
    /// under `parent` rather than duplicated.
    pub fn add_dependent(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(KeelError::NotFound(format!("graph node {parent}")));
        }
        let id = match self.index.get(name).copied() {
            Some(id) => {
                self.reparent(id, parent)?;
                id
            }
            None => self.insert(parent, name),
        };

        if parent != self.root() {
            self.needs
                .entry(self.nodes[parent].name.clone())
                .or_default()
                .insert(name.to_string());
        }
        Ok(id)
    }

    /// Detach `id` from its parent and attach it under `new_parent`.
    fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> Result<()> {
        if self.is_ancestor_or_self(id, new_parent) {
            return Err(KeelError::Link(format!(
                "dependency cycle: {} is needed by {}",
                self.nodes[new_parent].name, self.nodes[id].name
            )));
        }
        if let Some(old) = self.nodes[id].parent {
            self.nodes[old].children.remove(&id);
        }
        self.nodes[id].parent = Some(new_parent);
        self.nodes[new_parent].children.insert(id);
        trace!(node = %self.nodes[id].name, parent = %self.nodes[new_parent].name, "reparented");
        Ok(())
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.nodes[node].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Node and depth of `name`; depth 0 is a direct child of the root.
    pub fn search(&self, name: &str) -> Option<(NodeId, usize)> {
        let id = *self.index.get(name)?;
        let mut depth = 0;
        let mut current = self.nodes[id].parent;
        while let Some(parent) = current {
            if parent == self.root() {
                break;
            }
            depth += 1;
            current = self.nodes[parent].parent;
        }
        Some((id, depth))
    }

    fn lookup(&self, name: &str) -> Result<NodeId> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| KeelError::NotFound(format!("{name} is not in the dependency graph")))
    }

    /// Everything below `name` in the tree, breadth first.
    pub fn get_dependents(&self, name: &str) -> Result<Vec<String>> {
        let id = self.lookup(name)?;
        let mut out = Vec::new();
        let mut queue: Vec<NodeId> = self.nodes[id].children.iter().copied().collect();
        let mut i = 0;
        while i < queue.len() {
            let current = queue[i];
            out.push(self.nodes[current].name.clone());
            queue.extend(self.nodes[current].children.iter().copied());
            i += 1;
        }
        Ok(out)
    }

    /// Ancestors of `name`, nearest first, excluding the root.
    pub fn get_dependencies(&self, name: &str) -> Result<Vec<String>> {
        let id = self.lookup(name)?;
        let mut out = Vec::new();
        let mut current = self.nodes[id].parent;
        while let Some(parent) = current {
            if parent == self.root() {
                break;
            }
            out.push(self.nodes[parent].name.clone());
            current = self.nodes[parent].parent;
        }
        Ok(out)
    }

    /// Move `name` under `new_parent`. Fails if `name` is absent.
    pub fn move_node(&mut self, name: &str, new_parent: NodeId) -> Result<()> {
        let id = self.lookup(name)?;
        if new_parent >= self.nodes.len() {
            return Err(KeelError::NotFound(format!("graph node {new_parent}")));
        }
        self.reparent(id, new_parent)
    }

    /// Libraries `name` links against directly.
    pub fn requirements(&self, name: &str) -> Vec<String> {
        self.needs
            .get(name)
            .map(|libs| libs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every contract that needs `name`, directly or through other
    /// libraries. Sorted.
    pub fn get_consumers(&self, name: &str) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            for (consumer, libs) in &self.needs {
                if libs.contains(&current) && found.insert(consumer.clone()) {
                    pending.push(consumer.clone());
                }
            }
        }
        found.into_iter().collect()
    }

    /// All names ordered so that every library comes before the contracts
    /// that need it. Ties are broken by name.
    pub fn deploy_order(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .index
            .keys()
            .map(|name| {
                let count = self.needs.get(name).map_or(0, BTreeSet::len);
                (name.as_str(), count)
            })
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();

        while let Some(next) = ready.pop_first() {
            remaining.remove(next);
            order.push(next.to_string());
            for (consumer, libs) in &self.needs {
                if !libs.contains(next) {
                    continue;
                }
                if let Some(count) = remaining.get_mut(consumer.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(consumer.as_str());
                    }
                }
            }
        }

        if !remaining.is_empty() {
            let stuck: Vec<&str> = remaining.keys().copied().collect();
            return Err(KeelError::Link(format!(
                "dependency cycle between: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }
}
