//! Node Arena
//!
//! The [`Graph`] owns every node and is the only way to mutate edges. Links
//! are validated in full before anything is written, so a rejected link
//! leaves the arena exactly as it was.
//!
//! # Change propagation
//!
//! Every structural change calls [`Graph::update_graph`] on the node that
//! changed. The notification bubbles to all ancestors, and each module met
//! on the way recomputes its parameter caches.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::node::{validate_name, Node, NodeId, NodeKind, Payload};
use crate::error::{GraphError, Result};

/// Arena holding every node of one or more trees.
#[derive(Debug, Default)]
pub struct Graph {
    /// All nodes, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Add a plain node with no behavior of its own.
    pub fn add_node(&mut self, name: &str) -> Result<NodeId> {
        let node = Node::new(name, Payload::Plain)?;
        Ok(self.insert(node))
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Get a reference to a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        Ok(self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))?)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        Ok(self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))?)
    }

    pub fn name(&self, id: NodeId) -> Result<&str> {
        Ok(self.node(id)?.name())
    }

    pub fn kind(&self, id: NodeId) -> Result<NodeKind> {
        Ok(self.node(id)?.kind())
    }

    pub fn is_active(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_active())
    }

    pub fn children(&self, id: NodeId) -> Result<&IndexMap<String, NodeId>> {
        Ok(self.node(id)?.children())
    }

    /// Parents of a node, in the order they linked it.
    pub fn parents(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node(id)?.parents().iter().copied().collect())
    }

    /// Look up a direct child by key.
    pub fn child(&self, parent: NodeId, key: &str) -> Result<NodeId> {
        let node = self.node(parent)?;
        node.child(key).ok_or_else(|| {
            GraphError::MissingChild {
                parent: node.name().to_string(),
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Follow a `/`-separated chain of keys starting at `root`.
    pub fn find(&self, root: NodeId, path: &str) -> Result<NodeId> {
        path.split(super::SEPARATOR)
            .filter(|key| !key.is_empty())
            .try_fold(root, |id, key| self.child(id, key))
    }

    pub(crate) fn kind_error(&self, id: NodeId, expected: NodeKind) -> crate::error::Error {
        match self.node(id) {
            Ok(node) => GraphError::WrongKind {
                node: node.name().to_string(),
                expected: expected.as_str(),
                actual: node.kind().as_str(),
            }
            .into(),
            Err(err) => err,
        }
    }

    pub(crate) fn names(&self, ids: impl IntoIterator<Item = NodeId>) -> String {
        ids.into_iter()
            .filter_map(|id| self.nodes.get(&id).map(|node| node.name().to_string()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ========================================================================
    // Linking
    // ========================================================================

    /// Link `child` under `parent` with the given key.
    ///
    /// Rejected, with the graph untouched, when the key is invalid or taken,
    /// when `child` is already linked under another key, when `parent` is
    /// active, or when the link would close a cycle.
    pub fn link(&mut self, parent: NodeId, key: &str, child: NodeId) -> Result<()> {
        validate_name(key)?;
        let parent_node = self.node(parent)?;
        let child_node = self.node(child)?;

        if parent_node.is_active() {
            return Err(GraphError::Active {
                op: "link",
                node: parent_node.name().to_string(),
            }
            .into());
        }
        if parent_node.child(key).is_some() {
            return Err(GraphError::DuplicateKey {
                parent: parent_node.name().to_string(),
                key: key.to_string(),
            }
            .into());
        }
        if let Some(existing) = parent_node.key_of(child) {
            return Err(GraphError::AlreadyLinked {
                parent: parent_node.name().to_string(),
                child: child_node.name().to_string(),
                key: existing.to_string(),
            }
            .into());
        }
        if child == parent || self.is_descendant(child, parent) {
            return Err(GraphError::Cycle {
                parent: parent_node.name().to_string(),
                child: child_node.name().to_string(),
            }
            .into());
        }

        tracing::debug!(
            parent = parent_node.name(),
            child = child_node.name(),
            key,
            "link"
        );
        self.node_mut(parent)?.insert_child(key, child);
        self.node_mut(child)?.insert_parent(parent);
        self.update_graph(parent)
    }

    /// Link `child` under `parent`, keyed by the child's own name.
    pub fn link_by_name(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let key = self.name(child)?.to_string();
        self.link(parent, &key, child)
    }

    /// Remove the child linked under `key`, returning it.
    pub fn unlink(&mut self, parent: NodeId, key: &str) -> Result<NodeId> {
        let parent_node = self.node(parent)?;
        if parent_node.is_active() {
            return Err(GraphError::Active {
                op: "unlink",
                node: parent_node.name().to_string(),
            }
            .into());
        }
        let child = self.child(parent, key)?;

        tracing::debug!(parent = parent_node.name(), key, "unlink");
        self.node_mut(parent)?.remove_child(key);
        self.node_mut(child)?.remove_parent(parent);
        self.update_graph(parent)?;
        Ok(child)
    }

    /// Remove `child` from `parent`, whatever key it is linked under.
    pub fn unlink_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let parent_node = self.node(parent)?;
        let key = match parent_node.key_of(child) {
            Some(key) => key.to_string(),
            None => {
                return Err(GraphError::MissingChild {
                    parent: parent_node.name().to_string(),
                    key: self.name(child)?.to_string(),
                }
                .into())
            }
        };
        self.unlink(parent, &key).map(|_| ())
    }

    /// Whether `target` can be reached from `root` by following children.
    pub fn is_descendant(&self, root: NodeId, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                for child in node.children().values() {
                    if *child == target {
                        return true;
                    }
                    stack.push(*child);
                }
            }
        }
        false
    }

    /// Remove a node from the arena, unlinking it from every neighbor.
    ///
    /// Collections drop it from their items, and pointer params that link it
    /// fall back to dynamic. Rejected, with the graph untouched, while the
    /// node or any of its parents is active.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        let parents: Vec<NodeId> = node.parents().iter().copied().collect();
        let children: Vec<NodeId> = node.children().values().copied().collect();
        for checked in std::iter::once(id).chain(parents.iter().copied()) {
            let checked = self.node(checked)?;
            if checked.is_active() {
                return Err(GraphError::Active {
                    op: "remove",
                    node: checked.name().to_string(),
                }
                .into());
            }
        }

        for parent in parents {
            match self.kind(parent)? {
                NodeKind::Param if self.param(parent)?.owned_links().contains(&id) => {
                    self.detach_pointer(parent)?;
                }
                NodeKind::List | NodeKind::Tuple => {
                    if let Payload::List(items) | Payload::Tuple(items) =
                        &mut self.node_mut(parent)?.payload
                    {
                        items.retain(|item| *item != id);
                    }
                }
                _ => {}
            }
            if self.node(parent)?.key_of(id).is_some() {
                self.unlink_child(parent, id)?;
            }
        }
        for child in children {
            self.node_mut(child)?.remove_parent(id);
        }
        tracing::debug!(node = self.name(id)?, "remove");
        self.nodes.remove(&id);
        Ok(())
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Pre-order walk from `root`: the node itself, then each child in link
    /// order. Shared descendants appear once, at first encounter.
    pub fn topological_ordering(
        &self,
        root: NodeId,
        filter: Option<NodeKind>,
    ) -> Result<Vec<NodeId>> {
        self.node(root)?;
        let mut visited = HashSet::new();
        let mut ordering = Vec::new();
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let node = self.node(id)?;
            if filter.map_or(true, |kind| node.kind() == kind) {
                ordering.push(id);
            }
            // Reverse so the first child is popped first
            for child in node.children().values().rev() {
                if !visited.contains(child) {
                    stack.push(*child);
                }
            }
        }

        Ok(ordering)
    }

    /// Every node above `id`, nearest first, each listed once.
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut visited = HashSet::new();
        let mut ordering = Vec::new();
        let mut queue: VecDeque<NodeId> = self.node(id)?.parents().iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            ordering.push(current);
            queue.extend(self.node(current)?.parents().iter().copied());
        }

        Ok(ordering)
    }

    /// `(name, kind)` of every node below `root`, in topological order.
    pub fn describe(&self, root: NodeId) -> Result<Vec<(String, NodeKind)>> {
        self.topological_ordering(root, None)?
            .into_iter()
            .map(|id| {
                let node = self.node(id)?;
                Ok((node.name().to_string(), node.kind()))
            })
            .collect()
    }

    /// Nested description of the tree: `{name: [kind, {key: ...}]}`.
    pub fn graph_dict(&self, root: NodeId) -> Result<Value> {
        let mut top = Map::new();
        top.insert(self.name(root)?.to_string(), self.dict_entry(root)?);
        Ok(Value::Object(top))
    }

    fn dict_entry(&self, id: NodeId) -> Result<Value> {
        let node = self.node(id)?;
        let mut children = Map::new();
        for (key, child) in node.children() {
            children.insert(key.clone(), self.dict_entry(*child)?);
        }
        Ok(Value::Array(vec![
            Value::String(node.kind().as_str().to_string()),
            Value::Object(children),
        ]))
    }

    // ========================================================================
    // Activation & change propagation
    // ========================================================================

    /// Set the active flag on `id` and its whole subtree.
    ///
    /// A node already carrying the flag stops the descent.
    pub fn set_active(&mut self, id: NodeId, active: bool) -> Result<()> {
        if self.is_active(id)? == active {
            return Ok(());
        }
        tracing::debug!(node = self.name(id)?, active, "set active");

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node_mut(current)?;
            if node.is_active() == active {
                continue;
            }
            node.set_active_flag(active);
            stack.extend(node.children().values().copied());
        }
        Ok(())
    }

    /// Notify `id` and every ancestor that the structure below changed.
    pub fn update_graph(&mut self, id: NodeId) -> Result<()> {
        let mut affected = vec![id];
        affected.extend(self.ancestors(id)?);
        for node in affected {
            if self.kind(node)? == NodeKind::Module {
                self.recompute_module(node)?;
            }
        }
        Ok(())
    }
}
