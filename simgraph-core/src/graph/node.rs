//! Graph Nodes
//!
//! This module defines the node record stored in the [`Graph`](super::Graph)
//! arena. A node only knows its own name, its keyed children and its parents;
//! everything that makes it a parameter, a module or a collection lives in
//! its [`Payload`].

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

use crate::error::GraphError;
use crate::module::ModuleData;
use crate::param::Param;

/// Character reserved for checkpoint paths. It may not appear in names or keys.
pub const SEPARATOR: char = '/';

/// Unique identifier for a node in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// What a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A bare node with no behavior of its own.
    Node,
    /// A parameter holding one resolvable value.
    Param,
    /// A module aggregating the parameters below it.
    Module,
    /// A mutable ordered collection of nodes.
    List,
    /// An immutable ordered collection of nodes.
    Tuple,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Node => "node",
            NodeKind::Param => "param",
            NodeKind::Module => "module",
            NodeKind::List => "list",
            NodeKind::Tuple => "tuple",
        }
    }

    pub(crate) fn parse(kind: &str) -> Option<Self> {
        Some(match kind {
            "node" => NodeKind::Node,
            "param" => NodeKind::Param,
            "module" => NodeKind::Module,
            "list" => NodeKind::List,
            "tuple" => NodeKind::Tuple,
            _ => return None,
        })
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific node state.
#[derive(Debug)]
pub(crate) enum Payload {
    Plain,
    Param(Box<Param>),
    Module(ModuleData),
    List(Vec<NodeId>),
    Tuple(Vec<NodeId>),
}

impl Payload {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Payload::Plain => NodeKind::Node,
            Payload::Param(_) => NodeKind::Param,
            Payload::Module(_) => NodeKind::Module,
            Payload::List(_) => NodeKind::List,
            Payload::Tuple(_) => NodeKind::Tuple,
        }
    }
}

/// A vertex in the graph.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// Immutable display name.
    name: String,

    /// Owning edges, in link order.
    children: IndexMap<String, NodeId>,

    /// Non-owning back references.
    parents: IndexSet<NodeId>,

    /// Whether a computation is in progress on this node.
    active: bool,

    pub(crate) payload: Payload,
}

impl Node {
    pub(crate) fn new(name: &str, payload: Payload) -> Result<Self, GraphError> {
        validate_name(name)?;
        Ok(Self {
            id: NodeId::new(),
            name: name.to_string(),
            children: IndexMap::new(),
            parents: IndexSet::new(),
            active: false,
            payload,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    /// Children keyed by link key, in insertion order.
    pub fn children(&self) -> &IndexMap<String, NodeId> {
        &self.children
    }

    pub fn parents(&self) -> &IndexSet<NodeId> {
        &self.parents
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn child(&self, key: &str) -> Option<NodeId> {
        self.children.get(key).copied()
    }

    /// The key under which `child` is linked, if it is a child.
    pub fn key_of(&self, child: NodeId) -> Option<&str> {
        self.children
            .iter()
            .find(|(_, id)| **id == child)
            .map(|(key, _)| key.as_str())
    }

    pub(crate) fn insert_child(&mut self, key: &str, child: NodeId) {
        self.children.insert(key.to_string(), child);
    }

    /// Remove a child while keeping the order of the others.
    pub(crate) fn remove_child(&mut self, key: &str) -> Option<NodeId> {
        self.children.shift_remove(key)
    }

    pub(crate) fn insert_parent(&mut self, parent: NodeId) {
        self.parents.insert(parent);
    }

    pub(crate) fn remove_parent(&mut self, parent: NodeId) {
        self.parents.shift_remove(&parent);
    }

    pub(crate) fn set_active_flag(&mut self, active: bool) {
        self.active = active;
    }
}

/// Names and keys must be non-empty and free of the separator.
pub(crate) fn validate_name(name: &str) -> Result<(), GraphError> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(GraphError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn new_node_is_empty_and_inactive() {
        let node = Node::new("test", Payload::Plain).unwrap();
        assert_eq!(node.name(), "test");
        assert_eq!(node.kind(), NodeKind::Node);
        assert!(node.children().is_empty());
        assert!(node.parents().is_empty());
        assert!(!node.is_active());
    }

    #[test]
    fn names_reject_separator() {
        assert!(Node::new("a/b", Payload::Plain).is_err());
        assert!(Node::new("", Payload::Plain).is_err());
    }

    #[test]
    fn child_management_keeps_order() {
        let mut node = Node::new("root", Payload::Plain).unwrap();
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        node.insert_child("a", a);
        node.insert_child("b", b);
        node.insert_child("c", c);

        assert_eq!(node.remove_child("b"), Some(b));
        let keys: Vec<_> = node.children().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(node.key_of(c), Some("c"));
        assert_eq!(node.key_of(b), None);
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            NodeKind::Node,
            NodeKind::Param,
            NodeKind::Module,
            NodeKind::List,
            NodeKind::Tuple,
        ] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
    }
}
