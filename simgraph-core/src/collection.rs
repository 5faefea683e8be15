//! Node collections.
//!
//! A list or tuple is a node whose children are exactly its elements, each
//! linked under its own name. Lists can be mutated; every mutation unlinks
//! all elements, edits the sequence and links them again in the new order,
//! so the children map always matches the sequence. A mutation that cannot
//! be relinked is rolled back.

use std::ops::Range;

use crate::error::{Error, GraphError, Result};
use crate::graph::{Graph, Node, NodeId, NodeKind, Payload};

impl Graph {
    /// Create a mutable collection holding `items` in order.
    pub fn add_list(&mut self, name: &str, items: impl IntoIterator<Item = NodeId>) -> Result<NodeId> {
        self.add_collection(name, items.into_iter().collect(), NodeKind::List)
    }

    /// Create an immutable collection holding `items` in order.
    pub fn add_tuple(&mut self, name: &str, items: impl IntoIterator<Item = NodeId>) -> Result<NodeId> {
        self.add_collection(name, items.into_iter().collect(), NodeKind::Tuple)
    }

    fn add_collection(&mut self, name: &str, items: Vec<NodeId>, kind: NodeKind) -> Result<NodeId> {
        let payload = match kind {
            NodeKind::Tuple => Payload::Tuple(Vec::new()),
            _ => Payload::List(Vec::new()),
        };
        let id = self.insert(Node::new(name, payload)?);
        if let Err(err) = self.link_items(id, &items) {
            self.remove(id)?;
            return Err(err);
        }
        self.store_items(id, items)?;
        Ok(id)
    }

    /// Elements of a list or tuple.
    pub fn items(&self, id: NodeId) -> Result<&[NodeId]> {
        match &self.node(id)?.payload {
            Payload::List(items) | Payload::Tuple(items) => Ok(items.as_slice()),
            _ => Err(self.kind_error(id, NodeKind::List)),
        }
    }

    pub fn list_push(&mut self, list: NodeId, item: NodeId) -> Result<()> {
        self.mutate_list(list, |items| {
            items.push(item);
            Ok(())
        })
    }

    pub fn list_insert(&mut self, list: NodeId, index: usize, item: NodeId) -> Result<()> {
        self.mutate_list(list, |items| {
            check_index(items, index, items.len() + 1)?;
            items.insert(index, item);
            Ok(())
        })
    }

    pub fn list_extend(
        &mut self,
        list: NodeId,
        new_items: impl IntoIterator<Item = NodeId>,
    ) -> Result<()> {
        let new_items: Vec<NodeId> = new_items.into_iter().collect();
        self.mutate_list(list, |items| {
            items.extend(new_items);
            Ok(())
        })
    }

    pub fn list_clear(&mut self, list: NodeId) -> Result<()> {
        self.mutate_list(list, |items| {
            items.clear();
            Ok(())
        })
    }

    /// Remove and return the element at `index`, or the last one.
    pub fn list_pop(&mut self, list: NodeId, index: Option<usize>) -> Result<NodeId> {
        self.mutate_list(list, |items| {
            let index = index.unwrap_or(items.len().saturating_sub(1));
            check_index(items, index, items.len())?;
            Ok(items.remove(index))
        })
    }

    /// Remove the first occurrence of `item`.
    pub fn list_remove(&mut self, list: NodeId, item: NodeId) -> Result<()> {
        let name = self.name(list)?.to_string();
        let key = self.name(item)?.to_string();
        self.mutate_list(list, |items| match items.iter().position(|id| *id == item) {
            Some(index) => {
                items.remove(index);
                Ok(())
            }
            None => Err(GraphError::MissingChild { parent: name, key }.into()),
        })
    }

    /// Replace the element at `index`, returning the old one.
    pub fn list_set(&mut self, list: NodeId, index: usize, item: NodeId) -> Result<NodeId> {
        self.mutate_list(list, |items| {
            check_index(items, index, items.len())?;
            Ok(std::mem::replace(&mut items[index], item))
        })
    }

    /// Replace a range of elements, returning the removed ones.
    pub fn list_splice(
        &mut self,
        list: NodeId,
        range: Range<usize>,
        replacement: impl IntoIterator<Item = NodeId>,
    ) -> Result<Vec<NodeId>> {
        let replacement: Vec<NodeId> = replacement.into_iter().collect();
        self.mutate_list(list, |items| {
            if range.start > range.end {
                check_index(items, range.start, range.end)?;
            }
            check_index(items, range.end, items.len() + 1)?;
            Ok(items.splice(range, replacement).collect())
        })
    }

    /// New collection of the same kind as `first`, holding both sequences.
    pub fn concat(&mut self, name: &str, first: NodeId, second: NodeId) -> Result<NodeId> {
        let kind = self.kind(first)?;
        let mut items = self.items(first)?.to_vec();
        items.extend_from_slice(self.items(second)?);
        self.add_collection(name, items, kind)
    }

    /// Make every parameter element dynamic.
    pub fn collection_to_dynamic(&mut self, id: NodeId) -> Result<()> {
        for item in self.items(id)?.to_vec() {
            if self.kind(item)? == NodeKind::Param {
                self.to_dynamic(item)?;
            }
        }
        Ok(())
    }

    /// Make every parameter element static.
    pub fn collection_to_static(&mut self, id: NodeId) -> Result<()> {
        for item in self.items(id)?.to_vec() {
            if self.kind(item)? == NodeKind::Param {
                self.to_static(item)?;
            }
        }
        Ok(())
    }

    /// Whether any parameter element is dynamic.
    pub fn collection_is_dynamic(&self, id: NodeId) -> Result<bool> {
        for item in self.items(id)? {
            if self.kind(*item)? == NodeKind::Param && self.param(*item)?.is_dynamic() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn mutate_list<R>(
        &mut self,
        list: NodeId,
        edit: impl FnOnce(&mut Vec<NodeId>) -> Result<R>,
    ) -> Result<R> {
        let node = self.node(list)?;
        let old = match &node.payload {
            Payload::List(items) => items.clone(),
            _ => return Err(self.kind_error(list, NodeKind::List)),
        };
        if node.is_active() {
            return Err(GraphError::Active {
                op: "modify",
                node: node.name().to_string(),
            }
            .into());
        }

        let name = node.name().to_string();
        let mut items = old.clone();
        let out = edit(&mut items).map_err(|err| match err {
            Error::Graph(GraphError::IndexOutOfRange { index, len, .. }) => {
                GraphError::IndexOutOfRange { node: name, index, len }.into()
            }
            other => other,
        })?;

        self.unlink_items(list, &old)?;
        if let Err(err) = self.link_items(list, &items) {
            self.link_items(list, &old)?;
            return Err(err);
        }
        self.store_items(list, items)?;
        tracing::debug!(list = self.name(list)?, len = self.items(list)?.len(), "list modified");
        Ok(out)
    }

    /// Link every element under its name, undoing partial work on failure.
    fn link_items(&mut self, id: NodeId, items: &[NodeId]) -> Result<()> {
        for (done, item) in items.iter().enumerate() {
            if let Err(err) = self.link_by_name(id, *item) {
                self.unlink_items(id, &items[..done])?;
                return Err(err);
            }
        }
        Ok(())
    }

    fn unlink_items(&mut self, id: NodeId, items: &[NodeId]) -> Result<()> {
        for item in items {
            self.unlink_child(id, *item)?;
        }
        Ok(())
    }

    fn store_items(&mut self, id: NodeId, new_items: Vec<NodeId>) -> Result<()> {
        match &mut self.node_mut(id)?.payload {
            Payload::List(items) | Payload::Tuple(items) => *items = new_items,
            _ => return Err(GraphError::UnknownNode(id).into()),
        }
        Ok(())
    }
}

/// The node name is filled in by the caller.
fn check_index(items: &[NodeId], index: usize, bound: usize) -> Result<()> {
    if index >= bound {
        return Err(GraphError::IndexOutOfRange {
            node: String::new(),
            index,
            len: items.len(),
        }
        .into());
    }
    Ok(())
}
