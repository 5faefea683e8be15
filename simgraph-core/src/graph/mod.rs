//! Graph Module
//!
//! This module provides the arena that owns every node, together with the
//! structural operations on it: linking, traversal, activation and change
//! notification.
//!
//! # Architecture
//!
//! Nodes live in a single [`Graph`] and refer to each other by [`NodeId`].
//! Edges are keyed: a parent maps keys to children, and each child keeps a
//! set of back references to its parents. The parent/child relation is kept
//! acyclic, so every traversal from a root terminates.

mod arena;
mod node;

pub use arena::Graph;
pub use node::{Node, NodeId, NodeKind, SEPARATOR};

pub(crate) use node::Payload;
