//! Scoped reparameterization mode.

use std::ops::{Deref, DerefMut};

use crate::error::Result;
use crate::graph::{Graph, NodeId, NodeKind};

/// Guard that switches a module and every module below it into valid
/// context. While on, fills map values through `from_valid` and builds map
/// them through `to_valid`.
pub struct ValidContext<'g> {
    graph: &'g mut Graph,
    previous: Vec<(NodeId, bool)>,
}

impl<'g> ValidContext<'g> {
    pub fn enter(graph: &'g mut Graph, module: NodeId) -> Result<Self> {
        Self::with_state(graph, module, true)
    }

    pub fn with_state(graph: &'g mut Graph, module: NodeId, valid: bool) -> Result<Self> {
        graph.module(module)?;
        let modules = graph.topological_ordering(module, Some(NodeKind::Module))?;
        let mut previous = Vec::with_capacity(modules.len());
        for id in modules {
            let data = graph.module_mut(id)?;
            previous.push((id, data.valid_context));
            data.valid_context = valid;
        }
        Ok(Self { graph, previous })
    }
}

impl Deref for ValidContext<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &*self.graph
    }
}

impl DerefMut for ValidContext<'_> {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }
}

impl Drop for ValidContext<'_> {
    fn drop(&mut self) {
        for (id, valid) in self.previous.drain(..).rev() {
            match self.graph.module_mut(id) {
                Ok(data) => data.valid_context = valid,
                Err(err) => tracing::error!(%err, "failed to restore valid context"),
            }
        }
    }
}
