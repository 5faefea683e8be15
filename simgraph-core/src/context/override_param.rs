//! Scoped single-parameter overrides.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use crate::backend::{self, Array};
use crate::error::Result;
use crate::graph::{Graph, NodeId, NodeKind};

/// Guard that forces parameter values until dropped.
///
/// The raw transient slot of each overridden parameter is stashed, together
/// with the slot of every pointer parameter that depends on it, directly or
/// through other pointers. Those pointers lose any cached resolution so the
/// forced value is seen on the next read. Dropping the guard puts back
/// exactly what was stashed.
pub struct OverrideParam<'g> {
    graph: &'g mut Graph,
    stash: Vec<(NodeId, Option<Array>)>,
}

impl<'g> OverrideParam<'g> {
    /// Force `value` into `param`.
    pub fn new(graph: &'g mut Graph, param: NodeId, value: impl Into<Array>) -> Result<Self> {
        Self::many(graph, [(param, value.into())])
    }

    /// Force several values at once, restored in reverse order on drop.
    pub fn many(
        graph: &'g mut Graph,
        overrides: impl IntoIterator<Item = (NodeId, Array)>,
    ) -> Result<Self> {
        // Built first so a failure part way still restores what was forced
        let mut guard = Self {
            graph,
            stash: Vec::new(),
        };
        for (param, value) in overrides {
            guard.force(param, value)?;
        }
        Ok(guard)
    }

    fn force(&mut self, param: NodeId, value: Array) -> Result<()> {
        let dependents = self.dependent_pointers(param)?;
        let dtype = self.graph.param(param)?.dtype;

        tracing::debug!(
            param = self.graph.name(param)?,
            dependents = dependents.len(),
            "override param"
        );
        let slot = &mut self.graph.param_mut(param)?.transient;
        let previous = slot.replace(backend::current().as_array(&value, dtype));
        self.stash.push((param, previous));

        for pointer in dependents {
            let previous = self.graph.param_mut(pointer)?.transient.take();
            self.stash.push((pointer, previous));
        }
        Ok(())
    }

    /// Pointer parameters whose value depends on `param`, nearest first.
    fn dependent_pointers(&self, param: NodeId) -> Result<Vec<NodeId>> {
        let mut found = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = self.graph.parents(param)?;
        while let Some(parent) = stack.pop() {
            if !visited.insert(parent) {
                continue;
            }
            if self.graph.kind(parent)? != NodeKind::Param {
                continue;
            }
            if self.graph.param(parent)?.is_pointer() {
                found.push(parent);
                stack.extend(self.graph.parents(parent)?);
            }
        }
        Ok(found)
    }
}

impl Deref for OverrideParam<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &*self.graph
    }
}

impl DerefMut for OverrideParam<'_> {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }
}

impl Drop for OverrideParam<'_> {
    fn drop(&mut self) {
        while let Some((param, value)) = self.stash.pop() {
            match self.graph.param_mut(param) {
                Ok(param) => param.transient = value,
                Err(err) => tracing::error!(%err, "failed to restore an overridden value"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActiveContext;
    use crate::param::{Param, Resolver};

    #[test]
    fn override_reaches_pointer_chain() {
        let mut graph = Graph::new();
        let a = graph.add_param(Param::builder("a").value(3.0)).unwrap();
        let b = graph.add_param(Param::builder("b").value(a)).unwrap();
        let c = graph
            .add_param(Param::builder("c").value(
                Resolver::new(move |graph, _| graph.value(b)?.mul(&Array::scalar(2.0)))
                    .depends_on("b", b),
            ))
            .unwrap();
        {
            let mut guard = OverrideParam::new(&mut graph, a, 1.0).unwrap();
            assert_eq!(guard.value(b).unwrap(), Array::scalar(1.0));
            assert_eq!(guard.value(c).unwrap(), Array::scalar(2.0));
        }
        assert_eq!(graph.value(a).unwrap(), Array::scalar(3.0));
        assert_eq!(graph.value(c).unwrap(), Array::scalar(6.0));
    }

    #[test]
    fn override_invalidates_cached_resolution() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        let a = graph
            .add_param_to(root, Param::builder("a").value(3.0))
            .unwrap();
        let b = graph
            .add_param_to(root, Param::builder("b").value(a))
            .unwrap();

        let mut active = ActiveContext::enter(&mut graph, root).unwrap();
        assert_eq!(active.value(b).unwrap(), Array::scalar(3.0));
        {
            let mut guard = OverrideParam::new(&mut active, a, 1.0).unwrap();
            assert_eq!(guard.value(b).unwrap(), Array::scalar(1.0));
        }
        // The cached resolution from before the override is back
        assert_eq!(active.value(b).unwrap(), Array::scalar(3.0));
    }

    #[test]
    fn failed_override_restores_earlier_ones() {
        let mut graph = Graph::new();
        let a = graph.add_param(Param::builder("a").value(3.0)).unwrap();
        let module = graph.add_module("m").unwrap();
        let result = OverrideParam::many(
            &mut graph,
            [(a, Array::scalar(1.0)), (module, Array::scalar(2.0))],
        );
        assert!(result.is_err());
        drop(result);
        assert_eq!(graph.value(a).unwrap(), Array::scalar(3.0));
    }
}
