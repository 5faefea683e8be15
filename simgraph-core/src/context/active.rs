//! Scoped activation.

use std::ops::{Deref, DerefMut};

use crate::backend::Array;
use crate::error::Result;
use crate::graph::{Graph, NodeId};

/// Guard that holds a module in an activation state until dropped.
///
/// Entering an inactive module with `active = true` turns the subtree on;
/// dropping the guard clears every transient value and turns it back off.
/// Driving an already active module inactive stashes its filled values and
/// puts them back on drop, so a nested call cannot leak into the outer one.
pub struct ActiveContext<'g> {
    graph: &'g mut Graph,
    module: NodeId,
    previous: bool,
    state: bool,
    stash: Vec<(NodeId, Option<Array>)>,
}

impl<'g> ActiveContext<'g> {
    /// Activate `module` until the guard is dropped.
    pub fn enter(graph: &'g mut Graph, module: NodeId) -> Result<Self> {
        Self::with_state(graph, module, true)
    }

    /// Put `module` into the given activation state until the guard is dropped.
    pub fn with_state(graph: &'g mut Graph, module: NodeId, active: bool) -> Result<Self> {
        let previous = graph.is_active(module)?;
        let dynamic = graph.module(module)?.dynamic_params.clone();

        let mut stash = Vec::new();
        if previous && !active {
            for param in dynamic {
                stash.push((param, graph.param(param)?.transient.clone()));
            }
            graph.clear_state(module)?;
        }

        tracing::debug!(module = graph.name(module)?, previous, active, "enter active context");
        graph.set_active(module, active)?;
        Ok(Self {
            graph,
            module,
            previous,
            state: active,
            stash,
        })
    }
}

impl Deref for ActiveContext<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &*self.graph
    }
}

impl DerefMut for ActiveContext<'_> {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }
}

impl Drop for ActiveContext<'_> {
    fn drop(&mut self) {
        if self.state && !self.previous {
            if let Err(err) = self.graph.clear_state(self.module) {
                tracing::error!(%err, "failed to clear state on leaving active context");
            }
        }
        if let Err(err) = self.graph.set_active(self.module, self.previous) {
            tracing::error!(%err, "failed to restore activation state");
        }
        for (param, value) in self.stash.drain(..) {
            match self.graph.param_mut(param) {
                Ok(param) => param.transient = value,
                Err(err) => tracing::error!(%err, "failed to restore a stashed value"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Param;

    #[test]
    fn activation_is_scoped() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        let a = graph.add_param_to(root, Param::builder("a")).unwrap();
        {
            let mut ctx = ActiveContext::enter(&mut graph, root).unwrap();
            assert!(ctx.is_active(a).unwrap());
            ctx.fill_params(root, Array::scalar(2.0)).unwrap();
            assert_eq!(ctx.value(a).unwrap(), Array::scalar(2.0));
        }
        assert!(!graph.is_active(root).unwrap());
        assert!(!graph.is_active(a).unwrap());
        assert!(graph.try_value(a).unwrap().is_none());
    }

    #[test]
    fn early_return_still_cleans_up() {
        fn run(graph: &mut Graph, root: NodeId) -> Result<()> {
            let mut ctx = ActiveContext::enter(graph, root)?;
            ctx.fill_params(root, Array::scalar(1.0))?;
            ctx.fill_params(root, Array::zeros(&[5]))?;
            Ok(())
        }

        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        let a = graph.add_param_to(root, Param::builder("a")).unwrap();
        assert!(run(&mut graph, root).is_err());
        assert!(!graph.is_active(root).unwrap());
        assert!(graph.try_value(a).unwrap().is_none());
    }

    #[test]
    fn nested_deactivation_restores_outer_fill() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        let a = graph.add_param_to(root, Param::builder("a")).unwrap();

        let mut outer = ActiveContext::enter(&mut graph, root).unwrap();
        outer.fill_params(root, Array::scalar(1.0)).unwrap();
        {
            let mut off = ActiveContext::with_state(&mut outer, root, false).unwrap();
            assert!(!off.is_active(root).unwrap());
            assert!(off.try_value(a).unwrap().is_none());
            {
                let mut inner = ActiveContext::enter(&mut off, root).unwrap();
                inner.fill_params(root, Array::scalar(5.0)).unwrap();
                assert_eq!(inner.value(a).unwrap(), Array::scalar(5.0));
            }
            assert!(off.try_value(a).unwrap().is_none());
        }
        assert!(outer.is_active(root).unwrap());
        assert_eq!(outer.value(a).unwrap(), Array::scalar(1.0));
        drop(outer);
        assert!(!graph.is_active(root).unwrap());
    }
}
