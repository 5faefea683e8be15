//! Modules
//!
//! A module is a graph node that aggregates every parameter below it. It
//! keeps cached lists of the dynamic and pointer parameters in its subtree,
//! recomputed whenever the subtree changes, and exposes bulk protocols over
//! them:
//!
//! - [`fill_params`](Graph::fill_params) injects a [`Bundle`] of values
//! - [`build_params_array`](Graph::build_params_array) and friends extract one
//! - [`bundle_to_valid`](Graph::bundle_to_valid) and
//!   [`bundle_from_valid`](Graph::bundle_from_valid) reparameterize one
//!
//! # Activation
//!
//! Filling and clearing require the module to be active. Values filled
//! during an activation live in the parameters' transient slots and are
//! wiped by [`clear_state`](Graph::clear_state) when it ends.

mod bundle;
mod fill;

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, GraphError, Result};
use crate::forward::Kwargs;
use crate::graph::{Graph, Node, NodeId, NodeKind, Payload};

pub use bundle::Bundle;

/// Callback run by [`Graph::clear_state`] after transient values are wiped.
pub type ClearHook = Rc<dyn Fn(&mut Graph, NodeId) -> Result<()>>;

/// Per-module payload stored in the arena.
#[derive(Default)]
pub struct ModuleData {
    pub(crate) dynamic_params: Vec<NodeId>,
    pub(crate) pointer_params: Vec<NodeId>,
    pub(crate) child_dynamic_params: Vec<NodeId>,
    pub(crate) dynamic_modules: Vec<NodeId>,
    pub(crate) valid_context: bool,
    pub(crate) clear_hooks: Vec<ClearHook>,
}

impl ModuleData {
    /// Dynamic parameters of the subtree, in topological order.
    pub fn dynamic_params(&self) -> &[NodeId] {
        &self.dynamic_params
    }

    pub fn pointer_params(&self) -> &[NodeId] {
        &self.pointer_params
    }

    /// Dynamic parameters linked directly under the module.
    pub fn child_dynamic_params(&self) -> &[NodeId] {
        &self.child_dynamic_params
    }

    /// Direct child modules with dynamic parameters of their own.
    pub fn dynamic_modules(&self) -> &[NodeId] {
        &self.dynamic_modules
    }

    pub fn valid_context(&self) -> bool {
        self.valid_context
    }

    pub fn is_dynamic(&self) -> bool {
        !self.dynamic_params.is_empty()
    }
}

impl fmt::Debug for ModuleData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleData")
            .field("dynamic_params", &self.dynamic_params)
            .field("pointer_params", &self.pointer_params)
            .field("child_dynamic_params", &self.child_dynamic_params)
            .field("dynamic_modules", &self.dynamic_modules)
            .field("valid_context", &self.valid_context)
            .field("clear_hooks", &self.clear_hooks.len())
            .finish()
    }
}

impl Graph {
    /// Create an empty module.
    pub fn add_module(&mut self, name: &str) -> Result<NodeId> {
        let node = Node::new(name, Payload::Module(ModuleData::default()))?;
        Ok(self.insert(node))
    }

    /// Create a module and link it under `parent` by its name.
    pub fn add_module_to(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let id = self.add_module(name)?;
        if let Err(err) = self.link_by_name(parent, id) {
            self.remove(id)?;
            return Err(err);
        }
        Ok(id)
    }

    pub fn module(&self, id: NodeId) -> Result<&ModuleData> {
        match &self.node(id)?.payload {
            Payload::Module(module) => Ok(module),
            _ => Err(self.kind_error(id, NodeKind::Module)),
        }
    }

    pub(crate) fn module_mut(&mut self, id: NodeId) -> Result<&mut ModuleData> {
        if self.kind(id)? != NodeKind::Module {
            return Err(self.kind_error(id, NodeKind::Module));
        }
        match &mut self.node_mut(id)?.payload {
            Payload::Module(module) => Ok(module),
            _ => Err(GraphError::UnknownNode(id).into()),
        }
    }

    /// Rebuild the parameter caches of one module from its subtree.
    pub(crate) fn recompute_module(&mut self, id: NodeId) -> Result<()> {
        let mut dynamic_params = Vec::new();
        let mut pointer_params = Vec::new();
        for param in self.topological_ordering(id, Some(NodeKind::Param))? {
            let state = self.param(param)?;
            if state.is_dynamic() {
                dynamic_params.push(param);
            } else if state.is_pointer() {
                pointer_params.push(param);
            }
        }

        let mut child_dynamic_params = Vec::new();
        let mut dynamic_modules = Vec::new();
        for child in self.children(id)?.values() {
            match self.kind(*child)? {
                NodeKind::Param if self.param(*child)?.is_dynamic() => {
                    child_dynamic_params.push(*child)
                }
                NodeKind::Module if self.has_dynamic_params(*child)? => {
                    dynamic_modules.push(*child)
                }
                _ => {}
            }
        }

        let module = self.module_mut(id)?;
        module.dynamic_params = dynamic_params;
        module.pointer_params = pointer_params;
        module.child_dynamic_params = child_dynamic_params;
        module.dynamic_modules = dynamic_modules;
        Ok(())
    }

    fn has_dynamic_params(&self, id: NodeId) -> Result<bool> {
        for param in self.topological_ordering(id, Some(NodeKind::Param))? {
            if self.param(param)?.is_dynamic() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Register a callback to run at the end of every [`clear_state`](Graph::clear_state).
    pub fn on_clear(
        &mut self,
        module: NodeId,
        hook: impl Fn(&mut Graph, NodeId) -> Result<()> + 'static,
    ) -> Result<()> {
        self.module_mut(module)?.clear_hooks.push(Rc::new(hook));
        Ok(())
    }

    /// Wipe the transient values of every dynamic and pointer parameter
    /// below an active module, then run its clear hooks.
    pub fn clear_state(&mut self, module: NodeId) -> Result<()> {
        self.ensure_active(module, "clear the state of")?;
        let data = self.module(module)?;
        let params: Vec<NodeId> = data
            .dynamic_params
            .iter()
            .chain(&data.pointer_params)
            .copied()
            .collect();
        let hooks = data.clear_hooks.clone();

        tracing::debug!(module = self.name(module)?, params = params.len(), "clear state");
        for param in params {
            self.param_mut(param)?.transient = None;
        }
        for hook in hooks {
            hook(self, module)?;
        }
        Ok(())
    }

    /// Resolve the values of the named child parameters.
    pub fn fill_kwargs(&mut self, module: NodeId, keys: &[&str]) -> Result<Kwargs> {
        let mut kwargs = Kwargs::default();
        for key in keys {
            let param = self.child(module, key)?;
            let value = self.try_value(param)?;
            kwargs.insert(key, value);
        }
        Ok(kwargs)
    }

    pub(crate) fn ensure_active(&self, module: NodeId, op: &str) -> Result<()> {
        if !self.is_active(module)? {
            return Err(Error::ActiveState(format!(
                "cannot {op} module \"{}\" while it is inactive",
                self.name(module)?
            )));
        }
        Ok(())
    }
}
