//! Parameter operations on the graph.
//!
//! Every state transition goes through one of the methods here, and each of
//! them finishes with [`Graph::update_graph`] so the owning modules see the
//! new state.

use crate::backend::{self, Array, DType, Shape};
use crate::error::{Error, GraphError, Result};
use crate::graph::{Graph, Node, NodeId, NodeKind, Payload};

use super::{DeclaredShape, Param, ParamBuilder, ParamState, ParamValue, Pointer, ValidRange};

impl Graph {
    /// Create a parameter node from a builder.
    pub fn add_param(&mut self, builder: ParamBuilder) -> Result<NodeId> {
        let ParamBuilder {
            name,
            value,
            dynamic_value,
            shape,
            lower,
            upper,
            cyclic,
            units,
            batched,
        } = builder;

        if value.is_some() && dynamic_value.is_some() {
            return Err(Error::ParamConfiguration(format!(
                "param \"{name}\" cannot take both a value and a dynamic value"
            )));
        }

        let valid = ValidRange::new(lower, upper);
        valid.check(cyclic)?;

        let declared = match shape {
            DeclaredShape::Explicit(shape) => Some(shape),
            DeclaredShape::Unshaped => None,
            // An initial array decides the shape
            DeclaredShape::Default => match (&value, &dynamic_value) {
                (Some(ParamValue::Array(_)), _) | (_, Some(_)) => None,
                _ => Some(Shape::new()),
            },
        };

        let param = Param {
            state: ParamState::Dynamic,
            transient: None,
            shape: declared,
            valid,
            cyclic,
            units,
            batched,
            dtype: None,
        };
        let node = Node::new(&name, Payload::Param(Box::new(param)))?;
        let id = self.insert(node);

        let initial = match (value, dynamic_value) {
            (Some(value), None) => self.set_value(id, value),
            (None, Some(value)) => self.set_dynamic_value(id, Some(value)),
            _ => Ok(()),
        };
        if let Err(err) = initial {
            self.remove(id)?;
            return Err(err);
        }

        tracing::debug!(param = %name, state = self.param(id)?.state.as_str(), "add param");
        Ok(id)
    }

    /// Create a parameter and link it under `parent` by its name.
    pub fn add_param_to(&mut self, parent: NodeId, builder: ParamBuilder) -> Result<NodeId> {
        let id = self.add_param(builder)?;
        if let Err(err) = self.link_by_name(parent, id) {
            self.remove(id)?;
            return Err(err);
        }
        Ok(id)
    }

    pub fn param(&self, id: NodeId) -> Result<&Param> {
        match &self.node(id)?.payload {
            Payload::Param(param) => Ok(&**param),
            _ => Err(self.kind_error(id, NodeKind::Param)),
        }
    }

    pub(crate) fn param_mut(&mut self, id: NodeId) -> Result<&mut Param> {
        if self.kind(id)? != NodeKind::Param {
            return Err(self.kind_error(id, NodeKind::Param));
        }
        match &mut self.node_mut(id)?.payload {
            Payload::Param(param) => Ok(&mut **param),
            _ => Err(GraphError::UnknownNode(id).into()),
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Current value of a parameter, failing when it has none.
    pub fn value(&mut self, id: NodeId) -> Result<Array> {
        match self.try_value(id)? {
            Some(value) => Ok(value),
            None => Err(Error::MissingValue {
                name: self.name(id)?.to_string(),
            }),
        }
    }

    /// Current value of a parameter, `None` for an unfilled dynamic one.
    ///
    /// Pointer resolutions are cached in the transient slot while the
    /// parameter is active.
    pub fn try_value(&mut self, id: NodeId) -> Result<Option<Array>> {
        let active = self.is_active(id)?;
        let param = self.param(id)?;
        if let Some(value) = &param.transient {
            return Ok(Some(value.clone()));
        }
        let pointer = match &param.state {
            ParamState::Dynamic => return Ok(None),
            ParamState::DynamicValue(value) | ParamState::Static(value) => {
                return Ok(Some(value.clone()))
            }
            ParamState::Pointer(pointer) => pointer.clone(),
        };

        let value = self.resolve(id, &pointer)?;
        if active {
            self.param_mut(id)?.transient = value.clone();
        }
        Ok(value)
    }

    fn resolve(&mut self, id: NodeId, pointer: &Pointer) -> Result<Option<Array>> {
        tracing::trace!(param = self.name(id)?, "resolve pointer");
        match pointer {
            Pointer::Link(target) => self.try_value(*target),
            Pointer::Function(resolver) => (resolver.func)(self, id).map(Some),
        }
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Assign a value, a pointer, a resolver or [`ParamValue::Dynamic`].
    ///
    /// While active only dynamic parameters accept values, which are then
    /// held as a per-call injection.
    pub fn set_value(&mut self, id: NodeId, value: impl Into<ParamValue>) -> Result<()> {
        let value = value.into();
        if self.is_active(id)? {
            return self.inject(id, value);
        }

        match value {
            ParamValue::Dynamic => {
                let state = match &self.param(id)?.state {
                    ParamState::Static(value) | ParamState::DynamicValue(value) => {
                        ParamState::DynamicValue(value.clone())
                    }
                    _ => ParamState::Dynamic,
                };
                self.release_pointer(id)?;
                self.param_mut(id)?.state = state;
            }
            ParamValue::Array(array) => {
                let array = self.prepare(id, array)?;
                self.release_pointer(id)?;
                let param = self.param_mut(id)?;
                if param.shape.is_none() {
                    param.shape = Some(Shape::from_slice(array.shape()));
                }
                param.state = ParamState::Static(array);
            }
            ParamValue::Pointer(target) => self.point(id, Pointer::Link(target))?,
            ParamValue::Function(resolver) => self.point(id, Pointer::Function(resolver))?,
        }

        tracing::debug!(param = self.name(id)?, state = self.param(id)?.state.as_str(), "set value");
        self.update_graph(id)
    }

    fn inject(&mut self, id: NodeId, value: ParamValue) -> Result<()> {
        let param = self.param(id)?;
        if !param.is_dynamic() {
            return Err(Error::ActiveState(format!(
                "cannot set the value of {} param \"{}\" while it is active",
                param.state.as_str(),
                self.name(id)?
            )));
        }
        let value = match value {
            ParamValue::Dynamic => None,
            ParamValue::Array(array) => Some(backend::current().as_array(&array, param.dtype)),
            ParamValue::Pointer(_) | ParamValue::Function(_) => {
                return Err(Error::ActiveState(format!(
                    "cannot turn param \"{}\" into a pointer while it is active",
                    self.name(id)?
                )))
            }
        };
        self.param_mut(id)?.transient = value;
        Ok(())
    }

    /// Cache a default for a dynamic parameter, or drop it with `None`.
    pub fn set_dynamic_value(&mut self, id: NodeId, value: Option<Array>) -> Result<()> {
        self.ensure_inactive(id, "set the dynamic value of")?;
        let state = match value {
            Some(array) => {
                let array = self.prepare(id, array)?;
                let param = self.param_mut(id)?;
                if param.shape.is_none() {
                    param.shape = Some(Shape::from_slice(array.shape()));
                }
                ParamState::DynamicValue(array)
            }
            None => ParamState::Dynamic,
        };
        self.release_pointer(id)?;
        self.param_mut(id)?.state = state;
        self.update_graph(id)
    }

    /// Shape-check, cast and range-check a value about to be stored.
    fn prepare(&self, id: NodeId, array: Array) -> Result<Array> {
        let param = self.param(id)?;
        let name = self.name(id)?;
        if !param.accepts(array.shape()) {
            return Err(Error::ParamConfiguration(format!(
                "input shape {:?} does not match param \"{}\" shape {:?}",
                array.shape(),
                name,
                param.shape().unwrap_or_default()
            )));
        }
        let array = backend::current().as_array(&array, param.dtype);
        warn_out_of_range(name, param, &array);
        Ok(array)
    }

    /// Move a parameter into pointer state, restoring the old state on failure.
    fn point(&mut self, id: NodeId, pointer: Pointer) -> Result<()> {
        let links: Vec<(String, NodeId)> = match &pointer {
            Pointer::Link(target) => vec![(self.name(*target)?.to_string(), *target)],
            Pointer::Function(resolver) => resolver.deps.clone(),
        };

        let released = self.release_pointer(id)?;
        let mut linked: Vec<String> = Vec::new();
        for (key, node) in &links {
            if let Err(err) = self.link(id, key, *node) {
                for key in linked.iter().rev() {
                    self.unlink(id, key)?;
                }
                for (key, node) in &released {
                    self.link(id, key, *node)?;
                }
                return Err(err);
            }
            linked.push(key.clone());
        }

        let param = self.param_mut(id)?;
        param.state = ParamState::Pointer(pointer);
        param.shape = None;
        param.transient = None;
        Ok(())
    }

    /// Unlink the nodes a pointer linked, returning them with their keys.
    fn release_pointer(&mut self, id: NodeId) -> Result<Vec<(String, NodeId)>> {
        let owned = self.param(id)?.owned_links();
        let mut released = Vec::new();
        for child in owned {
            let key = match self.node(id)?.key_of(child) {
                Some(key) => key.to_string(),
                None => continue,
            };
            self.unlink(id, &key)?;
            released.push((key, child));
        }
        Ok(released)
    }

    /// Drop a pointer whose target is going away, leaving the param dynamic.
    pub(crate) fn detach_pointer(&mut self, id: NodeId) -> Result<()> {
        self.release_pointer(id)?;
        let param = self.param_mut(id)?;
        param.state = ParamState::Dynamic;
        param.transient = None;
        tracing::warn!(param = self.name(id)?, "pointer target removed, param is now dynamic");
        self.update_graph(id)
    }

    fn ensure_inactive(&self, id: NodeId, op: &str) -> Result<()> {
        if self.is_active(id)? {
            return Err(Error::ActiveState(format!(
                "cannot {op} param \"{}\" while it is active",
                self.name(id)?
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Make a parameter dynamic, keeping its current value as the default.
    ///
    /// A pointer only converts if its resolver evaluates to a value.
    pub fn to_dynamic(&mut self, id: NodeId) -> Result<()> {
        self.ensure_inactive(id, "convert")?;
        let value = match self.param(id)?.state.clone() {
            ParamState::Dynamic | ParamState::DynamicValue(_) => return Ok(()),
            ParamState::Static(value) => value,
            ParamState::Pointer(_) => self.evaluate_pointer(id, "dynamic")?,
        };
        self.set_dynamic_value(id, Some(value))
    }

    /// Freeze a parameter at its current value.
    pub fn to_static(&mut self, id: NodeId) -> Result<()> {
        self.ensure_inactive(id, "convert")?;
        let value = match self.param(id)?.state.clone() {
            ParamState::Static(_) => return Ok(()),
            ParamState::DynamicValue(value) => value,
            ParamState::Dynamic => {
                return Err(Error::ParamType(format!(
                    "dynamic param \"{}\" has no value to make static",
                    self.name(id)?
                )))
            }
            ParamState::Pointer(_) => self.evaluate_pointer(id, "static")?,
        };
        self.release_pointer(id)?;
        let param = self.param_mut(id)?;
        if param.shape.is_none() {
            param.shape = Some(Shape::from_slice(value.shape()));
        }
        param.state = ParamState::Static(value);
        self.update_graph(id)
    }

    fn evaluate_pointer(&mut self, id: NodeId, target: &str) -> Result<Array> {
        match self.try_value(id) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(Error::ParamType(format!(
                "pointer param \"{}\" resolved to no value and cannot become {target}",
                self.name(id)?
            ))),
            Err(err) => Err(Error::ParamType(format!(
                "pointer param \"{}\" could not be resolved to become {target}: {err}",
                self.name(id)?
            ))),
        }
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Declare a new shape, or none. Pointers cannot be shaped.
    pub fn set_shape(&mut self, id: NodeId, shape: Option<&[usize]>) -> Result<()> {
        self.ensure_inactive(id, "reshape")?;
        let param = self.param(id)?;
        if param.is_pointer() {
            return Err(Error::ParamType(format!(
                "cannot set the shape of pointer param \"{}\"",
                self.name(id)?
            )));
        }
        if let (Some(shape), Some(value)) = (shape, param.current()) {
            if !param.fits(value.shape(), shape) {
                return Err(Error::ParamConfiguration(format!(
                    "shape {:?} does not match the value of param \"{}\" with shape {:?}",
                    shape,
                    self.name(id)?,
                    value.shape()
                )));
            }
        }
        self.param_mut(id)?.shape = shape.map(Shape::from_slice);
        self.update_graph(id)
    }

    /// Replace both bounds of the valid range.
    pub fn set_valid(
        &mut self,
        id: NodeId,
        lower: Option<Array>,
        upper: Option<Array>,
    ) -> Result<()> {
        let range = ValidRange::new(lower, upper);
        range.check(self.param(id)?.cyclic)?;
        self.param_mut(id)?.valid = range;

        let param = self.param(id)?;
        if let Some(value) = param.current() {
            warn_out_of_range(self.name(id)?, param, value);
        }
        Ok(())
    }

    pub fn set_cyclic(&mut self, id: NodeId, cyclic: bool) -> Result<()> {
        self.param(id)?.valid.check(cyclic)?;
        self.param_mut(id)?.cyclic = cyclic;
        Ok(())
    }

    pub fn set_units(&mut self, id: NodeId, units: Option<&str>) -> Result<()> {
        self.param_mut(id)?.units = units.map(str::to_string);
        Ok(())
    }

    pub fn set_batched(&mut self, id: NodeId, batched: bool) -> Result<()> {
        self.param_mut(id)?.batched = batched;
        Ok(())
    }

    // ========================================================================
    // Reparameterization & precision
    // ========================================================================

    /// Map a physical value of `id` into its unconstrained representation.
    pub fn param_to_valid(&self, id: NodeId, value: &Array) -> Result<Array> {
        let param = self.reparameterizable(id)?;
        param.valid.to_valid(value, param.cyclic)
    }

    /// Map an unconstrained value of `id` back into its valid range.
    pub fn param_from_valid(&self, id: NodeId, value: &Array) -> Result<Array> {
        let param = self.reparameterizable(id)?;
        param.valid.from_valid(value, param.cyclic)
    }

    fn reparameterizable(&self, id: NodeId) -> Result<&Param> {
        let param = self.param(id)?;
        if param.is_pointer() {
            return Err(Error::ParamType(format!(
                "pointer param \"{}\" cannot be reparameterized",
                self.name(id)?
            )));
        }
        Ok(param)
    }

    /// Cast every array a parameter holds and keep `dtype` for later writes.
    pub fn param_to(&mut self, id: NodeId, dtype: DType) -> Result<()> {
        let backend = backend::current();
        let param = self.param_mut(id)?;
        param.dtype = Some(dtype);
        match &mut param.state {
            ParamState::DynamicValue(value) | ParamState::Static(value) => {
                *value = backend.as_array(value, Some(dtype));
            }
            ParamState::Dynamic | ParamState::Pointer(_) => {}
        }
        if let Some(value) = &mut param.transient {
            *value = backend.as_array(value, Some(dtype));
        }
        for bound in [&mut param.valid.lower, &mut param.valid.upper]
            .into_iter()
            .flatten()
        {
            *bound = backend.as_array(bound, Some(dtype));
        }
        Ok(())
    }

    /// Cast every parameter below `root`.
    pub fn to(&mut self, root: NodeId, dtype: DType) -> Result<()> {
        for id in self.topological_ordering(root, Some(NodeKind::Param))? {
            self.param_to(id, dtype)?;
        }
        Ok(())
    }
}

fn warn_out_of_range(name: &str, param: &Param, value: &Array) {
    if param.valid.is_unbounded() {
        return;
    }
    // Batched values and bounds may not broadcast; skip the check then
    if let Ok(false) = param.valid.contains(value, param.cyclic) {
        tracing::warn!(
            param = name,
            lower = ?param.valid.lower.as_ref().map(Array::data),
            upper = ?param.valid.upper.as_ref().map(Array::data),
            "value is outside the valid range"
        );
    }
}
