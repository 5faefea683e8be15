//! Fill, build and reparameterize bundles against a module's dynamic params.

use indexmap::IndexMap;

use super::Bundle;
use crate::backend::{self, numel, Array, Shape};
use crate::error::{Error, FillError, Result};
use crate::graph::{Graph, NodeId, NodeKind};

/// A flat array cut into one piece per dynamic parameter.
struct Split {
    batch: Vec<usize>,
    parts: Vec<(NodeId, Array, usize)>,
}

type Reparam = fn(&Graph, NodeId, &Array) -> Result<Array>;

impl Graph {
    /// Inject a bundle of values into the dynamic params of an active module.
    ///
    /// With the module's valid context on, every value is mapped through
    /// [`param_from_valid`](Graph::param_from_valid) first. Values only live
    /// in the transient slot, so they are gone once the module is cleared,
    /// even for params in a branch that was switched off in the meantime.
    pub fn fill_params(&mut self, module: NodeId, params: impl Into<Bundle>) -> Result<()> {
        self.ensure_active(module, "fill the params of")?;
        let params = params.into();
        tracing::debug!(
            module = self.name(module)?,
            dynamic = self.module(module)?.dynamic_params.len(),
            "fill params"
        );

        self.fill_bundle(module, &params)?;
        if let Bundle::Map(_) = params {
            self.check_filled(module)?;
        }
        Ok(())
    }

    fn fill_bundle(&mut self, module: NodeId, bundle: &Bundle) -> Result<()> {
        match bundle {
            Bundle::Array(array) => {
                let split = self.split_array(module, array)?;
                for (param, value, _) in split.parts {
                    self.fill_value(module, param, value)?;
                }
            }
            Bundle::List(list) => {
                let params = self.sized_params(module, list.len())?;
                for (param, value) in params.into_iter().zip(list) {
                    self.fill_value(module, param, value.clone())?;
                }
            }
            Bundle::Map(entries) => self.fill_entries(module, module, entries)?,
        }
        Ok(())
    }

    /// Fill the children of `owner` named by `entries`. `owner` is `module`
    /// itself or a list or tuple somewhere below it.
    fn fill_entries(
        &mut self,
        module: NodeId,
        owner: NodeId,
        entries: &IndexMap<String, Bundle>,
    ) -> Result<()> {
        for (key, entry) in entries {
            let child = self.map_child(owner, key)?;
            match (self.kind(child)?, entry) {
                (NodeKind::Param, Bundle::Array(value)) => {
                    self.fill_value(module, child, value.clone())?
                }
                (NodeKind::Param, _) => {
                    return Err(FillError::NotAnArray {
                        module: self.name(owner)?.to_string(),
                        key: key.clone(),
                    }
                    .into())
                }
                (NodeKind::Module, entry) => self.fill_bundle(child, entry)?,
                (NodeKind::List | NodeKind::Tuple, Bundle::Map(inner)) => {
                    self.fill_entries(module, child, inner)?
                }
                (NodeKind::List | NodeKind::Tuple, Bundle::List(list)) => {
                    let params = self.dynamic_items(child, list.len())?;
                    for (param, value) in params.into_iter().zip(list) {
                        self.fill_value(module, param, value.clone())?;
                    }
                }
                (kind, entry) => {
                    return Err(FillError::Unsupported {
                        module: self.name(owner)?.to_string(),
                        key: key.clone(),
                        kind: kind.as_str(),
                        form: entry.form(),
                    }
                    .into())
                }
            }
        }
        Ok(())
    }

    /// Store a fill in the transient slot. The stored state is never touched,
    /// so a param in an inactive branch stays dynamic.
    fn fill_value(&mut self, module: NodeId, param: NodeId, value: Array) -> Result<()> {
        if !self.param(param)?.is_dynamic() {
            return Err(Error::ActiveState(format!(
                "param \"{}\" of \"{}\" is {} and cannot be filled",
                self.name(param)?,
                self.name(module)?,
                self.param(param)?.state.as_str()
            )));
        }
        let value = if self.module(module)?.valid_context {
            self.param_from_valid(param, &value)?
        } else {
            value
        };
        let dtype = self.param(param)?.dtype;
        self.param_mut(param)?.transient = Some(backend::current().as_array(&value, dtype));
        Ok(())
    }

    fn check_filled(&self, module: NodeId) -> Result<()> {
        let data = self.module(module)?;
        for param in &data.dynamic_params {
            if self.param(*param)?.current().is_none() {
                return Err(FillError::Unfilled {
                    module: self.name(module)?.to_string(),
                    param: self.name(*param)?.to_string(),
                    parents: self.names(self.parents(*param)?),
                    children: self.names(data.child_dynamic_params.iter().copied()),
                }
                .into());
            }
        }
        Ok(())
    }

    // ========================================================================
    // Extraction
    // ========================================================================

    /// Current value of every dynamic param, in cache order.
    pub fn build_params_list(&self, module: NodeId) -> Result<Vec<Array>> {
        let data = self.module(module)?;
        data.dynamic_params
            .iter()
            .map(|param| self.build_value(module, *param, data.valid_context))
            .collect()
    }

    /// Every dynamic value flattened and concatenated along the last axis.
    ///
    /// All values must share one batch prefix.
    pub fn build_params_array(&self, module: NodeId) -> Result<Array> {
        let params = self.module(module)?.dynamic_params.clone();
        let shapes = self.declared_shapes(module, &params)?;
        let values = self.build_params_list(module)?;

        let mut batch: Option<Vec<usize>> = None;
        let mut flat = Vec::with_capacity(values.len());
        for ((param, shape), value) in params.iter().zip(&shapes).zip(values) {
            let prefix = match batch_prefix(&value, shape) {
                Some(prefix) => prefix,
                None => {
                    return Err(FillError::Shape {
                        module: self.name(module)?.to_string(),
                        param: self.name(*param)?.to_string(),
                        shape: value.shape().to_vec(),
                        expected: shape.to_vec(),
                    }
                    .into())
                }
            };
            match &batch {
                None => batch = Some(prefix.clone()),
                Some(first) if *first != prefix => {
                    return Err(FillError::BatchMismatch {
                        module: self.name(module)?.to_string(),
                        param: self.name(*param)?.to_string(),
                        first: first.clone(),
                        other: prefix,
                    }
                    .into())
                }
                Some(_) => {}
            }
            let mut target = prefix;
            target.push(numel(shape).max(1));
            flat.push(value.reshape(&target)?);
        }

        if flat.is_empty() {
            return Ok(Array::vector(Vec::new()));
        }
        backend::current().concatenate(&flat)
    }

    /// Current dynamic values keyed like the module's children.
    ///
    /// Lists and tuples holding dynamic params nest as mappings keyed by
    /// element name.
    pub fn build_params_dict(&self, module: NodeId) -> Result<Bundle> {
        let valid_context = self.module(module)?.valid_context;
        self.build_entries(module, module, valid_context)
    }

    fn build_entries(&self, module: NodeId, owner: NodeId, valid_context: bool) -> Result<Bundle> {
        let mut entries = IndexMap::new();
        for (key, child) in self.children(owner)? {
            let entry = match self.kind(*child)? {
                NodeKind::Param if self.param(*child)?.is_dynamic() => {
                    Bundle::Array(self.build_value(module, *child, valid_context)?)
                }
                NodeKind::Module if self.has_dynamic_params(*child)? => {
                    self.build_params_dict(*child)?
                }
                NodeKind::List | NodeKind::Tuple if self.has_dynamic_params(*child)? => {
                    self.build_entries(module, *child, valid_context)?
                }
                _ => continue,
            };
            entries.insert(key.clone(), entry);
        }
        Ok(Bundle::Map(entries))
    }

    fn build_value(&self, module: NodeId, param: NodeId, valid_context: bool) -> Result<Array> {
        let value = match self.param(param)?.current() {
            Some(value) => value.clone(),
            None => {
                return Err(FillError::MissingValue {
                    module: self.name(module)?.to_string(),
                    param: self.name(param)?.to_string(),
                }
                .into())
            }
        };
        if valid_context {
            self.param_to_valid(param, &value)
        } else {
            Ok(value)
        }
    }

    // ========================================================================
    // Reparameterization
    // ========================================================================

    /// Map a bundle of physical values into the unconstrained representation.
    pub fn bundle_to_valid(&self, module: NodeId, bundle: &Bundle) -> Result<Bundle> {
        self.reparameterize(module, bundle, Graph::param_to_valid)
    }

    /// Map a bundle of unconstrained values back into the valid ranges.
    pub fn bundle_from_valid(&self, module: NodeId, bundle: &Bundle) -> Result<Bundle> {
        self.reparameterize(module, bundle, Graph::param_from_valid)
    }

    fn reparameterize(&self, module: NodeId, bundle: &Bundle, f: Reparam) -> Result<Bundle> {
        match bundle {
            Bundle::Array(array) => {
                let split = self.split_array(module, array)?;
                let mut flat = Vec::with_capacity(split.parts.len());
                for (param, value, size) in &split.parts {
                    let mut target = split.batch.clone();
                    target.push(*size);
                    flat.push(f(self, *param, value)?.reshape(&target)?);
                }
                if flat.is_empty() {
                    return Ok(Bundle::Array(array.clone()));
                }
                let joined = backend::current().concatenate(&flat)?;
                // Keep a rank-0 input rank-0
                Ok(Bundle::Array(joined.reshape(array.shape())?))
            }
            Bundle::List(list) => {
                let params = self.sized_params(module, list.len())?;
                self.reparameterize_list(&params, list, f)
            }
            Bundle::Map(entries) => self.reparameterize_entries(module, entries, f),
        }
    }

    fn reparameterize_list(&self, params: &[NodeId], list: &[Array], f: Reparam) -> Result<Bundle> {
        let mapped = params
            .iter()
            .zip(list)
            .map(|(param, value)| f(self, *param, value))
            .collect::<Result<_>>()?;
        Ok(Bundle::List(mapped))
    }

    fn reparameterize_entries(
        &self,
        owner: NodeId,
        entries: &IndexMap<String, Bundle>,
        f: Reparam,
    ) -> Result<Bundle> {
        let mut mapped = IndexMap::new();
        for (key, entry) in entries {
            let child = self.map_child(owner, key)?;
            let value = match (self.kind(child)?, entry) {
                (NodeKind::Param, Bundle::Array(value)) => Bundle::Array(f(self, child, value)?),
                (NodeKind::Param, _) => {
                    return Err(FillError::NotAnArray {
                        module: self.name(owner)?.to_string(),
                        key: key.clone(),
                    }
                    .into())
                }
                (NodeKind::Module, entry) => self.reparameterize(child, entry, f)?,
                (NodeKind::List | NodeKind::Tuple, Bundle::Map(inner)) => {
                    self.reparameterize_entries(child, inner, f)?
                }
                (NodeKind::List | NodeKind::Tuple, Bundle::List(list)) => {
                    let params = self.dynamic_items(child, list.len())?;
                    self.reparameterize_list(&params, list, f)?
                }
                (kind, entry) => {
                    return Err(FillError::Unsupported {
                        module: self.name(owner)?.to_string(),
                        key: key.clone(),
                        kind: kind.as_str(),
                        form: entry.form(),
                    }
                    .into())
                }
            };
            mapped.insert(key.clone(), value);
        }
        Ok(Bundle::Map(mapped))
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    fn declared_shapes(&self, module: NodeId, params: &[NodeId]) -> Result<Vec<Shape>> {
        params
            .iter()
            .map(|param| match self.param(*param)?.shape() {
                Some(shape) => Ok(Shape::from_slice(shape)),
                None => Err(Error::ParamConfiguration(format!(
                    "dynamic param \"{}\" of \"{}\" has no shape, so a flat array cannot be split",
                    self.name(*param)?,
                    self.name(module)?
                ))),
            })
            .collect()
    }

    fn split_array(&self, module: NodeId, array: &Array) -> Result<Split> {
        let params = self.module(module)?.dynamic_params.clone();
        let shapes = self.declared_shapes(module, &params)?;
        let sizes: Vec<usize> = shapes.iter().map(|shape| numel(shape).max(1)).collect();
        let expected: usize = sizes.iter().sum();

        let array = if array.ndim() == 0 {
            array.reshape(&[1])?
        } else {
            array.clone()
        };
        let (batch, last) = match array.shape().split_last() {
            Some((last, batch)) => (batch.to_vec(), *last),
            None => (Vec::new(), 1),
        };
        if last != expected {
            return Err(FillError::Array {
                module: self.name(module)?.to_string(),
                input: array.shape().to_vec(),
                expected,
                registered: self.registered_shapes(&params, &shapes)?,
            }
            .into());
        }

        let mut parts = Vec::with_capacity(params.len());
        let mut pos = 0;
        for ((param, shape), size) in params.into_iter().zip(&shapes).zip(sizes) {
            let mut target = batch.clone();
            target.extend_from_slice(shape);
            let value = array.slice_last(pos, size)?.reshape(&target)?;
            parts.push((param, value, size));
            pos += size;
        }
        Ok(Split { batch, parts })
    }

    fn sized_params(&self, module: NodeId, got: usize) -> Result<Vec<NodeId>> {
        let params = self.module(module)?.dynamic_params.clone();
        self.check_sequence(module, params, got)
    }

    /// Dynamic param elements of a list or tuple, in order.
    fn dynamic_items(&self, collection: NodeId, got: usize) -> Result<Vec<NodeId>> {
        let mut params = Vec::new();
        for item in self.items(collection)? {
            if self.kind(*item)? == NodeKind::Param && self.param(*item)?.is_dynamic() {
                params.push(*item);
            }
        }
        self.check_sequence(collection, params, got)
    }

    fn check_sequence(&self, owner: NodeId, params: Vec<NodeId>, got: usize) -> Result<Vec<NodeId>> {
        if params.len() != got {
            return Err(FillError::Sequence {
                module: self.name(owner)?.to_string(),
                got,
                expected: params.len(),
                registered: self.names(params),
            }
            .into());
        }
        Ok(params)
    }

    fn map_child(&self, owner: NodeId, key: &str) -> Result<NodeId> {
        let node = self.node(owner)?;
        if let Some(child) = node.child(key) {
            return Ok(child);
        }
        let modules = match node.kind() {
            NodeKind::Module => self.names(self.module(owner)?.dynamic_modules.iter().copied()),
            _ => String::new(),
        };
        Err(FillError::UnknownKey {
            module: node.name().to_string(),
            key: key.to_string(),
            children: node.children().keys().cloned().collect::<Vec<_>>().join(", "),
            modules,
        }
        .into())
    }

    fn registered_shapes(&self, params: &[NodeId], shapes: &[Shape]) -> Result<String> {
        let mut registered = Vec::with_capacity(params.len());
        for (param, shape) in params.iter().zip(shapes) {
            registered.push(format!("{}: {:?}", self.name(*param)?, shape.as_slice()));
        }
        Ok(registered.join(", "))
    }
}

/// Leading dimensions of `value` in front of `shape`, if it ends with it.
fn batch_prefix(value: &Array, shape: &[usize]) -> Option<Vec<usize>> {
    let dims = value.shape();
    let split = dims.len().checked_sub(shape.len())?;
    (&dims[split..] == shape).then(|| dims[..split].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActiveContext;
    use crate::param::Param;

    /// Module `root` with dynamic `a` (shape [2]) and `b` (scalar), and
    /// sub-module `sub` holding dynamic `c` (shape [2, 2]).
    fn model(graph: &mut Graph) -> (NodeId, NodeId, NodeId, NodeId) {
        let root = graph.add_module("root").unwrap();
        let a = graph
            .add_param_to(root, Param::builder("a").shape(&[2]))
            .unwrap();
        let b = graph.add_param_to(root, Param::builder("b")).unwrap();
        let sub = graph.add_module_to(root, "sub").unwrap();
        let c = graph
            .add_param_to(sub, Param::builder("c").shape(&[2, 2]))
            .unwrap();
        (root, a, b, c)
    }

    #[test]
    fn fill_requires_active() {
        let mut graph = Graph::new();
        let (root, ..) = model(&mut graph);
        let err = graph.fill_params(root, Array::zeros(&[7])).unwrap_err();
        assert!(matches!(err, Error::ActiveState(_)));
    }

    #[test]
    fn flat_array_fills_in_order() {
        let mut graph = Graph::new();
        let (root, a, b, c) = model(&mut graph);
        graph.set_active(root, true).unwrap();
        graph
            .fill_params(root, Array::linspace(0.0, 6.0, 7))
            .unwrap();
        assert_eq!(graph.value(a).unwrap(), Array::vector(vec![0.0, 1.0]));
        assert_eq!(graph.value(b).unwrap(), Array::scalar(2.0));
        assert_eq!(
            graph.value(c).unwrap(),
            Array::new(vec![3.0, 4.0, 5.0, 6.0], &[2, 2]).unwrap()
        );
        assert_eq!(
            graph.build_params_array(root).unwrap(),
            Array::linspace(0.0, 6.0, 7)
        );
    }

    #[test]
    fn batched_array_keeps_prefix() {
        let mut graph = Graph::new();
        let (root, a, ..) = model(&mut graph);
        graph.set_active(root, true).unwrap();
        let input = Array::new((0..21).map(f64::from).collect(), &[3, 7]).unwrap();
        graph.fill_params(root, input.clone()).unwrap();
        assert_eq!(graph.value(a).unwrap().shape(), &[3, 2]);
        assert_eq!(graph.build_params_array(root).unwrap(), input);
    }

    #[test]
    fn wrong_array_length_reports_registered_params() {
        let mut graph = Graph::new();
        let (root, ..) = model(&mut graph);
        graph.set_active(root, true).unwrap();
        let err = graph.fill_params(root, Array::zeros(&[6])).unwrap_err();
        match err {
            Error::Fill(FillError::Array {
                expected,
                registered,
                ..
            }) => {
                assert_eq!(expected, 7);
                assert!(registered.contains("c: [2, 2]"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn list_fill_checks_length() {
        let mut graph = Graph::new();
        let (root, _, b, _) = model(&mut graph);
        graph.set_active(root, true).unwrap();
        assert!(matches!(
            graph.fill_params(root, vec![Array::scalar(1.0)]),
            Err(Error::Fill(FillError::Sequence { got: 1, expected: 3, .. }))
        ));
        graph
            .fill_params(
                root,
                vec![Array::zeros(&[2]), Array::scalar(1.0), Array::ones(&[2, 2])],
            )
            .unwrap();
        assert_eq!(graph.value(b).unwrap(), Array::scalar(1.0));
        assert_eq!(graph.build_params_list(root).unwrap().len(), 3);
    }

    #[test]
    fn mapping_fill_recurses_and_checks_coverage() {
        let mut graph = Graph::new();
        let (root, _, _, c) = model(&mut graph);
        graph.set_active(root, true).unwrap();

        let partial = Bundle::map().with("a", Array::zeros(&[2])).with("b", 1.0);
        let err = graph.fill_params(root, partial).unwrap_err();
        assert!(matches!(err, Error::Fill(FillError::Unfilled { ref param, .. }) if param == "c"));

        let full = Bundle::map()
            .with("a", Array::zeros(&[2]))
            .with("b", 1.0)
            .with("sub", Bundle::map().with("c", Array::ones(&[2, 2])));
        graph.fill_params(root, full.clone()).unwrap();
        assert_eq!(graph.value(c).unwrap(), Array::ones(&[2, 2]));
        assert!(graph.build_params_dict(root).unwrap().allclose(&full, 1e-12));
    }

    #[test]
    fn mapping_fill_rejects_unknown_key() {
        let mut graph = Graph::new();
        let (root, ..) = model(&mut graph);
        graph.set_active(root, true).unwrap();
        let err = graph
            .fill_params(root, Bundle::map().with("zz", 1.0))
            .unwrap_err();
        match err {
            Error::Fill(FillError::UnknownKey { key, children, .. }) => {
                assert_eq!(key, "zz");
                assert_eq!(children, "a, b, sub");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn mapping_fill_rejects_static_param() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        graph
            .add_param_to(root, Param::builder("s").value(1.0))
            .unwrap();
        graph.set_active(root, true).unwrap();
        let err = graph
            .fill_params(root, Bundle::map().with("s", 2.0))
            .unwrap_err();
        assert!(matches!(err, Error::ActiveState(_)));
    }

    #[test]
    fn build_without_values_fails() {
        let mut graph = Graph::new();
        let (root, ..) = model(&mut graph);
        assert!(matches!(
            graph.build_params_array(root),
            Err(Error::Fill(FillError::MissingValue { .. }))
        ));
    }

    #[test]
    fn build_rejects_mixed_batches() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        let x = graph.add_param_to(root, Param::builder("x")).unwrap();
        graph.add_param_to(root, Param::builder("y")).unwrap();
        graph.set_active(root, true).unwrap();
        graph
            .fill_params(root, vec![Array::vector(vec![1.0, 2.0]), Array::scalar(3.0)])
            .unwrap();
        assert_eq!(graph.value(x).unwrap().shape(), &[2]);
        assert!(matches!(
            graph.build_params_array(root),
            Err(Error::Fill(FillError::BatchMismatch { .. }))
        ));
    }

    #[test]
    fn unshaped_dynamic_param_cannot_take_array() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        graph
            .add_param_to(root, Param::builder("u").unshaped())
            .unwrap();
        graph.set_active(root, true).unwrap();
        assert!(matches!(
            graph.fill_params(root, Array::zeros(&[1])),
            Err(Error::ParamConfiguration(_))
        ));
    }

    #[test]
    fn valid_round_trip_for_every_layout() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        graph
            .add_param_to(root, Param::builder("p").shape(&[2]).valid(0.0, 1.0))
            .unwrap();
        graph
            .add_param_to(root, Param::builder("q").lower(1.0))
            .unwrap();
        let sub = graph.add_module_to(root, "sub").unwrap();
        graph
            .add_param_to(sub, Param::builder("r").upper(0.0))
            .unwrap();

        let array = Array::new(
            vec![0.2, 0.7, 4.0, -1.0, 0.5, 0.1, 2.0, -3.0],
            &[2, 4],
        )
        .unwrap();
        let list = Bundle::List(vec![
            Array::vector(vec![0.2, 0.7]),
            Array::scalar(4.0),
            Array::scalar(-1.0),
        ]);
        let map = Bundle::map()
            .with("p", Array::vector(vec![0.3, 0.9]))
            .with("q", 2.5)
            .with("sub", Bundle::map().with("r", -0.5));

        for bundle in [Bundle::Array(array), list, map] {
            let there = graph.bundle_to_valid(root, &bundle).unwrap();
            let back = graph.bundle_from_valid(root, &there).unwrap();
            assert!(back.allclose(&bundle, 1e-9), "{back:?} != {bundle:?}");
        }
    }

    #[test]
    fn fill_into_switched_off_branch_stays_transient() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        let sub = graph.add_module_to(root, "sub").unwrap();
        let x = graph.add_param_to(sub, Param::builder("x")).unwrap();
        {
            let mut active = ActiveContext::enter(&mut graph, root).unwrap();
            let mut off = ActiveContext::with_state(&mut active, sub, false).unwrap();
            off.fill_params(root, Array::vector(vec![4.0])).unwrap();
            assert!(off.param(x).unwrap().is_dynamic());
        }
        assert!(graph.param(x).unwrap().is_dynamic());
        assert!(graph.try_value(x).unwrap().is_none());
        assert_eq!(graph.module(root).unwrap().dynamic_params(), &[x]);
    }

    #[test]
    fn build_reports_value_not_matching_declared_shape() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        graph
            .add_param_to(root, Param::builder("v").shape(&[2]))
            .unwrap();
        graph.set_active(root, true).unwrap();
        graph.fill_params(root, vec![Array::zeros(&[3])]).unwrap();
        match graph.build_params_array(root).unwrap_err() {
            Error::Fill(FillError::Shape {
                param,
                shape,
                expected,
                ..
            }) => {
                assert_eq!(param, "v");
                assert_eq!(shape, vec![3]);
                assert_eq!(expected, vec![2]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    /// Module `root` holding list `bodies` of dynamic `x` (scalar, in [0, 1])
    /// and `y` (shape [2]), plus static `z`.
    fn collection_model(graph: &mut Graph) -> (NodeId, NodeId, NodeId) {
        let root = graph.add_module("root").unwrap();
        let x = graph.add_param(Param::builder("x").valid(0.0, 1.0)).unwrap();
        let y = graph.add_param(Param::builder("y").shape(&[2])).unwrap();
        let z = graph.add_param(Param::builder("z").value(3.0)).unwrap();
        let bodies = graph.add_list("bodies", [x, y, z]).unwrap();
        graph.link_by_name(root, bodies).unwrap();
        (root, x, y)
    }

    #[test]
    fn mapping_fill_reaches_collection_elements() {
        let mut graph = Graph::new();
        let (root, x, y) = collection_model(&mut graph);
        graph.set_active(root, true).unwrap();

        let keyed = Bundle::map().with(
            "bodies",
            Bundle::map()
                .with("x", 0.25)
                .with("y", Array::vector(vec![1.0, 2.0])),
        );
        graph.fill_params(root, keyed.clone()).unwrap();
        assert_eq!(graph.value(x).unwrap(), Array::scalar(0.25));
        assert!(graph.build_params_dict(root).unwrap().allclose(&keyed, 1e-12));

        let ordered = Bundle::map().with(
            "bodies",
            Bundle::List(vec![Array::scalar(0.5), Array::vector(vec![3.0, 4.0])]),
        );
        graph.fill_params(root, ordered).unwrap();
        assert_eq!(graph.value(y).unwrap(), Array::vector(vec![3.0, 4.0]));

        let short = Bundle::map().with("bodies", Bundle::List(vec![Array::scalar(0.5)]));
        assert!(matches!(
            graph.fill_params(root, short),
            Err(Error::Fill(FillError::Sequence { got: 1, expected: 2, .. }))
        ));
    }

    #[test]
    fn collection_entries_reparameterize() {
        let mut graph = Graph::new();
        let (root, ..) = collection_model(&mut graph);
        let bundle = Bundle::map().with(
            "bodies",
            Bundle::map()
                .with("x", 0.75)
                .with("y", Array::vector(vec![-1.0, 5.0])),
        );
        let there = graph.bundle_to_valid(root, &bundle).unwrap();
        let back = graph.bundle_from_valid(root, &there).unwrap();
        assert!(back.allclose(&bundle, 1e-9), "{back:?} != {bundle:?}");
    }

    #[test]
    fn mapping_fill_rejects_plain_nodes() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        let note = graph.add_node("note").unwrap();
        graph.link_by_name(root, note).unwrap();
        graph.set_active(root, true).unwrap();
        match graph
            .fill_params(root, Bundle::map().with("note", 1.0))
            .unwrap_err()
        {
            Error::Fill(FillError::Unsupported { kind, form, .. }) => {
                assert_eq!(kind, "node");
                assert_eq!(form, "an array");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
