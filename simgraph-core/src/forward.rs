//! Forward calls.
//!
//! [`Graph::forward`] wraps a user computation the way a module method would
//! be called: when the module is idle it is activated, filled from the call's
//! bundle and cleared again afterwards; when it is already active (a nested
//! call from another forward) only explicit per-call overrides are applied.

use indexmap::IndexMap;

use crate::backend::Array;
use crate::context::{ActiveContext, OverrideParam};
use crate::error::{Error, FillError, Result};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::module::Bundle;

/// Arguments of one forward call.
#[derive(Debug, Clone, Default)]
pub struct Call {
    params: Option<Bundle>,
    overrides: IndexMap<String, Array>,
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values for the module's dynamic params.
    pub fn params(mut self, params: impl Into<Bundle>) -> Self {
        self.params = Some(params.into());
        self
    }

    /// Override one keyword for this call.
    ///
    /// Keys naming a child parameter force that parameter; any other key is
    /// passed through to the computation as an extra keyword.
    pub fn with(mut self, key: &str, value: impl Into<Array>) -> Self {
        self.overrides.insert(key.to_string(), value.into());
        self
    }
}

/// Resolved keyword values handed to a forward computation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kwargs {
    values: IndexMap<String, Option<Array>>,
}

impl Kwargs {
    /// Value of a keyword, failing when it is missing or unfilled.
    pub fn get(&self, key: &str) -> Result<&Array> {
        self.try_get(key).ok_or_else(|| Error::MissingValue {
            name: key.to_string(),
        })
    }

    pub fn try_get(&self, key: &str) -> Option<&Array> {
        self.values.get(key).and_then(Option::as_ref)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Array>)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_ref()))
    }

    pub(crate) fn insert(&mut self, key: &str, value: Option<Array>) {
        self.values.insert(key.to_string(), value);
    }
}

impl Graph {
    /// Run `f` as the forward computation of `module`.
    ///
    /// `keys` names the child parameters `f` reads; they are resolved into
    /// the [`Kwargs`] it receives. An idle module needs `call.params` unless
    /// it has no dynamic params.
    pub fn forward<R>(
        &mut self,
        module: NodeId,
        keys: &[&str],
        call: Call,
        f: impl FnOnce(&mut Graph, &Kwargs) -> Result<R>,
    ) -> Result<R> {
        let Call { params, overrides } = call;
        if self.is_active(module)? {
            return self.forward_active(module, keys, overrides, f);
        }

        let data = self.module(module)?;
        let params = match params {
            Some(params) => params,
            None if data.dynamic_params.is_empty() => Bundle::List(Vec::new()),
            None => {
                return Err(FillError::MissingParams {
                    module: self.name(module)?.to_string(),
                    expected: data.dynamic_params.len(),
                }
                .into())
            }
        };

        let mut active = ActiveContext::enter(self, module)?;
        active.fill_params(module, params)?;
        active.forward_active(module, keys, overrides, f)
    }

    fn forward_active<R>(
        &mut self,
        module: NodeId,
        keys: &[&str],
        overrides: IndexMap<String, Array>,
        f: impl FnOnce(&mut Graph, &Kwargs) -> Result<R>,
    ) -> Result<R> {
        let mut forced = Vec::new();
        let mut extra = IndexMap::new();
        for (key, value) in overrides {
            match self.node(module)?.child(&key) {
                Some(child) if self.kind(child)? == NodeKind::Param => forced.push((child, value)),
                _ => {
                    extra.insert(key, value);
                }
            }
        }

        let mut guard = OverrideParam::many(self, forced)?;
        let mut kwargs = Kwargs::default();
        for key in keys {
            let value = match extra.get(*key) {
                Some(value) => Some(value.clone()),
                None => {
                    let param = guard.child(module, key)?;
                    guard.try_value(param)?
                }
            };
            kwargs.insert(key, value);
        }
        for (key, value) in extra {
            if !kwargs.contains_key(&key) {
                kwargs.insert(&key, Some(value));
            }
        }

        f(&mut *guard, &kwargs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Param;

    fn model(graph: &mut Graph) -> (NodeId, NodeId) {
        let root = graph.add_module("root").unwrap();
        let x = graph.add_param_to(root, Param::builder("x")).unwrap();
        graph
            .add_param_to(root, Param::builder("scale").value(2.0))
            .unwrap();
        (root, x)
    }

    fn scaled(_graph: &mut Graph, kwargs: &Kwargs) -> Result<f64> {
        let x = kwargs.get("x")?.item().unwrap_or_default();
        let scale = kwargs.get("scale")?.item().unwrap_or_default();
        Ok(x * scale)
    }

    #[test]
    fn idle_call_fills_and_clears() {
        let mut graph = Graph::new();
        let (root, x) = model(&mut graph);
        let out = graph
            .forward(root, &["x", "scale"], Call::new().params(3.0), scaled)
            .unwrap();
        assert_eq!(out, 6.0);
        assert!(!graph.is_active(root).unwrap());
        assert!(graph.try_value(x).unwrap().is_none());
    }

    #[test]
    fn idle_call_needs_params() {
        let mut graph = Graph::new();
        let (root, _) = model(&mut graph);
        let err = graph
            .forward(root, &["x"], Call::new(), scaled)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Fill(FillError::MissingParams { expected: 1, .. })
        ));
    }

    #[test]
    fn static_module_needs_no_params() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        graph
            .add_param_to(root, Param::builder("scale").value(2.0))
            .unwrap();
        let out = graph
            .forward(root, &["scale"], Call::new(), |_, kwargs| {
                Ok(kwargs.get("scale")?.clone())
            })
            .unwrap();
        assert_eq!(out, Array::scalar(2.0));
    }

    #[test]
    fn overrides_apply_for_one_call() {
        let mut graph = Graph::new();
        let (root, _) = model(&mut graph);
        let scale = graph.child(root, "scale").unwrap();
        let out = graph
            .forward(
                root,
                &["x", "scale"],
                Call::new().params(3.0).with("scale", 10.0),
                scaled,
            )
            .unwrap();
        assert_eq!(out, 30.0);
        assert_eq!(graph.value(scale).unwrap(), Array::scalar(2.0));
    }

    #[test]
    fn nested_call_skips_fill() {
        let mut graph = Graph::new();
        let (root, _) = model(&mut graph);
        let out = graph
            .forward(root, &["x"], Call::new().params(3.0), |graph, outer| {
                let x = outer.get("x")?.clone();
                let inner = graph.forward(
                    root,
                    &["x", "scale", "offset"],
                    Call::new().with("scale", 5.0).with("offset", 1.0),
                    |_, kwargs| {
                        let scale = kwargs.get("scale")?.item().unwrap_or_default();
                        let offset = kwargs.get("offset")?.item().unwrap_or_default();
                        let x = kwargs.get("x")?.item().unwrap_or_default();
                        Ok(x * scale + offset)
                    },
                )?;
                Ok((x, inner))
            })
            .unwrap();
        assert_eq!(out, (Array::scalar(3.0), 16.0));
    }
}
