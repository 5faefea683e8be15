//! Parameters
//!
//! A parameter is a graph node holding one resolvable value. Where that value
//! comes from is decided by its [`ParamState`]:
//!
//! - **Dynamic**: supplied per call, nothing stored
//! - **DynamicValue**: supplied per call, with a cached default
//! - **Static**: a fixed constant
//! - **Pointer**: computed on demand from other parameters
//!
//! # Reading
//!
//! Reads check the transient slot first. The slot holds values injected by a
//! fill, values forced by an override, and, while the parameter is active,
//! the cached result of resolving a pointer. Outside those, the stored state
//! decides.
//!
//! # Example
//!
//! ```
//! use simgraph_core::{Graph, Param};
//!
//! let mut graph = Graph::new();
//! let a = graph.add_param(Param::builder("a").value(3.0)).unwrap();
//! let b = graph.add_param(Param::builder("b").value(a)).unwrap();
//! assert_eq!(graph.value(b).unwrap().item(), Some(3.0));
//! ```

mod ops;
mod valid;

use std::fmt;
use std::rc::Rc;

use crate::backend::{Array, DType, Shape};
use crate::error::Result;
use crate::graph::{Graph, NodeId};

pub use valid::ValidRange;

/// Computes a pointer parameter's value from the graph.
///
/// The closure receives the graph and the id of the parameter being
/// resolved. Every node it reads should be declared with
/// [`depends_on`](Resolver::depends_on) so it is linked below the parameter.
#[derive(Clone)]
pub struct Resolver {
    pub(crate) func: Rc<dyn Fn(&mut Graph, NodeId) -> Result<Array>>,
    pub(crate) deps: Vec<(String, NodeId)>,
}

impl Resolver {
    pub fn new(func: impl Fn(&mut Graph, NodeId) -> Result<Array> + 'static) -> Self {
        Self {
            func: Rc::new(func),
            deps: Vec::new(),
        }
    }

    /// Declare a node the resolver reads, linked under `key`.
    pub fn depends_on(mut self, key: &str, node: NodeId) -> Self {
        self.deps.push((key.to_string(), node));
        self
    }

    pub fn deps(&self) -> &[(String, NodeId)] {
        &self.deps
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// Where a pointer parameter gets its value.
#[derive(Debug, Clone)]
pub enum Pointer {
    /// The value of another parameter.
    Link(NodeId),
    /// The result of a resolver closure.
    Function(Resolver),
}

/// Value-resolution state of a parameter.
#[derive(Debug, Clone)]
pub enum ParamState {
    Dynamic,
    DynamicValue(Array),
    Static(Array),
    Pointer(Pointer),
}

impl ParamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamState::Dynamic => "dynamic",
            ParamState::DynamicValue(_) => "dynamic_value",
            ParamState::Static(_) => "static",
            ParamState::Pointer(_) => "pointer",
        }
    }
}

/// Anything that can be assigned to a parameter.
#[derive(Debug, Clone)]
pub enum ParamValue {
    /// Make the parameter dynamic.
    Dynamic,
    /// A concrete array.
    Array(Array),
    /// Point at another parameter.
    Pointer(NodeId),
    /// Compute the value with a resolver.
    Function(Resolver),
}

impl From<Array> for ParamValue {
    fn from(array: Array) -> Self {
        ParamValue::Array(array)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Array(Array::scalar(value))
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(values: Vec<f64>) -> Self {
        ParamValue::Array(Array::vector(values))
    }
}

impl From<NodeId> for ParamValue {
    fn from(id: NodeId) -> Self {
        ParamValue::Pointer(id)
    }
}

impl From<Resolver> for ParamValue {
    fn from(resolver: Resolver) -> Self {
        ParamValue::Function(resolver)
    }
}

/// Per-parameter payload stored in the arena.
#[derive(Debug, Clone)]
pub struct Param {
    pub(crate) state: ParamState,
    pub(crate) transient: Option<Array>,
    pub(crate) shape: Option<Shape>,
    pub(crate) valid: ValidRange,
    pub(crate) cyclic: bool,
    pub(crate) units: Option<String>,
    pub(crate) batched: bool,
    pub(crate) dtype: Option<DType>,
}

impl Param {
    /// Start describing a new parameter.
    pub fn builder(name: &str) -> ParamBuilder {
        ParamBuilder::new(name)
    }

    pub fn state(&self) -> &ParamState {
        &self.state
    }

    /// Supplied per call, with or without a cached default.
    pub fn is_dynamic(&self) -> bool {
        matches!(self.state, ParamState::Dynamic | ParamState::DynamicValue(_))
    }

    pub fn is_static(&self) -> bool {
        matches!(self.state, ParamState::Static(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.state, ParamState::Pointer(_))
    }

    /// Declared shape. Pointers have none.
    pub fn shape(&self) -> Option<&[usize]> {
        match self.state {
            ParamState::Pointer(_) => None,
            _ => self.shape.as_deref(),
        }
    }

    /// Cached default of a dynamic parameter.
    pub fn dynamic_value(&self) -> Option<&Array> {
        match &self.state {
            ParamState::DynamicValue(value) => Some(value),
            _ => None,
        }
    }

    pub fn valid(&self) -> &ValidRange {
        &self.valid
    }

    pub fn cyclic(&self) -> bool {
        self.cyclic
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn batched(&self) -> bool {
        self.batched
    }

    pub fn dtype(&self) -> Option<DType> {
        self.dtype
    }

    /// Whether a value of shape `value` fits `declared`, allowing a batch
    /// prefix on batched params.
    pub(crate) fn fits(&self, value: &[usize], declared: &[usize]) -> bool {
        if self.batched {
            value.ends_with(declared)
        } else {
            value == declared
        }
    }

    /// Whether a value of shape `value` fits the declared shape, if any.
    pub(crate) fn accepts(&self, value: &[usize]) -> bool {
        self.shape().map_or(true, |declared| self.fits(value, declared))
    }

    /// The value a read would see without resolving pointers.
    pub(crate) fn current(&self) -> Option<&Array> {
        if let Some(value) = &self.transient {
            return Some(value);
        }
        match &self.state {
            ParamState::DynamicValue(value) | ParamState::Static(value) => Some(value),
            _ => None,
        }
    }

    /// Nodes linked below this parameter by its pointer.
    pub(crate) fn owned_links(&self) -> Vec<NodeId> {
        match &self.state {
            ParamState::Pointer(Pointer::Link(target)) => vec![*target],
            ParamState::Pointer(Pointer::Function(resolver)) => {
                resolver.deps.iter().map(|(_, id)| *id).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum DeclaredShape {
    Default,
    Explicit(Shape),
    Unshaped,
}

/// Builder for [`Param`], consumed by [`Graph::add_param`].
#[derive(Debug, Clone)]
pub struct ParamBuilder {
    pub(crate) name: String,
    value: Option<ParamValue>,
    dynamic_value: Option<Array>,
    shape: DeclaredShape,
    lower: Option<Array>,
    upper: Option<Array>,
    cyclic: bool,
    units: Option<String>,
    batched: bool,
}

impl ParamBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            dynamic_value: None,
            shape: DeclaredShape::Default,
            lower: None,
            upper: None,
            cyclic: false,
            units: None,
            batched: false,
        }
    }

    /// Initial value. Without one the parameter starts dynamic.
    pub fn value(mut self, value: impl Into<ParamValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Start dynamic with a cached default.
    pub fn dynamic_value(mut self, value: impl Into<Array>) -> Self {
        self.dynamic_value = Some(value.into());
        self
    }

    pub fn shape(mut self, shape: &[usize]) -> Self {
        self.shape = DeclaredShape::Explicit(Shape::from_slice(shape));
        self
    }

    /// Leave the shape undeclared.
    pub fn unshaped(mut self) -> Self {
        self.shape = DeclaredShape::Unshaped;
        self
    }

    pub fn lower(mut self, lower: impl Into<Array>) -> Self {
        self.lower = Some(lower.into());
        self
    }

    pub fn upper(mut self, upper: impl Into<Array>) -> Self {
        self.upper = Some(upper.into());
        self
    }

    /// Both bounds of the valid range.
    pub fn valid(self, lower: impl Into<Array>, upper: impl Into<Array>) -> Self {
        self.lower(lower).upper(upper)
    }

    pub fn cyclic(mut self, cyclic: bool) -> Self {
        self.cyclic = cyclic;
        self
    }

    pub fn units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    /// Accept values with leading batch dimensions.
    pub fn batched(mut self, batched: bool) -> Self {
        self.batched = batched;
        self
    }
}
