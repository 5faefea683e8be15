//! Simgraph Core
//!
//! Dependency graph of parameters and modules for building differentiable
//! simulators out of small, reusable pieces. It provides:
//!
//! - A node arena with cycle-checked linking and change propagation
//! - Parameters that are dynamic, static, or pointers to other values
//! - Modules that fill their dynamic parameters from flat arrays, lists or
//!   nested mappings, and build them back
//! - Scoped guards for activation, overrides and valid-range mode
//! - MessagePack checkpoints with append-only snapshots
//!
//! # Architecture
//!
//! - `graph`: node arena, linking, traversal and activation
//! - `param`: parameter states, value resolution and reparameterization
//! - `module`: dynamic-parameter bookkeeping, fill and build
//! - `collection`: ordered list and tuple nodes
//! - `context`: scope guards restoring state on drop
//! - `forward`: running a computation against a filled module
//! - `backend`: array type and swappable numeric backend
//! - `checkpoint`: saving and loading parameter state
//!
//! # Example
//!
//! ```
//! use simgraph_core::{Array, Call, Graph, Param};
//!
//! let mut graph = Graph::new();
//! let sim = graph.add_module("sim").unwrap();
//! graph.add_param_to(sim, Param::builder("x")).unwrap();
//! graph
//!     .add_param_to(sim, Param::builder("scale").value(2.0))
//!     .unwrap();
//!
//! let out = graph
//!     .forward(sim, &["x", "scale"], Call::new().params(3.0), |_, kwargs| {
//!         kwargs.get("x")?.mul(kwargs.get("scale")?)
//!     })
//!     .unwrap();
//! assert_eq!(out, Array::scalar(6.0));
//! ```

pub mod backend;
pub mod checkpoint;
pub mod collection;
pub mod context;
pub mod error;
pub mod forward;
pub mod graph;
pub mod module;
pub mod param;

pub use backend::{Array, Backend, DType, Shape};
pub use checkpoint::Checkpoint;
pub use context::{ActiveContext, OverrideParam, ValidContext};
pub use error::{CheckpointError, Error, FillError, GraphError, Result};
pub use forward::{Call, Kwargs};
pub use graph::{Graph, NodeId, NodeKind};
pub use module::{Bundle, ModuleData};
pub use param::{Param, ParamBuilder, ParamState, ParamValue, Resolver, ValidRange};
