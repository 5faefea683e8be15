//! Scoped Contexts
//!
//! Guards that change graph state for the length of a scope and restore it
//! on drop, including on early return through `?` and on unwinding.
//!
//! # Nesting
//!
//! Every guard borrows the graph mutably and dereferences to it, so the
//! next guard is entered on the previous one:
//!
//! ```
//! use simgraph_core::{ActiveContext, Array, Graph, OverrideParam, Param};
//!
//! let mut graph = Graph::new();
//! let root = graph.add_module("root").unwrap();
//! let a = graph.add_param_to(root, Param::builder("a").value(3.0)).unwrap();
//!
//! let mut active = ActiveContext::enter(&mut graph, root).unwrap();
//! let mut forced = OverrideParam::new(&mut active, a, 1.0).unwrap();
//! assert_eq!(forced.value(a).unwrap(), Array::scalar(1.0));
//! ```
//!
//! Guards release in reverse order of entry, each restoring exactly what the
//! next outer layer expects.

mod active;
mod override_param;
mod valid;

pub use active::ActiveContext;
pub use override_param::OverrideParam;
pub use valid::ValidContext;
