//! Error types.
//!
//! Every fallible operation in the crate returns [`Result`]. Structural
//! problems with the graph are reported through [`GraphError`], problems
//! with a value bundle through [`FillError`], and persistence failures
//! through [`CheckpointError`]; all three fold into [`Error`].

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::NodeId;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid graph structure or graph mutation.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Invalid parameter configuration (shape, valid range, value/shape mismatch).
    #[error("parameter configuration error: {0}")]
    ParamConfiguration(String),

    /// Operation not supported for the parameter's current state.
    #[error("parameter type error: {0}")]
    ParamType(String),

    /// Mutation while active, or fill/clear while inactive.
    #[error("active state error: {0}")]
    ActiveState(String),

    /// A value bundle did not match the module it was applied to.
    #[error(transparent)]
    Fill(#[from] FillError),

    /// A parameter was read but holds no value.
    #[error("parameter \"{name}\" has no value")]
    MissingValue { name: String },

    /// Array shapes are incompatible.
    #[error("shape error: {0}")]
    Shape(String),

    /// Backend selection or backend operation failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Saving or loading a checkpoint failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Graph-structural errors. All of them are raised before the graph is touched.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("invalid name \"{0}\": names must be non-empty and may not contain '/'")]
    InvalidName(String),

    #[error("key \"{key}\" is already used under \"{parent}\"")]
    DuplicateKey { parent: String, key: String },

    #[error("\"{child}\" is already linked under \"{parent}\" as \"{key}\"")]
    AlreadyLinked {
        parent: String,
        child: String,
        key: String,
    },

    #[error("linking \"{child}\" under \"{parent}\" would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("\"{parent}\" has no child \"{key}\"")]
    MissingChild { parent: String, key: String },

    #[error("cannot {op} \"{node}\" while it is active")]
    Active { op: &'static str, node: String },

    #[error("\"{node}\" is a {actual}, expected a {expected}")]
    WrongKind {
        node: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("index {index} out of range for \"{node}\" of length {len}")]
    IndexOutOfRange {
        node: String,
        index: usize,
        len: usize,
    },

    #[error("stored structure does not match the graph: {0}")]
    StructureMismatch(String),
}

/// Errors raised while filling, extracting or reparameterizing a bundle.
#[derive(Debug, Error)]
pub enum FillError {
    #[error(
        "flattened array input of shape {input:?} does not match the dynamic params of \
         \"{module}\": the last dimension should equal {expected}\n\
         registered dynamic params (name: shape): {registered}"
    )]
    Array {
        module: String,
        input: Vec<usize>,
        expected: usize,
        registered: String,
    },

    #[error(
        "input params length ({got}) does not match dynamic params length ({expected}) \
         of \"{module}\"\nregistered dynamic params: {registered}"
    )]
    Sequence {
        module: String,
        got: usize,
        expected: usize,
        registered: String,
    },

    #[error(
        "input params key \"{key}\" not found among the children of \"{module}\"\n\
         valid children: {children}\nregistered dynamic modules: {modules}"
    )]
    UnknownKey {
        module: String,
        key: String,
        children: String,
        modules: String,
    },

    #[error("bundle entry \"{key}\" of \"{module}\" cannot fill a {kind} from {form}")]
    Unsupported {
        module: String,
        key: String,
        kind: &'static str,
        form: &'static str,
    },

    #[error("bundle entry \"{key}\" of \"{module}\" must be an array for a parameter")]
    NotAnArray { module: String, key: String },

    #[error(
        "dynamic param \"{param}\" was not filled by the mapping passed to \"{module}\"\n\
         param parent(s): {parents}\ndynamic children: {children}"
    )]
    Unfilled {
        module: String,
        param: String,
        parents: String,
        children: String,
    },

    #[error("params must be provided for \"{module}\": it has {expected} dynamic params")]
    MissingParams { module: String, expected: usize },

    #[error("dynamic param \"{param}\" of \"{module}\" has no value to build from")]
    MissingValue { module: String, param: String },

    #[error(
        "value of shape {shape:?} for dynamic param \"{param}\" of \"{module}\" does not \
         end with its declared shape {expected:?}"
    )]
    Shape {
        module: String,
        param: String,
        shape: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("batch shapes of \"{module}\" disagree: {first:?} vs {other:?} (\"{param}\")")]
    BatchMismatch {
        module: String,
        param: String,
        first: Vec<usize>,
        other: Vec<usize>,
    },
}

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("checkpoint decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("checkpoint {0} was not saved as appendable")]
    NotAppendable(PathBuf),

    #[error("snapshot index {index} out of range for {len} stored snapshots")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("no parameter stored at \"{0}\"")]
    UnknownPath(String),

    #[error("unsupported checkpoint version {0}")]
    Version(u32),
}
