//! Error type shared by the IR and every rewrite pass.

use crate::ir::NodeId;

/// Errors raised while building, validating or rewriting a graph.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A node id that does not name a live node of the graph.
    #[error("node {0} does not exist or has been erased")]
    UnknownNode(NodeId),

    /// Attempted to erase a node that other nodes still read.
    #[error("cannot erase node '{name}': still used by {users} node(s)")]
    NodeHasUsers { name: String, users: usize },

    /// An argument refers to a node that is not earlier in the graph order.
    #[error("node '{node}' refers to '{arg}' which does not precede it")]
    ForwardReference { node: String, arg: String },

    #[error("graph has no output node")]
    MissingOutput,

    #[error("graph has more than one output node")]
    DuplicateOutput,

    #[error("output node '{0}' is not the last node of the graph")]
    OutputNotLast(String),

    #[error("placeholder '{0}' appears after a non-placeholder node")]
    PlaceholderOutOfOrder(String),

    /// A pass needed node metadata that the tracer did not record.
    #[error("node '{node}' is missing required metadata: {field}")]
    MissingMetadata { node: String, field: &'static str },

    #[error("no submodule named '{0}'")]
    UnknownModule(String),

    /// Inlining only supports positional call sites.
    #[error("cannot inline a call to '{0}' that passes keyword arguments")]
    KeywordArgumentsToInline(String),

    #[error("module '{class}' expects at least {expected} argument(s), got {got}")]
    ArityMismatch {
        class: String,
        expected: usize,
        got: usize,
    },

    #[error("module '{0}' is opaque and cannot be traced")]
    NotTraceable(String),

    #[error("input check of module '{0}' rejected a traced input")]
    InputRejected(String),

    /// The input check of a module instance is already overridden.
    #[error("input check of module '{0}' is already overridden")]
    CheckAlreadyOverridden(String),

    #[error("traced graph of module '{0}' ended without an output node")]
    NoOutputInTrace(String),

    /// Any failure while tracing or splicing a submodule.
    #[error("error while expanding {class}: {source}")]
    Inline {
        class: String,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid rewrite configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("failed to read rewrite configuration: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
