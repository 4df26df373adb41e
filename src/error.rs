//! Error types for the optimizer.
//!
//! Every variant is a programming-contract violation: the graph is corrupt or
//! a pass was driven incorrectly, and the current method has to be abandoned.
//! Optimizations that give up because of an effort bound are not errors; they
//! are logged and counted instead.

use thiserror::Error;

use crate::ir::graph::GraphState;
use crate::ir::node::NodeId;

/// Result alias used throughout the crate.
pub type OptResult<T> = Result<T, OptError>;

/// A fatal optimizer failure identifying the offending node where possible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptError {
    /// A rewrite was asked to do something its preconditions forbid.
    #[error("contract violation at {node}: {message}")]
    ContractViolation { node: NodeId, message: String },

    /// An operation touched a node that was already deleted.
    #[error("operation on deleted node {node}")]
    DeletedNode { node: NodeId },

    /// Structural verification failed.
    #[error("malformed graph at {node}: {message}")]
    MalformedGraph { node: NodeId, message: String },

    /// A control-flow view was used after the fixed topology changed.
    #[error("stale control-flow view (built for version {expected}, graph is at {actual})")]
    StaleControlFlow { expected: u64, actual: u64 },

    /// A pass ran without the graph state it requires.
    #[error("pass `{pass}` requires graph state {required:?}")]
    MissingGraphState {
        pass: &'static str,
        required: GraphState,
    },
}

impl OptError {
    pub fn contract(node: NodeId, message: impl Into<String>) -> Self {
        OptError::ContractViolation {
            node,
            message: message.into(),
        }
    }

    pub fn malformed(node: NodeId, message: impl Into<String>) -> Self {
        OptError::MalformedGraph {
            node,
            message: message.into(),
        }
    }

    /// The node this error is about, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            OptError::ContractViolation { node, .. }
            | OptError::DeletedNode { node }
            | OptError::MalformedGraph { node, .. } => Some(*node),
            OptError::StaleControlFlow { .. } | OptError::MissingGraphState { .. } => None,
        }
    }
}
