//! Typed failure kinds surfaced by the engine.

use thiserror::Error;

use crate::time::EngineTime;

/// Everything that can go wrong inside the engine.
///
/// `NodeUserError` is recoverable at node level when the node carries an
/// error output; every other kind terminates the enclosing graph cleanly.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A value was written through a meta it does not conform to.
    #[error("schema mismatch: expected {expected}, got {found}")]
    SchemaMismatch {
        /// The meta the destination expects.
        expected: String,
        /// A description of the offending value.
        found: String,
    },

    /// Copy-assignment between two distinct interned metas.
    #[error("type mismatch: cannot assign {src} into {dst}")]
    TypeMismatch {
        /// Source meta name.
        src: String,
        /// Destination meta name.
        dst: String,
    },

    /// A value of a non-hashable meta was used as a set element or map key.
    #[error("value of type {0} is not hashable")]
    NotHashable(String),

    /// An output was unbound or destroyed while inputs were still bound to it.
    #[error("dangling bind: output of node {node} still has {count} bound observers")]
    DanglingBind {
        /// Index of the node whose output is being torn down.
        node: usize,
        /// How many observers were still registered.
        count: usize,
    },

    /// Mesh re-ranking found a dependency cycle.
    #[error("dependency cycle through mesh key {key:?}")]
    DependencyCycle {
        /// Rendering of the key that closed the cycle.
        key: String,
    },

    /// A user compute body failed.
    #[error("node {node_path} failed at {when}: {message}")]
    NodeUserError {
        /// Path of the failing node, `/`-joined.
        node_path: String,
        /// Engine time of the failing evaluation.
        when: EngineTime,
        /// The user error rendering.
        message: String,
    },

    /// A life-cycle operation requires a started graph or node.
    #[error("{0} is not started")]
    NotStarted(String),

    /// A life-cycle operation would start something twice.
    #[error("{0} is already started")]
    AlreadyStarted(String),

    /// The engine was asked to advance after a stop request completed.
    #[error("engine is stopped")]
    Stopped,

    /// A bounded push queue was full and its policy is `Raise`.
    #[error("push queue of node {node} overflowed (capacity {capacity})")]
    PushQueueOverflow {
        /// Index of the push-source node.
        node: usize,
        /// Configured queue capacity.
        capacity: usize,
    },

    /// A descriptor referenced a node index that does not exist.
    #[error("unknown node index {0}")]
    UnknownNode(usize),

    /// A view path did not resolve to a time-series child.
    #[error("path {path:?} does not resolve within {meta}")]
    UnknownPath {
        /// The offending index path.
        path: Vec<usize>,
        /// The meta the walk started from.
        meta: String,
    },

    /// A read went through an input that is not bound to any output.
    #[error("input {0} is not bound to an output")]
    NotBound(String),
}

impl EngineError {
    /// Wraps a user error message with node context, for `compute` bodies.
    pub fn user(node_path: impl Into<String>, when: EngineTime, message: impl Into<String>) -> Self {
        EngineError::NodeUserError {
            node_path: node_path.into(),
            when,
            message: message.into(),
        }
    }

    /// True when a configured error output may absorb this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::NodeUserError { .. })
    }
}

/// Engine-wide result alias.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
