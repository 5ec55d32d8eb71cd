//! Error type shared by every engine crate.
//!
//! Node-level code never panics on bad input; it returns one of these codes
//! (or `None` where a buffer would be produced) and lets the caller decide.
//! `NotInited` and `IllegalState` are kept distinct because callers branch on
//! them: the first means "call init", the second means "wrong lifecycle step".

use thiserror::Error;

use crate::graph::{EdgeId, NodeId, PortRef};

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum HpaeError {
    /// A parameter or audio geometry is invalid.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The target session or node is unknown, or cannot accept the request.
    #[error("invalid operation")]
    InvalidOperation,

    /// The request is not valid in the current lifecycle state.
    #[error("illegal state")]
    IllegalState,

    /// The device has not been initialized.
    #[error("device not initialized")]
    NotInited,

    /// A one-shot setup step was already performed.
    #[error("already configured")]
    AlreadyConfigured,

    /// The device or node does not implement this request.
    #[error("operation not supported")]
    NotSupported,

    /// A stream callback could not supply a full frame.
    #[error("not enough data")]
    NotEnoughData,

    /// A stream callback could not accept a frame (consumer overflow).
    #[error("write failed")]
    WriteFailed,

    /// A generic operation failure with context.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// A hardware abstraction call failed.
    #[error("device error: {0}")]
    Device(String),

    /// The node is not part of the pipeline.
    #[error("{0} not found")]
    NodeNotFound(NodeId),

    /// The edge is not part of the pipeline.
    #[error("{0} not found")]
    EdgeNotFound(EdgeId),

    /// Adding the edge would create a cycle.
    #[error("connecting {0} to {1} would create a cycle")]
    CycleDetected(PortRef, NodeId),

    /// The edge already exists.
    #[error("edge from {0} to {1} already exists")]
    DuplicateEdge(PortRef, NodeId),

    /// File or OS error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HpaeError {
    /// Shorthand for [`HpaeError::InvalidParam`].
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Shorthand for [`HpaeError::Device`].
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Returns `true` for errors that a device retry or a later tick may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Device(_) | Self::NotEnoughData | Self::WriteFailed | Self::Io(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, HpaeError>;
