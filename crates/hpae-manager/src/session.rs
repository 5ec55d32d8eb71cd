//! Snapshots of session state returned to callers.

use hpae_core::{NodeInfo, SessionState, StreamInfo};

/// State of one render session.
#[derive(Clone, Debug)]
pub struct SinkInputInfo {
    /// Node description of the session's sink input.
    pub node_info: NodeInfo,
    /// Stream as submitted on create.
    pub stream: StreamInfo,
    /// Lifecycle state.
    pub state: SessionState,
    /// Frames pulled from the client so far.
    pub frames_written: u64,
    /// Client volume in `[0, 1]`.
    pub client_volume: f32,
}

/// State of one capture session.
#[derive(Clone, Debug)]
pub struct SourceOutputInfo {
    /// Node description of the session's source output.
    pub node_info: NodeInfo,
    /// Stream as submitted on create.
    pub stream: StreamInfo,
    /// Lifecycle state.
    pub state: SessionState,
    /// Frames handed to the client so far.
    pub frames_read: u64,
    /// Frames dropped because the client ring was full.
    pub overflows: u64,
}
