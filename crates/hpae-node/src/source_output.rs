//! Source output node: the exit of one client capture stream.

use std::sync::{Arc, Weak};

use hpae_core::{
    AudioNode, Clock, HpaeError, NodeInfo, NodeType, PcmBuffer, SessionState, convert_from_float,
};
use hpae_io::{ReadCallback, ReadRequest};

/// Hands captured frames to a client in the stream's wire format.
///
/// Invalid frames are dropped unless the source type forwards them
/// (playback capture, remote cast). A full client ring
/// ([`HpaeError::WriteFailed`]) drops the frame without advancing the read
/// position.
pub struct SourceOutputNode {
    info: NodeInfo,
    clock: Arc<dyn Clock>,
    read_callback: Option<Weak<dyn ReadCallback>>,
    data: Vec<u8>,
    frames_read: u64,
    latency_us: u64,
    overflows: u64,
    state: SessionState,
    app_uid: i32,
}

impl SourceOutputNode {
    /// Source output for the stream described by `info`.
    pub fn new(info: NodeInfo, clock: Arc<dyn Clock>) -> Self {
        Self {
            data: vec![0; info.frame_bytes()],
            clock,
            read_callback: None,
            frames_read: 0,
            latency_us: 0,
            overflows: 0,
            state: SessionState::New,
            app_uid: -1,
            info,
        }
    }

    /// Registers the client consumer. Returns `false` if it is already gone.
    pub fn register_read_callback(&mut self, callback: Weak<dyn ReadCallback>) -> bool {
        if callback.upgrade().is_none() {
            return false;
        }
        self.read_callback = Some(callback);
        true
    }

    /// Frames delivered to the client.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Frames dropped because the client ring was full.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Latency last reported by the manager, in microseconds.
    pub fn latency_us(&self) -> u64 {
        self.latency_us
    }

    /// Session state as tracked by the manager.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Records the session state.
    pub fn set_state(&mut self, state: SessionState) {
        tracing::debug!(session_id = self.info.session_id, from = ?self.state, to = ?state, "session state");
        self.state = state;
    }

    /// Uid of the owning app.
    pub fn app_uid(&self) -> i32 {
        self.app_uid
    }

    /// Associates the owning app.
    pub fn set_app_uid(&mut self, uid: i32) {
        self.app_uid = uid;
    }
}

impl AudioNode for SourceOutputNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::SourceOutput
    }

    fn output_port_count(&self) -> u16 {
        0
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        let session_id = self.info.session_id;
        let Some(&buffer) = inputs.first() else {
            tracing::trace!(session_id, "source output has no input");
            return false;
        };
        if !buffer.is_valid() && !self.info.source_type.forwards_invalid() {
            return false;
        }

        let n = self.info.frame_samples().min(buffer.frame().len());
        convert_from_float(self.info.format, &buffer.frame()[..n], &mut self.data);
        if let Some(cb) = self.info.callback() {
            self.latency_us = cb.on_request_latency(session_id);
        }

        let Some(callback) = self.read_callback.as_ref().and_then(Weak::upgrade) else {
            tracing::error!(session_id, "read callback is gone");
            return false;
        };
        let request = ReadRequest {
            data: &self.data,
            frames_read: self.frames_read,
            timestamp_ns: self.clock.monotonic_ns(),
            latency_us: self.latency_us,
        };
        match callback.on_read_data(&request) {
            Ok(()) => {
                self.frames_read += self.info.frame_len as u64;
                true
            }
            Err(HpaeError::WriteFailed) => {
                self.overflows += 1;
                tracing::debug!(session_id, "client ring overflow");
                false
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "read callback failed");
                false
            }
        }
    }

    fn output(&self, _port: u16) -> Option<&PcmBuffer> {
        None
    }
}
