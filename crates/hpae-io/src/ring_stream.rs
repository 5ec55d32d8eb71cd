//! Stream callbacks backed by an [`AudioRingBuffer`].
//!
//! These connect a pipeline edge to an in-process ring: the soft link feeds a
//! ring from a capture session and drains it into a render session, and the
//! CLI and tests use them as a stand-in for a client's shared buffer.

use std::sync::Arc;

use hpae_core::{HpaeError, Result};

use crate::callback::{ReadCallback, ReadRequest, WriteCallback, WriteRequest};
use crate::ring::{AudioRingBuffer, RingStatus};

/// Serves a sink input from a ring.
#[derive(Debug, Clone)]
pub struct RingWriteCallback {
    ring: Arc<AudioRingBuffer>,
}

impl RingWriteCallback {
    /// Adapter over `ring`.
    pub fn new(ring: Arc<AudioRingBuffer>) -> Self {
        Self { ring }
    }

    /// The underlying ring.
    pub fn ring(&self) -> &Arc<AudioRingBuffer> {
        &self.ring
    }
}

impl WriteCallback for RingWriteCallback {
    fn on_write_data(&self, request: &mut WriteRequest) -> Result<()> {
        request.frame_position = self.ring.cur_read_frame();
        if !request.need_data {
            return Ok(());
        }
        let bpf = self.ring.bytes_per_frame();
        let wanted = (request.data.len() / bpf) as u64;
        if self.ring.available_data_frames() < wanted {
            request.data.fill(0);
            tracing::trace!(
                available = self.ring.available_data_frames(),
                wanted,
                "ring underrun"
            );
            return Err(HpaeError::NotEnoughData);
        }
        self.ring.read_frames(&mut request.data)?;
        request.frame_position = self.ring.cur_read_frame();
        Ok(())
    }
}

/// Feeds a ring from a source output.
#[derive(Debug, Clone)]
pub struct RingReadCallback {
    ring: Arc<AudioRingBuffer>,
}

impl RingReadCallback {
    /// Adapter over `ring`.
    pub fn new(ring: Arc<AudioRingBuffer>) -> Self {
        Self { ring }
    }

    /// The underlying ring.
    pub fn ring(&self) -> &Arc<AudioRingBuffer> {
        &self.ring
    }
}

impl ReadCallback for RingReadCallback {
    fn on_read_data(&self, request: &ReadRequest<'_>) -> Result<()> {
        if self.ring.status() == RingStatus::Released {
            return Err(HpaeError::IllegalState);
        }
        self.ring.write_frames(request.data)?;
        self.ring
            .set_handle_info(self.ring.cur_write_frame(), request.timestamp_ns);
        Ok(())
    }
}
