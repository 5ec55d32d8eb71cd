//! Client stream callbacks.
//!
//! A render session's client buffer is reached through a [`WriteCallback`]:
//! each tick the sink input node asks it to fill one frame. A capture
//! session hands each frame to a [`ReadCallback`]. Nodes hold both weakly;
//! a dropped callback reads as "no data".

use hpae_core::Result;

/// One pull request from a sink input node.
#[derive(Clone, Debug, Default)]
pub struct WriteRequest {
    /// Frames delivered to the pipeline so far.
    pub frames_written: u64,
    /// Frame position reported to the client.
    pub frame_position: u64,
    /// Monotonic timestamp of the request.
    pub timestamp_ns: u64,
    /// Latency between the client ring and the device.
    pub latency_us: u64,
    /// Buffer to fill; its length is the requested byte count.
    pub data: Vec<u8>,
    /// Device class of the sink.
    pub device_class: String,
    /// Network id of the sink.
    pub device_net_id: String,
    /// `false` when the node can serve the tick from history and only wants
    /// the position update.
    pub need_data: bool,
}

/// Client-side producer of render frames.
pub trait WriteCallback: Send + Sync {
    /// Fills `request.data`.
    ///
    /// Returns `HpaeError::NotEnoughData` when a full frame is not
    /// available; the node then treats the tick as an underflow.
    fn on_write_data(&self, request: &mut WriteRequest) -> Result<()>;
}

/// One captured frame handed to a client.
#[derive(Clone, Copy, Debug)]
pub struct ReadRequest<'a> {
    /// Frame in the session's wire format.
    pub data: &'a [u8],
    /// Frames delivered to the client before this one.
    pub frames_read: u64,
    /// Monotonic capture timestamp.
    pub timestamp_ns: u64,
    /// Latency between the device and the client ring.
    pub latency_us: u64,
}

/// Client-side consumer of capture frames.
pub trait ReadCallback: Send + Sync {
    /// Accepts one frame.
    ///
    /// Returns `HpaeError::WriteFailed` when the client ring is full; the
    /// frame is dropped.
    fn on_read_data(&self, request: &ReadRequest<'_>) -> Result<()>;
}
