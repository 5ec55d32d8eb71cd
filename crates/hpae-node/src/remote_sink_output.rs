//! Remote sink output: split rendering to a network device.
//!
//! A remote device receives one render call per split sub-stream (media,
//! navigation, communication) instead of a single mix. Before each frame
//! the device is told when the media stream type or a sub-stream's usage
//! changed. Network devices have no hardware clock, so every tick ends in
//! [`RemoteTiming::handle`].

use std::collections::HashMap;
use std::sync::Arc;

use hpae_core::{
    AudioNode, NodeInfo, NodeType, PcmBuffer, Result, SinkInfo, SplitStreamType, StreamManagerState,
    StreamType, StreamUsage, convert_from_float,
};
use hpae_io::DeviceContext;

use crate::sink_output::{RemoteTiming, SinkLifecycle};

/// Parameter key announcing a new media stream type.
pub const STREAM_TYPE_CHANGE: &str = "stream_type_change";

/// Parameter key announcing a new sub-stream usage.
pub const STREAM_USAGE_CHANGE: &str = "stream_usage_change";

/// Renders each split sub-stream to a remote device.
pub struct RemoteSinkOutputNode {
    info: NodeInfo,
    lifecycle: SinkLifecycle,
    timing: RemoteTiming,
    usages: HashMap<SplitStreamType, StreamUsage>,
    frame_data: Vec<u8>,
    need_empty_chunk: bool,
}

impl RemoteSinkOutputNode {
    /// Remote output in `info`'s geometry and wire format.
    pub fn new(info: NodeInfo, context: Arc<DeviceContext>) -> Self {
        Self {
            lifecycle: SinkLifecycle::new(Arc::clone(&context), info.node_name.clone()),
            timing: RemoteTiming::new(context.clock()),
            usages: HashMap::new(),
            frame_data: vec![0; info.frame_bytes()],
            need_empty_chunk: false,
            info,
        }
    }

    /// Acquires the device for `(class, net_id)`.
    pub fn get_render_sink_instance(&mut self, class: &str, net_id: &str) -> Result<()> {
        self.lifecycle.get_render_sink_instance(class, net_id)
    }

    /// Initializes the device; `need_empty_chunk` is taken from `attr`.
    pub fn render_sink_init(&mut self, attr: &SinkInfo) -> Result<()> {
        self.need_empty_chunk = attr.need_empty_chunk;
        self.lifecycle.init(attr)
    }

    /// Deinitializes and releases the device.
    pub fn render_sink_deinit(&mut self) -> Result<()> {
        self.lifecycle.deinit()
    }

    /// Starts the device and re-anchors pacing.
    pub fn render_sink_start(&mut self) -> Result<()> {
        self.lifecycle.start()?;
        self.timing.reset();
        Ok(())
    }

    /// Stops the device.
    pub fn render_sink_stop(&mut self) -> Result<()> {
        self.lifecycle.stop()
    }

    /// Pauses the device.
    pub fn render_sink_pause(&mut self) -> Result<()> {
        self.lifecycle.pause()
    }

    /// Resumes the device.
    pub fn render_sink_resume(&mut self) -> Result<()> {
        self.lifecycle.resume()
    }

    /// Flushes the device.
    pub fn render_sink_flush(&self) -> Result<()> {
        self.lifecycle.flush()
    }

    /// Resets the device.
    pub fn render_sink_reset(&self) -> Result<()> {
        self.lifecycle.reset()
    }

    /// Forwards app uids to the device.
    pub fn update_apps_uid(&self, uids: &[i32]) -> Result<()> {
        self.lifecycle.update_apps_uid(uids)
    }

    /// Device latency in milliseconds.
    pub fn latency_ms(&self) -> Result<u32> {
        self.lifecycle.latency_ms()
    }

    /// Device lifecycle state.
    pub fn sink_state(&self) -> StreamManagerState {
        self.lifecycle.state()
    }

    /// Pacing state.
    pub fn timing(&self) -> &RemoteTiming {
        &self.timing
    }

    fn notify(&self, key: &str, code: i32) {
        let (Some(sink), Some(id)) = (self.lifecycle.render_sink(), self.lifecycle.render_id()) else {
            return;
        };
        sink.set_audio_parameter(key, &self.info.device_net_id, &format!("{id}-{code}"));
    }

    fn notify_stream_type_change(&mut self, stream_type: StreamType, split: SplitStreamType) {
        if split != SplitStreamType::Media || stream_type == self.info.stream_type {
            return;
        }
        self.notify(STREAM_TYPE_CHANGE, stream_type.code());
        self.info.stream_type = stream_type;
    }

    fn notify_stream_usage_change(&mut self, usage: StreamUsage, split: SplitStreamType) {
        if self.usages.get(&split).copied().unwrap_or_default() == usage {
            return;
        }
        self.notify(STREAM_USAGE_CHANGE, usage.code());
        self.usages.insert(split, usage);
    }
}

impl AudioNode for RemoteSinkOutputNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::RemoteSinkOutput
    }

    fn output_port_count(&self) -> u16 {
        0
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        let Some(sink) = self.lifecycle.render_sink().cloned() else {
            tracing::warn!(node = %self.info.node_id, "remote render sink missing");
            return false;
        };

        for &buffer in inputs {
            if !buffer.is_valid() && !self.need_empty_chunk {
                continue;
            }
            let split = buffer.split_stream_type();
            self.notify_stream_type_change(buffer.stream_type(), split);
            let usage = if buffer.is_valid() { buffer.stream_usage() } else { StreamUsage::Unknown };
            self.notify_stream_usage_change(usage, split);

            let n = self.info.frame_samples().min(buffer.frame().len());
            convert_from_float(self.info.format, &buffer.frame()[..n], &mut self.frame_data);
            match sink.split_render_frame(&self.frame_data, split) {
                Ok(written) if written == self.frame_data.len() => {}
                Ok(written) => tracing::error!(?split, written, "short split render"),
                Err(e) => tracing::error!(?split, error = %e, "split render failed"),
            }
        }
        self.timing.handle();
        true
    }

    fn output(&self, _port: u16) -> Option<&PcmBuffer> {
        None
    }

    fn reset(&mut self) -> bool {
        self.timing.reset();
        true
    }
}
