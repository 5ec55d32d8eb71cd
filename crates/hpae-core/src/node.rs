//! Node contract and per-node description.
//!
//! Every processing stage implements [`AudioNode`]. A [`Pipeline`](crate::Pipeline)
//! owns nodes, gathers their upstream outputs each tick and calls
//! [`AudioNode::do_process`]. Nodes never hold references to each other;
//! upstream buffers are lent for the duration of one call.
//!
//! Nodes report lifecycle events (underflow, drain, fade completion,
//! topology changes) through a [`NodeStatusCallback`] held weakly in
//! [`NodeInfo`], so a node never keeps its manager alive.

use std::sync::{Arc, Weak};

use crate::format::SampleFormat;
use crate::graph::NodeId;
use crate::pcm_buffer::{PcmBuffer, PcmBufferInfo};
use crate::stream::{
    EffectMode, EnhanceScene, Operation, SceneType, SinkInfo, SourceBufferType, SourceInfo,
    SourceType, SplitStreamType, StreamInfo, StreamType, StreamUsage, default_layout,
};

/// Notifications from nodes to the owning manager.
///
/// Implementations must be cheap and non-blocking; they are called from the
/// processing thread in the middle of a tick.
pub trait NodeStatusCallback: Send + Sync {
    /// Latency in microseconds between the client ring and the device.
    fn on_request_latency(&self, _session_id: u32) -> u64 {
        0
    }

    /// A session changed status (underflow, drained, ...).
    fn on_node_status_update(&self, session_id: u32, operation: Operation);

    /// A gain node finished the fade that precedes `operation`.
    fn on_fade_done(&self, _session_id: u32, _operation: Operation) {}

    /// A node was connected to or disconnected from `pre_node`.
    fn on_notify_dfx_node_info(&self, _connected: bool, _pre_node: NodeId, _info: &NodeInfo) {}
}

/// Kind of a node, for logs and topology dumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Sums inputs.
    Mixer,
    /// Per-session volume and fades.
    Gain,
    /// Rate/channel conversion.
    Converter,
    /// Scene render effect.
    RenderEffect,
    /// Client render stream entry.
    SinkInput,
    /// Device render exit.
    SinkOutput,
    /// Remote (split) device render exit.
    RemoteSinkOutput,
    /// Device capture entry.
    SourceInput,
    /// Capture enhancement.
    CaptureEffect,
    /// Client capture stream exit.
    SourceOutput,
}

/// Audio geometry and routing tags of one node.
#[derive(Clone, Debug, Default)]
pub struct NodeInfo {
    /// Id assigned by the owning pipeline.
    pub node_id: NodeId,
    /// Human-readable name for logs.
    pub node_name: String,
    /// Session the node belongs to, 0 for shared nodes.
    pub session_id: u32,
    /// Channel count.
    pub channels: u32,
    /// Channel layout mask.
    pub channel_layout: u64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Wire format at the node's device or client edge.
    pub format: SampleFormat,
    /// Frames per tick.
    pub frame_len: usize,
    /// Stream content type.
    pub stream_type: StreamType,
    /// Stream usage.
    pub stream_usage: StreamUsage,
    /// Render effect scene.
    pub scene_type: SceneType,
    /// Capture source type.
    pub source_type: SourceType,
    /// Capture sub-buffer kind.
    pub source_buffer_type: SourceBufferType,
    /// Split-stream kind.
    pub split_stream_type: SplitStreamType,
    /// Render effect mode.
    pub effect_mode: EffectMode,
    /// Capture enhancement scene.
    pub enhance_scene: EnhanceScene,
    /// Device class (`"primary"`, `"remote"`, ...).
    pub device_class: String,
    /// Device network id.
    pub device_net_id: String,
    /// History ring depth for sink inputs, 0 disables history.
    pub history_frame_count: usize,
    /// Weak link back to the manager.
    pub status_callback: Option<Weak<dyn NodeStatusCallback>>,
}

impl NodeInfo {
    /// Node info for a client stream.
    pub fn from_stream(stream: &StreamInfo) -> Self {
        Self {
            node_name: format!("session_{}", stream.session_id),
            session_id: stream.session_id,
            channels: stream.channels,
            channel_layout: stream.channel_layout,
            sample_rate: stream.sample_rate,
            format: stream.format,
            frame_len: stream.frame_len,
            stream_type: stream.stream_type,
            stream_usage: stream.stream_usage,
            scene_type: SceneType::from_usage(stream.stream_usage),
            source_type: stream.source_type,
            effect_mode: stream.effect_mode,
            enhance_scene: EnhanceScene::from_source(stream.source_type),
            ..Self::default()
        }
    }

    /// Node info for a render device.
    pub fn from_sink(sink: &SinkInfo) -> Self {
        Self {
            node_name: sink.device_name.clone(),
            channels: sink.channels,
            channel_layout: sink.channel_layout,
            sample_rate: sink.sample_rate,
            format: sink.format,
            frame_len: sink.frame_len,
            device_class: sink.device_class.clone(),
            device_net_id: sink.device_net_id.clone(),
            ..Self::default()
        }
    }

    /// Node info for a capture device (mic geometry).
    pub fn from_source(source: &SourceInfo) -> Self {
        Self {
            node_name: source.source_name.clone(),
            channels: source.channels,
            channel_layout: source.channel_layout,
            sample_rate: source.sample_rate,
            format: source.format,
            frame_len: source.frame_len,
            source_type: source.source_type,
            enhance_scene: EnhanceScene::from_source(source.source_type),
            device_class: source.device_class.clone(),
            device_net_id: source.device_net_id.clone(),
            ..Self::default()
        }
    }

    /// Builder-style status callback setter.
    pub fn with_callback(mut self, callback: Weak<dyn NodeStatusCallback>) -> Self {
        self.status_callback = Some(callback);
        self
    }

    /// Builder-style geometry setter; resets the layout to the default for
    /// `channels`.
    pub fn with_geometry(mut self, channels: u32, sample_rate: u32, frame_len: usize) -> Self {
        self.channels = channels;
        self.channel_layout = default_layout(channels);
        self.sample_rate = sample_rate;
        self.frame_len = frame_len;
        self
    }

    /// Upgraded status callback, if the manager is still alive.
    pub fn callback(&self) -> Option<Arc<dyn NodeStatusCallback>> {
        self.status_callback.as_ref().and_then(Weak::upgrade)
    }

    /// Single-tick buffer geometry.
    pub fn buffer_info(&self) -> PcmBufferInfo {
        PcmBufferInfo::new(self.channels, self.frame_len, self.sample_rate, self.channel_layout)
    }

    /// Samples per tick.
    #[inline]
    pub fn frame_samples(&self) -> usize {
        self.channels as usize * self.frame_len
    }

    /// Bytes per tick in the node's wire format.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * self.format.sample_size()
    }
}

/// Contract every pipeline node implements.
pub trait AudioNode: Send {
    /// Description of the node.
    fn node_info(&self) -> &NodeInfo;

    /// Mutable description, used by the pipeline to assign the id.
    fn node_info_mut(&mut self) -> &mut NodeInfo;

    /// Node kind.
    fn node_type(&self) -> NodeType;

    /// Number of output ports. Terminal nodes return 0.
    fn output_port_count(&self) -> u16 {
        1
    }

    /// Processes one tick.
    ///
    /// `inputs` holds the outputs of every upstream node that produced data
    /// this tick, in edge order. Returns `true` if the node produced output.
    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool;

    /// Buffer produced on `port` by the last [`do_process`](Self::do_process).
    fn output(&self, port: u16) -> Option<&PcmBuffer>;

    /// Clears internal state. Returns `false` if the node cannot be reset.
    fn reset(&mut self) -> bool {
        true
    }

    /// Called after an edge from `pre` into this node was added.
    fn connect(&mut self, pre: &NodeInfo) {
        let info = self.node_info();
        if let Some(cb) = info.callback() {
            cb.on_notify_dfx_node_info(true, pre.node_id, info);
        }
    }

    /// Called after an edge from `pre` into this node was removed.
    fn disconnect(&mut self, pre: &NodeInfo) {
        let info = self.node_info();
        if let Some(cb) = info.callback() {
            cb.on_notify_dfx_node_info(false, pre.node_id, info);
        }
    }
}
