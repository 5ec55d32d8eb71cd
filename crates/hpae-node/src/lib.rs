//! HPAE Node - the processing nodes of the audio engine
//!
//! Every node implements [`hpae_core::AudioNode`] and lives in a
//! [`hpae_core::Pipeline`]. A render pipeline looks like
//!
//! ```text
//! SinkInput -> Gain -> [Converter] -> Mixer -> RenderEffect -> Converter -> Mixer -> SinkOutput
//! (per session)                      (per scene cluster)                  (device)
//! ```
//!
//! and a capture pipeline like
//!
//! ```text
//! SourceInput (mic / ec / mic ref ports) -> [CaptureEffect] -> Converter -> SourceOutput
//! ```
//!
//! - [`MixerNode`] - sums inputs, AND-reduces validity, optional limiter
//! - [`GainNode`] - client volume and one-frame fades
//! - [`ConverterNode`] - rate, channel count and frame length conversion
//! - [`RenderEffectNode`] - scene render effect with bypass fallback
//! - [`SinkInputNode`] / [`SourceOutputNode`] - client stream endpoints
//! - [`SinkOutputNode`] / [`RemoteSinkOutputNode`] - render device endpoints
//! - [`SourceInputNode`] - capture device endpoint
//! - [`CaptureEffectNode`] - capture enhancement chain
//! - [`HpaeNode`] - closed enum over all of the above
//!
//! ## Example
//!
//! ```rust
//! use hpae_core::{AudioNode, BufferState, NodeInfo, PcmBuffer};
//! use hpae_node::MixerNode;
//!
//! let info = NodeInfo::default().with_geometry(2, 48000, 960);
//! let mut a = PcmBuffer::new(info.buffer_info());
//! a.data_mut().fill(0.25);
//! a.set_state(BufferState::NONE);
//! let b = a.clone();
//!
//! let mut mixer = MixerNode::new(info);
//! let out = mixer.signal_process(&[&a, &b]).unwrap();
//! assert!(out.is_valid());
//! assert!(out.data().iter().all(|&s| (s - 0.5).abs() < 1e-6));
//! ```

pub mod capture_effect;
pub mod converter;
pub mod gain;
pub mod mixer;
pub mod node;
pub mod remote_sink_output;
pub mod render_effect;
pub mod sink_input;
pub mod sink_output;
pub mod source_input;
pub mod source_output;

pub use capture_effect::CaptureEffectNode;
pub use converter::ConverterNode;
pub use gain::{FadeState, GainNode};
pub use mixer::MixerNode;
pub use node::HpaeNode;
pub use remote_sink_output::{RemoteSinkOutputNode, STREAM_TYPE_CHANGE, STREAM_USAGE_CHANGE};
pub use render_effect::RenderEffectNode;
pub use sink_input::{OFFLOAD_CLASS, SinkInputNode};
pub use sink_output::{PRIMARY_CLASS, REMOTE_CLASS, RemoteTiming, SinkLifecycle, SinkOutputNode};
pub use source_input::SourceInputNode;
pub use source_output::SourceOutputNode;
