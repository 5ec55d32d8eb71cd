//! HPAE Core - buffers, formats and the node pipeline for the audio engine
//!
//! This crate holds the pieces every other engine crate builds on. Nothing here
//! talks to devices or threads; it is plain data plus the graph that moves
//! fixed-size PCM frames between nodes.
//!
//! # Core Abstractions
//!
//! ## Buffers and Formats
//!
//! - [`PcmBuffer`] - float sample container with valid/silence/finished flags,
//!   stream tags and an optional history ring
//! - [`SampleFormat`] - wire formats (U8, S16LE, S24LE, S32LE, F32LE)
//! - [`convert_to_float`] / [`convert_from_float`] - wire format conversion
//!
//! ## Nodes and Pipelines
//!
//! - [`AudioNode`] - the contract every node implements (`do_process`, `reset`,
//!   `connect`, `disconnect`)
//! - [`NodeInfo`] - per-node audio geometry and routing tags
//! - [`Pipeline`] - arena-indexed DAG of nodes; ports are indices, never pointers
//! - [`NodeStatusCallback`] - notifications from nodes back to their manager
//!
//! ## Sessions
//!
//! - [`StreamInfo`], [`SinkInfo`], [`SourceInfo`] - stream and device descriptions
//! - [`SessionState`], [`StreamManagerState`], [`Operation`] - lifecycle enums
//!
//! # Example
//!
//! ```rust
//! use hpae_core::{PcmBuffer, PcmBufferInfo};
//!
//! let mut buffer = PcmBuffer::new(PcmBufferInfo::new(2, 960, 48000, 3));
//! buffer.reset();
//! assert!(!buffer.is_valid());
//! assert!(buffer.data().iter().all(|&s| s == 0.0));
//! ```
//!
//! # Design Principles
//!
//! - **Single writer**: a pipeline is owned by exactly one thread; nodes never
//!   lock
//! - **No per-frame allocation**: buffers are sized at construction and reused
//! - **Explicit reconfiguration**: geometry changes only through `reconfig`

pub mod clock;
pub mod error;
pub mod format;
pub mod graph;
pub mod node;
pub mod pcm_buffer;
pub mod stream;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{HpaeError, Result};
pub use format::{SampleFormat, convert_from_float, convert_to_float};
pub use graph::{EdgeId, NodeId, Pipeline, PortRef};
pub use node::{AudioNode, NodeInfo, NodeStatusCallback, NodeType};
pub use pcm_buffer::{BufferState, PcmBuffer, PcmBufferInfo};
pub use stream::{
    EcType, EffectMode, EnhanceScene, Operation, PaPowerPolicy, SceneType, SessionState, SinkInfo,
    SourceBufferType, SourceInfo, SourceType, SplitStreamType, StreamClass, StreamInfo,
    StreamManagerState, StreamType, StreamUsage,
};

/// Duration of one processing tick in milliseconds.
pub const FRAME_MS: u32 = 20;

/// Sample rate that is pulled every other tick (40ms client quantum).
pub const SAMPLE_RATE_11025: u32 = 11025;

/// Number of frames in one [`FRAME_MS`] tick at `sample_rate`.
#[inline]
pub fn frame_len_for_rate(sample_rate: u32) -> usize {
    (sample_rate as usize * FRAME_MS as usize) / 1000
}
