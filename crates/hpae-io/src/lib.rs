//! Device and client I/O for the HPAE audio engine.
//!
//! This crate provides:
//!
//! - **Device traits**: [`RenderSink`] and [`CaptureSource`], the hardware
//!   abstraction the sink/source nodes drive
//! - **Device context**: [`DeviceContext`] maps `(class, network id)` pairs to
//!   device ids and instances, built from per-class factories
//! - **Built-in devices**: null devices for tests and headless runs, WAV file
//!   devices for offline rendering
//! - **Client callbacks**: [`WriteCallback`] / [`ReadCallback`], and ring-backed
//!   implementations over [`AudioRingBuffer`]
//! - **WAV helpers**: [`read_wav`], [`write_wav`], [`read_wav_info`]
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use hpae_core::{ManualClock, SinkInfo};
//! use hpae_io::{DeviceContext, RenderSink};
//!
//! let ctx = DeviceContext::with_builtin(Arc::new(ManualClock::new()));
//! let id = ctx.get_render_id("null", "");
//! let sink = ctx.render_sink(id).unwrap();
//! sink.init(&SinkInfo::default()).unwrap();
//! assert!(sink.is_inited());
//! ```

mod callback;
mod context;
mod file;
mod null;
mod ring;
mod ring_stream;
mod sink;
mod source;
mod wav;

pub use callback::{ReadCallback, ReadRequest, WriteCallback, WriteRequest};
pub use context::{
    CaptureFactory, DeviceContext, FILE_IO_CLASS, LOCAL_NETWORK_ID, NULL_CLASS, RenderFactory,
};
pub use file::{FileCaptureSource, FileRenderSink};
pub use null::{NullCaptureSource, NullRenderSink};
pub use ring::{AudioRingBuffer, RingStatus, SpanInfo, SpanStatus};
pub use ring_stream::{RingReadCallback, RingWriteCallback};
pub use sink::RenderSink;
pub use source::{CaptureFrames, CaptureSource};
pub use wav::{WavInfo, WavSpec, read_wav, read_wav_info, write_wav};
