//! HPAE Manager - session management for the audio engine
//!
//! Each open port gets a manager that owns its pipeline on a dedicated
//! thread. Callers post commands; the thread applies them between
//! processing ticks, so nodes never see concurrent writers.
//!
//! - [`RendererManager`] - play sessions of one sink, grouped into scene
//!   clusters
//! - [`CapturerManager`] - record sessions of one source, with shared
//!   enhancement per scene
//! - [`SoftLink`] - a record session feeding a play session through a ring
//! - [`HpaeManager`] - ports, routing, defaults and moves
//! - [`CallbackRegistry`] / [`StreamStatusListener`] - status fan-out
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hpae_config::{EngineSettings, ModuleInfo, ModuleRole};
//! use hpae_core::{SampleFormat, StreamClass, StreamInfo, SystemClock};
//! use hpae_io::DeviceContext;
//! use hpae_manager::HpaeManager;
//!
//! let device = Arc::new(DeviceContext::with_builtin(Arc::new(SystemClock)));
//! let engine = HpaeManager::new(device, EngineSettings::default());
//! let sink = ModuleInfo::new("null_sink", ModuleRole::Sink)
//!     .with_class("null")
//!     .with_format(48000, 2, "s16le", 3840);
//! engine.open_audio_port(&sink).unwrap();
//!
//! engine.create_stream(StreamInfo::play(1, 2, 48000, SampleFormat::S16Le)).unwrap();
//! engine.start(StreamClass::Play, 1).unwrap();
//! ```

mod callback;
mod capturer;
mod context;
mod manager;
mod renderer;
mod session;
mod soft_link;
mod worker;

pub use callback::{CallbackRegistry, StreamStatusListener};
pub use capturer::CapturerManager;
pub use context::ManagerContext;
pub use manager::HpaeManager;
pub use renderer::{MovedSinkInput, RendererManager};
pub use session::{SinkInputInfo, SourceOutputInfo};
pub use soft_link::{
    SOFT_LINK_SESSION_MAX, SOFT_LINK_SESSION_MIN, SoftLink, SoftLinkState, generate_session_id,
};
