//! Session, stream and device descriptions.
//!
//! These are plain data records passed from the service layer into the
//! managers and from the managers into node constructors. Enum discriminants
//! are stable because some of them travel to devices as strings
//! (`"{render_id}-{value}"` parameter notifications).

use core::fmt;
use std::time::Duration;

use crate::format::SampleFormat;

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Allocated, not yet created on a pipeline.
    #[default]
    New,
    /// Created and connected to a manager, not processing.
    Prepared,
    /// Connected and processing.
    Running,
    /// Fading out before pause.
    Pausing,
    /// Disconnected after a pause.
    Paused,
    /// Fading out before stop.
    Stopping,
    /// Disconnected after a stop.
    Stopped,
    /// Destroyed; terminal.
    Released,
}

impl SessionState {
    /// States in which the session's nodes are connected to the output.
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Running | Self::Pausing | Self::Stopping)
    }
}

/// Lifecycle of a device-facing node (sink output, source input).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StreamManagerState {
    /// Constructed, device not initialized.
    #[default]
    New,
    /// Device initialized, not started.
    Idle,
    /// Device started.
    Running,
    /// Device paused or stopped.
    Suspended,
    /// Device deinitialized; terminal.
    Released,
}

/// Status reported from nodes and managers to stream owners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// The session started.
    Started,
    /// The session paused.
    Paused,
    /// The session stopped.
    Stopped,
    /// Buffered data was discarded.
    Flushed,
    /// All written data was played.
    Drained,
    /// The session was released.
    Released,
    /// The write callback could not supply a frame.
    Underflow,
    /// The session moved to another device.
    Moved,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Flushed => "flushed",
            Self::Drained => "drained",
            Self::Released => "released",
            Self::Underflow => "underflow",
            Self::Moved => "moved",
        };
        f.write_str(name)
    }
}

/// Direction of a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StreamClass {
    /// Render (playback).
    #[default]
    Play,
    /// Capture (record).
    Record,
}

/// Content type of a render stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StreamType {
    /// Phone call.
    VoiceCall = 0,
    /// Music and general media.
    #[default]
    Music = 1,
    /// Ringtone.
    Ring = 2,
    /// Movie soundtrack.
    Media = 3,
    /// Alarm.
    Alarm = 4,
    /// Notification.
    Notification = 5,
    /// Navigation prompts.
    Navigation = 13,
    /// VoIP call.
    VoiceCommunication = 17,
}

impl StreamType {
    /// Stable integer code.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Declared usage of a render stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StreamUsage {
    /// Unknown usage.
    #[default]
    Unknown = 0,
    /// Music playback.
    Music = 1,
    /// VoIP.
    VoiceCommunication = 2,
    /// Voice assistant.
    VoiceAssistant = 3,
    /// Alarm.
    Alarm = 4,
    /// Voice message.
    VoiceMessage = 5,
    /// Ringtone.
    Ringtone = 6,
    /// Notification.
    Notification = 7,
    /// Video or movie soundtrack.
    Movie = 10,
    /// Game audio.
    Game = 11,
    /// Navigation prompts.
    Navigation = 13,
}

impl StreamUsage {
    /// Stable integer code.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Capture source type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// Generic microphone.
    #[default]
    Mic,
    /// Voice recognition.
    VoiceRecognition,
    /// Loopback of the render mix.
    PlaybackCapture,
    /// Wakeup word detection.
    Wakeup,
    /// VoIP uplink.
    VoiceCommunication,
    /// Remote cast capture.
    RemoteCast,
}

impl SourceType {
    /// Whether invalid buffers are still forwarded to the client.
    pub const fn forwards_invalid(self) -> bool {
        matches!(self, Self::PlaybackCapture | Self::RemoteCast)
    }
}

/// Capture sub-buffer kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SourceBufferType {
    /// Primary microphone signal.
    #[default]
    Mic,
    /// Echo reference.
    Ec,
    /// Microphone reference.
    MicRef,
}

impl SourceBufferType {
    /// All kinds, in output-port order.
    pub const ALL: [Self; 3] = [Self::Mic, Self::Ec, Self::MicRef];

    /// Output port index on a source input node.
    pub const fn port(self) -> u16 {
        match self {
            Self::Mic => 0,
            Self::Ec => 1,
            Self::MicRef => 2,
        }
    }
}

/// Semantic sub-stream for split (remote) rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SplitStreamType {
    /// Not split.
    #[default]
    Default = 0,
    /// Media sub-stream.
    Media = 1,
    /// Navigation sub-stream.
    Navigation = 2,
    /// Communication sub-stream.
    Communication = 3,
}

impl SplitStreamType {
    /// Stable integer code.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Render effect scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SceneType {
    /// Anything without a dedicated scene.
    #[default]
    Others,
    /// Music.
    Music,
    /// Movie.
    Movie,
    /// Game.
    Game,
    /// Speech.
    Speech,
    /// Ringtone.
    Ring,
    /// Sessions that bypass effects.
    EffectNone,
}

impl SceneType {
    /// Scene for a stream usage.
    pub const fn from_usage(usage: StreamUsage) -> Self {
        match usage {
            StreamUsage::Music => Self::Music,
            StreamUsage::Movie => Self::Movie,
            StreamUsage::Game => Self::Game,
            StreamUsage::VoiceCommunication | StreamUsage::VoiceAssistant | StreamUsage::VoiceMessage => {
                Self::Speech
            }
            StreamUsage::Ringtone | StreamUsage::Alarm | StreamUsage::Notification => Self::Ring,
            StreamUsage::Unknown | StreamUsage::Navigation => Self::Others,
        }
    }

    /// Lowercase name used in effect scene keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Others => "others",
            Self::Music => "music",
            Self::Movie => "movie",
            Self::Game => "game",
            Self::Speech => "speech",
            Self::Ring => "ring",
            Self::EffectNone => "effect_none",
        }
    }
}

/// Render effect mode of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EffectMode {
    /// Bypass scene effects.
    None,
    /// Apply the scene effect.
    #[default]
    Default,
}

/// Capture enhancement scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnhanceScene {
    /// No enhancement.
    #[default]
    None,
    /// Recording.
    Record,
    /// VoIP uplink.
    VoipUp,
    /// Voice recognition.
    Asr,
}

impl EnhanceScene {
    /// Scene for a capture source type.
    pub const fn from_source(source: SourceType) -> Self {
        match source {
            SourceType::Mic => Self::Record,
            SourceType::VoiceCommunication => Self::VoipUp,
            SourceType::VoiceRecognition | SourceType::Wakeup => Self::Asr,
            SourceType::PlaybackCapture | SourceType::RemoteCast => Self::None,
        }
    }

    /// Lowercase name used in effect scene keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Record => "record",
            Self::VoipUp => "voip_up",
            Self::Asr => "asr",
        }
    }
}

/// Echo reference routing of a capture source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EcType {
    /// No echo reference.
    #[default]
    None,
    /// Echo reference comes with the mic frames from the same adapter.
    SameAdapter,
    /// Echo reference is captured from a separate adapter.
    DifferentAdapter,
}

/// Stream description submitted on `create_stream`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamInfo {
    /// Session id; the key for every later lookup.
    pub session_id: u32,
    /// Direction.
    pub stream_class: StreamClass,
    /// Channel count.
    pub channels: u32,
    /// Channel layout mask.
    pub channel_layout: u64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Wire format of the client buffer.
    pub format: SampleFormat,
    /// Frames per client quantum.
    pub frame_len: usize,
    /// Stream content type.
    pub stream_type: StreamType,
    /// Stream usage.
    pub stream_usage: StreamUsage,
    /// Capture source type (record streams).
    pub source_type: SourceType,
    /// Render effect mode.
    pub effect_mode: EffectMode,
    /// Owning application uid.
    pub uid: i32,
    /// Owning process id.
    pub pid: i32,
    /// Target device name; empty routes to the default device.
    pub device_name: String,
    /// Extra latency budget in microseconds.
    pub latency_us: u64,
}

impl StreamInfo {
    /// Render stream with the given geometry.
    pub fn play(session_id: u32, channels: u32, sample_rate: u32, format: SampleFormat) -> Self {
        Self {
            session_id,
            stream_class: StreamClass::Play,
            channels,
            channel_layout: default_layout(channels),
            sample_rate,
            format,
            frame_len: crate::frame_len_for_rate(sample_rate),
            ..Self::default()
        }
    }

    /// Capture stream with the given geometry.
    pub fn record(session_id: u32, channels: u32, sample_rate: u32, format: SampleFormat) -> Self {
        Self {
            stream_class: StreamClass::Record,
            ..Self::play(session_id, channels, sample_rate, format)
        }
    }
}

/// Render device description.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SinkInfo {
    /// Unique sink name.
    pub device_name: String,
    /// HDI adapter name.
    pub adapter_name: String,
    /// Device class (`"primary"`, `"remote"`, `"offload"`, `"file_io"`, ...).
    pub device_class: String,
    /// Network id; `"LocalDevice"` for local devices.
    pub device_net_id: String,
    /// Device type code.
    pub device_type: i32,
    /// Output file path for file devices.
    pub file_path: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Channel layout mask.
    pub channel_layout: u64,
    /// Device wire format.
    pub format: SampleFormat,
    /// Frames per tick.
    pub frame_len: usize,
    /// Fixed latency flag.
    pub fixed_latency: bool,
    /// Whether offload streams may request data.
    pub offload_enable: bool,
    /// Whether split rendering pushes frames even when invalid.
    pub need_empty_chunk: bool,
}

/// Capture device description.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceInfo {
    /// Unique source name.
    pub source_name: String,
    /// HDI adapter name.
    pub adapter_name: String,
    /// Device class.
    pub device_class: String,
    /// Network id.
    pub device_net_id: String,
    /// Device type code.
    pub device_type: i32,
    /// Input file path for file devices.
    pub file_path: String,
    /// Capture source type.
    pub source_type: SourceType,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Channel layout mask.
    pub channel_layout: u64,
    /// Device wire format.
    pub format: SampleFormat,
    /// Frames per tick.
    pub frame_len: usize,
    /// Echo reference routing.
    pub ec_type: EcType,
    /// Echo reference adapter.
    pub ec_adapter_name: String,
    /// Echo reference rate.
    pub ec_sample_rate: u32,
    /// Echo reference format.
    pub ec_format: SampleFormat,
    /// Echo reference channels.
    pub ec_channels: u32,
    /// Whether a microphone reference is captured.
    pub mic_ref_enabled: bool,
    /// Microphone reference rate.
    pub mic_ref_sample_rate: u32,
    /// Microphone reference format.
    pub mic_ref_format: SampleFormat,
    /// Microphone reference channels.
    pub mic_ref_channels: u32,
}

/// Speaker amplifier power policy for primary sinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaPowerPolicy {
    /// Continuous silence before the amplifier is powered down.
    pub close_after: Duration,
    /// Interval at which a persistent power-down is logged.
    pub monitor_interval: Duration,
}

impl Default for PaPowerPolicy {
    fn default() -> Self {
        Self {
            close_after: Duration::from_secs(4),
            monitor_interval: Duration::from_secs(300),
        }
    }
}

/// Conventional layout mask for `channels` (front left/right first).
pub const fn default_layout(channels: u32) -> u64 {
    match channels {
        0 => 0,
        1 => 0x4,
        2 => 0x3,
        n if n >= 64 => u64::MAX,
        n => (1u64 << n) - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_states() {
        assert!(SessionState::Running.is_connected());
        assert!(SessionState::Stopping.is_connected());
        assert!(!SessionState::Paused.is_connected());
        assert!(!SessionState::Prepared.is_connected());
    }

    #[test]
    fn invalid_forwarding_sources() {
        assert!(SourceType::PlaybackCapture.forwards_invalid());
        assert!(SourceType::RemoteCast.forwards_invalid());
        assert!(!SourceType::Mic.forwards_invalid());
    }

    #[test]
    fn stream_info_constructors() {
        let info = StreamInfo::play(7, 2, 48000, SampleFormat::S16Le);
        assert_eq!(info.frame_len, 960);
        assert_eq!(info.channel_layout, 0x3);
        let rec = StreamInfo::record(8, 1, 16000, SampleFormat::S16Le);
        assert_eq!(rec.stream_class, StreamClass::Record);
        assert_eq!(rec.frame_len, 320);
    }

    #[test]
    fn scene_mapping() {
        assert_eq!(SceneType::from_usage(StreamUsage::Music), SceneType::Music);
        assert_eq!(SceneType::from_usage(StreamUsage::Unknown), SceneType::Others);
        assert_eq!(
            EnhanceScene::from_source(SourceType::VoiceCommunication),
            EnhanceScene::VoipUp
        );
    }

    #[test]
    fn power_policy_defaults() {
        let p = PaPowerPolicy::default();
        assert_eq!(p.close_after, Duration::from_secs(4));
        assert_eq!(p.monitor_interval, Duration::from_secs(300));
    }

    #[test]
    fn layouts() {
        assert_eq!(default_layout(1), 0x4);
        assert_eq!(default_layout(6), 0x3F);
    }
}
