//! Audio port module descriptions and their conversion to device info.

use std::str::FromStr;

use hpae_core::stream::default_layout;
use hpae_core::{EcType, SampleFormat, SinkInfo, SourceInfo, SourceType};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Whether a module opens a render sink or a capture source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleRole {
    /// Render sink.
    #[default]
    Sink,
    /// Capture source.
    Source,
}

/// One audio port as it appears in a `[[sink]]` or `[[source]]` table.
///
/// All fields are optional in TOML. Missing numeric fields are zero and
/// are rejected by [`to_sink_info`](Self::to_sink_info) and
/// [`to_source_info`](Self::to_source_info) where they matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleInfo {
    /// Sink or source. Set from the table the module was declared in.
    pub role: ModuleRole,
    /// Loader library name, informational.
    pub lib: String,
    /// Unique port name (`"Speaker"`, `"Built_in_mic"`).
    pub name: String,
    /// HDI adapter name.
    pub adapter_name: String,
    /// Device class (`"primary"`, `"remote"`, `"file_io"`, `"null"`).
    pub class_name: String,
    /// Network id of the device.
    pub network_id: String,
    /// Device type code.
    pub device_type: i32,
    /// WAV path for file devices.
    pub file_name: String,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Sample format (`"s16le"`, `"f32"`, ...).
    pub format: String,
    /// Bytes per device buffer.
    pub buffer_size: usize,
    /// Fixed latency flag.
    pub fixed_latency: bool,
    /// Offload streams may request data.
    pub offload_enable: bool,
    /// Split rendering pushes empty chunks.
    pub need_empty_chunk: bool,
    /// Capture source type (`"mic"`, `"voice_communication"`, ...).
    pub source_type: String,
    /// Echo reference routing (`"none"`, `"same_adapter"`, `"different_adapter"`).
    pub ec_type: String,
    /// Echo reference adapter.
    pub ec_adapter: String,
    /// Echo reference rate.
    pub ec_rate: u32,
    /// Echo reference format.
    pub ec_format: String,
    /// Echo reference channels.
    pub ec_channels: u32,
    /// Capture a microphone reference.
    pub open_mic_ref: bool,
    /// Microphone reference rate.
    pub mic_ref_rate: u32,
    /// Microphone reference format.
    pub mic_ref_format: String,
    /// Microphone reference channels.
    pub mic_ref_channels: u32,
}

impl Default for ModuleInfo {
    fn default() -> Self {
        Self {
            role: ModuleRole::Sink,
            lib: String::new(),
            name: String::new(),
            adapter_name: String::new(),
            class_name: String::new(),
            network_id: "LocalDevice".to_string(),
            device_type: 0,
            file_name: String::new(),
            rate: 0,
            channels: 0,
            format: "s16le".to_string(),
            buffer_size: 0,
            fixed_latency: false,
            offload_enable: false,
            need_empty_chunk: false,
            source_type: "mic".to_string(),
            ec_type: "none".to_string(),
            ec_adapter: String::new(),
            ec_rate: 0,
            ec_format: "s16le".to_string(),
            ec_channels: 0,
            open_mic_ref: false,
            mic_ref_rate: 0,
            mic_ref_format: "s16le".to_string(),
            mic_ref_channels: 0,
        }
    }
}

impl ModuleInfo {
    /// Create a module with a name and role and default everything else.
    pub fn new(name: impl Into<String>, role: ModuleRole) -> Self {
        Self {
            name: name.into(),
            role,
            ..Default::default()
        }
    }

    /// Builder: set the device class.
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    /// Builder: set rate, channel count, format and buffer size.
    pub fn with_format(mut self, rate: u32, channels: u32, format: &str, buffer_size: usize) -> Self {
        self.rate = rate;
        self.channels = channels;
        self.format = format.to_string();
        self.buffer_size = buffer_size;
        self
    }

    /// Builder: set the WAV path for file devices.
    pub fn with_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Whether this module opens a capture source.
    pub fn is_source(&self) -> bool {
        self.role == ModuleRole::Source
    }

    fn check_geometry(&self) -> Result<SampleFormat, ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::invalid_module(&self.name, "channels is 0"));
        }
        if self.rate == 0 {
            return Err(ConfigError::invalid_module(&self.name, "rate is 0"));
        }
        parse_format(&self.format)
    }

    fn frame_len(&self, format: SampleFormat) -> usize {
        self.buffer_size / (self.channels as usize * format.sample_size())
    }

    /// Render sink description for this module.
    pub fn to_sink_info(&self) -> Result<SinkInfo, ConfigError> {
        let format = self.check_geometry()?;
        let info = SinkInfo {
            device_name: self.name.clone(),
            adapter_name: self.adapter_name.clone(),
            device_class: self.class_name.clone(),
            device_net_id: self.network_id.clone(),
            device_type: self.device_type,
            file_path: self.file_name.clone(),
            sample_rate: self.rate,
            channels: self.channels,
            channel_layout: default_layout(self.channels),
            format,
            frame_len: self.frame_len(format),
            fixed_latency: self.fixed_latency,
            offload_enable: self.offload_enable,
            need_empty_chunk: self.need_empty_chunk,
        };
        if info.frame_len == 0 {
            return Err(ConfigError::invalid_module(
                &self.name,
                "buffer_size is smaller than one frame",
            ));
        }
        tracing::debug!(
            name = %info.device_name,
            class = %info.device_class,
            rate = info.sample_rate,
            channels = info.channels,
            frame_len = info.frame_len,
            "sink module"
        );
        Ok(info)
    }

    /// Capture source description for this module.
    pub fn to_source_info(&self) -> Result<SourceInfo, ConfigError> {
        let format = self.check_geometry()?;
        let ec_type = parse_ec_type(&self.ec_type)?;
        let info = SourceInfo {
            source_name: self.name.clone(),
            adapter_name: self.adapter_name.clone(),
            device_class: self.class_name.clone(),
            device_net_id: self.network_id.clone(),
            device_type: self.device_type,
            file_path: self.file_name.clone(),
            source_type: parse_source_type(&self.source_type)?,
            sample_rate: self.rate,
            channels: self.channels,
            channel_layout: default_layout(self.channels),
            format,
            frame_len: self.frame_len(format),
            ec_type,
            ec_adapter_name: self.ec_adapter.clone(),
            ec_sample_rate: self.ec_rate,
            ec_format: parse_format(&self.ec_format)?,
            ec_channels: self.ec_channels,
            mic_ref_enabled: self.open_mic_ref,
            mic_ref_sample_rate: self.mic_ref_rate,
            mic_ref_format: parse_format(&self.mic_ref_format)?,
            mic_ref_channels: self.mic_ref_channels,
        };
        if info.frame_len == 0 {
            return Err(ConfigError::invalid_module(
                &self.name,
                "buffer_size is smaller than one frame",
            ));
        }
        if ec_type != EcType::None && (self.ec_rate == 0 || self.ec_channels == 0) {
            return Err(ConfigError::invalid_module(
                &self.name,
                "echo reference needs ec_rate and ec_channels",
            ));
        }
        if self.open_mic_ref && (self.mic_ref_rate == 0 || self.mic_ref_channels == 0) {
            return Err(ConfigError::invalid_module(
                &self.name,
                "mic reference needs mic_ref_rate and mic_ref_channels",
            ));
        }
        tracing::debug!(
            name = %info.source_name,
            class = %info.device_class,
            rate = info.sample_rate,
            channels = info.channels,
            ec = ?info.ec_type,
            mic_ref = info.mic_ref_enabled,
            "source module"
        );
        Ok(info)
    }
}

/// Parse a sample format string.
pub fn parse_format(s: &str) -> Result<SampleFormat, ConfigError> {
    SampleFormat::from_str(s).map_err(|_| ConfigError::UnknownFormat(s.to_string()))
}

/// Parse a capture source type name.
pub fn parse_source_type(s: &str) -> Result<SourceType, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "" | "mic" => Ok(SourceType::Mic),
        "voice_recognition" => Ok(SourceType::VoiceRecognition),
        "playback_capture" => Ok(SourceType::PlaybackCapture),
        "wakeup" => Ok(SourceType::Wakeup),
        "voice_communication" => Ok(SourceType::VoiceCommunication),
        "remote_cast" => Ok(SourceType::RemoteCast),
        _ => Err(ConfigError::unknown_value("source type", s)),
    }
}

/// Parse an echo reference routing name.
pub fn parse_ec_type(s: &str) -> Result<EcType, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "" | "none" => Ok(EcType::None),
        "same_adapter" => Ok(EcType::SameAdapter),
        "different_adapter" => Ok(EcType::DifferentAdapter),
        _ => Err(ConfigError::unknown_value("ec type", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaker() -> ModuleInfo {
        ModuleInfo::new("Speaker", ModuleRole::Sink)
            .with_class("primary")
            .with_format(48000, 2, "s16le", 3840)
    }

    #[test]
    fn sink_frame_len_from_buffer_size() {
        let info = speaker().to_sink_info().unwrap();
        assert_eq!(info.device_name, "Speaker");
        assert_eq!(info.device_class, "primary");
        assert_eq!(info.format, SampleFormat::S16Le);
        assert_eq!(info.frame_len, 960);
        assert_eq!(info.channel_layout, 0x3);
        assert_eq!(info.device_net_id, "LocalDevice");
    }

    #[test]
    fn short_format_spelling() {
        let info = speaker().with_format(48000, 2, "F32", 7680).to_sink_info().unwrap();
        assert_eq!(info.format, SampleFormat::F32Le);
        assert_eq!(info.frame_len, 960);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(
            speaker().with_format(48000, 0, "s16", 3840).to_sink_info(),
            Err(ConfigError::InvalidModule { .. })
        ));
        assert!(matches!(
            speaker().with_format(0, 2, "s16", 3840).to_sink_info(),
            Err(ConfigError::InvalidModule { .. })
        ));
        assert!(matches!(
            speaker().with_format(48000, 2, "s12", 3840).to_sink_info(),
            Err(ConfigError::UnknownFormat(ref f)) if f == "s12"
        ));
        assert!(speaker().with_format(48000, 2, "s16", 2).to_sink_info().is_err());
    }

    #[test]
    fn source_with_echo_reference() {
        let mut module = ModuleInfo::new("Built_in_mic", ModuleRole::Source)
            .with_class("primary")
            .with_format(16000, 1, "s16le", 640);
        module.source_type = "voice_communication".into();
        module.ec_type = "same_adapter".into();
        module.ec_rate = 48000;
        module.ec_channels = 2;
        let info = module.to_source_info().unwrap();
        assert_eq!(info.frame_len, 320);
        assert_eq!(info.source_type, SourceType::VoiceCommunication);
        assert_eq!(info.ec_type, EcType::SameAdapter);
        assert_eq!(info.ec_format, SampleFormat::S16Le);
        assert!(!info.mic_ref_enabled);

        module.ec_channels = 0;
        assert!(module.to_source_info().is_err());
    }

    #[test]
    fn unknown_enum_names() {
        assert!(parse_source_type("laser").is_err());
        assert_eq!(parse_ec_type("").unwrap(), EcType::None);
        assert_eq!(parse_source_type("Wakeup").unwrap(), SourceType::Wakeup);
    }
}
