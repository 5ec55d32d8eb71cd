//! Capture enhancement chains.
//!
//! An enhancement chain (noise suppression, echo cancellation, ...) is an
//! external plugin. The engine only needs three things from it: the geometry
//! it wants for each capture sub-buffer, a way to run one 20ms frame of
//! S16LE audio through it, and a factory keyed by scene.
//!
//! [`BypassEnhanceChain`] is the built-in chain: it reports the device
//! geometry and copies the mic signal through.

use hpae_core::{EnhanceScene, HpaeError, Result, SampleFormat};

/// Geometry requested by an enhancement algorithm for one sub-buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AudioBufferConfig {
    /// Sample rate in Hz; 0 means the sub-buffer is unused.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Sample format.
    pub format: SampleFormat,
}

impl AudioBufferConfig {
    /// Bytes in one 20ms frame of this geometry.
    pub fn frame_bytes(&self) -> usize {
        hpae_core::frame_len_for_rate(self.sample_rate) * self.channels as usize * self.format.sample_size()
    }
}

/// Algorithm geometry for the three capture sub-buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnhanceAlgoConfig {
    /// Primary microphone.
    pub mic: AudioBufferConfig,
    /// Echo reference.
    pub ec: AudioBufferConfig,
    /// Microphone reference.
    pub mic_ref: AudioBufferConfig,
}

/// Device channel counts passed when creating a chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnhanceDeviceAttr {
    /// Microphone channels.
    pub mic_channels: u32,
    /// Echo reference channels (0 when absent).
    pub ec_channels: u32,
    /// Microphone reference channels (0 when absent).
    pub mic_ref_channels: u32,
    /// Capture sample rate.
    pub sample_rate: u32,
}

/// One frame of S16LE input to a chain. Absent sub-buffers are empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnhanceInput<'a> {
    /// Microphone frame.
    pub mic: &'a [u8],
    /// Echo reference frame.
    pub ec: &'a [u8],
    /// Microphone reference frame.
    pub mic_ref: &'a [u8],
}

/// A capture enhancement algorithm instance.
pub trait EnhanceChain: Send {
    /// Geometry the algorithm wants for each sub-buffer.
    fn algo_config(&self) -> EnhanceAlgoConfig;

    /// Processes one frame; writes `input.mic.len()` bytes to `output`.
    fn apply(&mut self, input: EnhanceInput<'_>, output: &mut [u8]) -> Result<()>;
}

/// Creates chains for a scene key.
pub trait EnhanceChainFactory: Send + Sync {
    /// Builds a chain for `scene_key` (see [`scene_key_code`]).
    fn create(&self, scene_key: u64, attr: &EnhanceDeviceAttr) -> Result<Box<dyn EnhanceChain>>;
}

/// Packs an enhancement scene and capture id into a chain key.
pub fn scene_key_code(scene: EnhanceScene, capture_id: u32) -> u64 {
    ((scene as u64) << 32) | u64::from(capture_id)
}

/// Chain that copies the mic signal through unchanged.
#[derive(Debug, Clone)]
pub struct BypassEnhanceChain {
    config: EnhanceAlgoConfig,
}

impl BypassEnhanceChain {
    /// Chain reporting the device geometry from `attr` in S16LE.
    pub fn new(attr: &EnhanceDeviceAttr) -> Self {
        let cfg = |channels: u32| AudioBufferConfig {
            sample_rate: if channels == 0 { 0 } else { attr.sample_rate },
            channels,
            format: SampleFormat::S16Le,
        };
        Self {
            config: EnhanceAlgoConfig {
                mic: cfg(attr.mic_channels),
                ec: cfg(attr.ec_channels),
                mic_ref: cfg(attr.mic_ref_channels),
            },
        }
    }
}

impl EnhanceChain for BypassEnhanceChain {
    fn algo_config(&self) -> EnhanceAlgoConfig {
        self.config
    }

    fn apply(&mut self, input: EnhanceInput<'_>, output: &mut [u8]) -> Result<()> {
        if output.len() < input.mic.len() {
            return Err(HpaeError::invalid_param("enhance output shorter than mic frame"));
        }
        output[..input.mic.len()].copy_from_slice(input.mic);
        Ok(())
    }
}

/// Factory producing [`BypassEnhanceChain`]s for every scene.
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassEnhanceFactory;

impl EnhanceChainFactory for BypassEnhanceFactory {
    fn create(&self, _scene_key: u64, attr: &EnhanceDeviceAttr) -> Result<Box<dyn EnhanceChain>> {
        if attr.mic_channels == 0 || attr.sample_rate == 0 {
            return Err(HpaeError::invalid_param("enhance chain needs mic channels and a rate"));
        }
        Ok(Box::new(BypassEnhanceChain::new(attr)))
    }
}
