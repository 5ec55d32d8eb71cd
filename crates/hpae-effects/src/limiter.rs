//! Linked lookahead peak limiter for the mixer output.
//!
//! The mixer sums an unbounded number of streams, so its output can exceed
//! full scale. The limiter delays the interleaved signal by a short lookahead
//! window and scans that window for the loudest sample across all channels;
//! the gain applied to the delayed frame is never larger than
//! `threshold / peak`, so the output never exceeds the threshold.
//!
//! # Algorithm
//!
//! 1. Write the incoming frame (all channels) into a circular delay buffer.
//! 2. Scan the whole window for the maximum absolute sample (linked, so every
//!    channel gets identical gain and the stereo image does not shift).
//! 3. Target gain is `threshold / peak` when `peak > threshold`, else 1.0.
//! 4. Instant attack (lookahead already anticipates the peak) and one-pole
//!    exponential release: `g = c·g + (1 − c)·target`.
//! 5. Output the oldest frame in the window scaled by `g`.
//!
//! The limiter is configured once for a fixed frame geometry and only
//! supports 32-bit float samples.

use hpae_core::{HpaeError, Result};
use libm::{expf, fabsf, powf};

/// Default ceiling, in dBFS.
const DEFAULT_THRESHOLD_DB: f32 = -1.0;
/// Default release time constant.
const DEFAULT_RELEASE_MS: f32 = 100.0;
/// Default lookahead window.
const DEFAULT_LOOKAHEAD_MS: f32 = 2.0;

/// Peak limiter over interleaved float frames.
#[derive(Debug, Clone)]
pub struct AudioLimiter {
    node_id: u32,
    sample_rate: u32,
    channels: usize,
    /// Samples per processing call, from `set_config`.
    request_samples: usize,
    threshold: f32,
    release_coeff: f32,
    /// Window length in frames, including the frame being output.
    window_frames: usize,
    /// Interleaved delay line, `window_frames × channels`.
    delay: Vec<f32>,
    write_frame: usize,
    gain: f32,
    configured: bool,
}

impl AudioLimiter {
    /// Creates an unconfigured limiter owned by mixer `node_id`.
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            sample_rate: 0,
            channels: 0,
            request_samples: 0,
            threshold: db_to_linear(DEFAULT_THRESHOLD_DB),
            release_coeff: 0.0,
            window_frames: 1,
            delay: Vec::new(),
            write_frame: 0,
            gain: 1.0,
            configured: false,
        }
    }

    /// Configures the limiter for a fixed request size.
    ///
    /// `max_request` is the byte size of one processing call and must be a
    /// whole number of frames; `sample_size` must be 4 (float).
    pub fn set_config(
        &mut self,
        max_request: usize,
        sample_size: usize,
        sample_rate: u32,
        channels: u32,
    ) -> Result<()> {
        if sample_size != size_of::<f32>() {
            return Err(HpaeError::invalid_param(format!(
                "limiter supports float samples only, got {sample_size}-byte samples"
            )));
        }
        if sample_rate == 0 || channels == 0 {
            return Err(HpaeError::invalid_param("limiter needs a non-zero rate and channel count"));
        }
        let frame_bytes = sample_size * channels as usize;
        if max_request == 0 || max_request % frame_bytes != 0 {
            return Err(HpaeError::invalid_param(format!(
                "request of {max_request} bytes is not a whole number of {channels}-channel frames"
            )));
        }

        self.sample_rate = sample_rate;
        self.channels = channels as usize;
        self.request_samples = max_request / sample_size;
        self.release_coeff = compute_release_coeff(DEFAULT_RELEASE_MS, sample_rate as f32);
        self.window_frames = ms_to_frames(DEFAULT_LOOKAHEAD_MS, sample_rate as f32) + 1;
        self.delay = vec![0.0; self.window_frames * self.channels];
        self.write_frame = 0;
        self.gain = 1.0;
        self.configured = true;
        Ok(())
    }

    /// Sets the ceiling in dBFS, clamped to \[-30, 0\].
    pub fn set_threshold_db(&mut self, db: f32) {
        self.threshold = db_to_linear(db.clamp(-30.0, 0.0));
    }

    /// Linear ceiling.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Owning mixer node.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Whether `set_config` succeeded.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Samples per call fixed by `set_config`.
    pub fn request_samples(&self) -> usize {
        self.request_samples
    }

    /// Delay introduced by the lookahead, in frames.
    pub fn latency_frames(&self) -> usize {
        self.window_frames.saturating_sub(1)
    }

    /// Clears the delay line and restores unity gain.
    pub fn reset(&mut self) {
        self.delay.fill(0.0);
        self.write_frame = 0;
        self.gain = 1.0;
    }

    /// Limits `sample_count` interleaved samples from `input` into `output`.
    ///
    /// Unconfigured limiters copy the input through. Only whole frames
    /// within both slices are processed.
    pub fn process(&mut self, sample_count: usize, input: &[f32], output: &mut [f32]) {
        let n = sample_count.min(input.len()).min(output.len());
        if !self.configured {
            output[..n].copy_from_slice(&input[..n]);
            return;
        }

        let ch = self.channels;
        for (frame_in, frame_out) in input[..n].chunks_exact(ch).zip(output[..n].chunks_exact_mut(ch)) {
            let write = self.write_frame * ch;
            self.delay[write..write + ch].copy_from_slice(frame_in);

            let peak = self.delay.iter().fold(0.0f32, |p, &s| p.max(fabsf(s)));
            let target = if peak > self.threshold { self.threshold / peak } else { 1.0 };
            self.gain = if target < self.gain {
                target
            } else {
                self.release_coeff * self.gain + (1.0 - self.release_coeff) * target
            };
            // Release must not lift the gain above what the window allows.
            self.gain = self.gain.min(target);

            // Oldest frame in the window.
            let read = ((self.write_frame + 1) % self.window_frames) * ch;
            for (o, &d) in frame_out.iter_mut().zip(&self.delay[read..read + ch]) {
                *o = d * self.gain;
            }
            self.write_frame = (self.write_frame + 1) % self.window_frames;
        }
    }
}

/// Converts decibels to a linear amplitude ratio.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    powf(10.0, db / 20.0)
}

#[inline]
fn ms_to_frames(ms: f32, sample_rate: f32) -> usize {
    ((ms * sample_rate) / 1000.0) as usize
}

/// One-pole coefficient: `exp(-1 / (release_ms · rate / 1000))`.
#[inline]
fn compute_release_coeff(release_ms: f32, sample_rate: f32) -> f32 {
    let tau = release_ms * sample_rate / 1000.0;
    if tau < 1.0 { 0.0 } else { expf(-1.0 / tau) }
}
