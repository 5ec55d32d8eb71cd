//! Render sink abstraction.
//!
//! A [`RenderSink`] is the hardware end of a render pipeline. Every method
//! takes `&self`: a sink is shared between the device context and the sink
//! output node, and implementations keep their state behind atomics or a
//! lock. Lifecycle calls must succeed when the device is already in the
//! requested state.

use hpae_core::{HpaeError, Result, SinkInfo, SplitStreamType};

/// Hardware render device.
pub trait RenderSink: Send + Sync {
    /// Opens the device with the given geometry.
    fn init(&self, info: &SinkInfo) -> Result<()>;

    /// Whether [`init`](Self::init) succeeded and [`deinit`](Self::deinit)
    /// has not run since.
    fn is_inited(&self) -> bool;

    /// Closes the device. Safe to call twice.
    fn deinit(&self);

    /// Starts rendering.
    fn start(&self) -> Result<()>;

    /// Stops rendering.
    fn stop(&self) -> Result<()>;

    /// Pauses without releasing the device.
    fn pause(&self) -> Result<()>;

    /// Resumes after [`pause`](Self::pause).
    fn resume(&self) -> Result<()>;

    /// Drops queued data.
    fn flush(&self) -> Result<()>;

    /// Resets device-side position.
    fn reset(&self) -> Result<()>;

    /// Writes one interleaved frame in the device format. Returns the byte
    /// count accepted.
    fn render_frame(&self, data: &[u8]) -> Result<usize>;

    /// Writes one frame to the sub-stream selected by `split`.
    fn split_render_frame(&self, _data: &[u8], _split: SplitStreamType) -> Result<usize> {
        Err(HpaeError::NotSupported)
    }

    /// Sets the hardware volume.
    fn set_volume(&self, _left: f32, _right: f32) -> Result<()> {
        Err(HpaeError::NotSupported)
    }

    /// Current hardware volume.
    fn volume(&self) -> (f32, f32) {
        (1.0, 1.0)
    }

    /// Device latency in milliseconds.
    fn latency_ms(&self) -> Result<u32> {
        Ok(0)
    }

    /// Applies an audio scene code.
    fn set_audio_scene(&self, _scene: u32) -> Result<()> {
        Ok(())
    }

    /// Frames rendered and the monotonic timestamp of that count.
    fn presentation_position(&self) -> Result<(u64, u64)> {
        Err(HpaeError::NotSupported)
    }

    /// Sets a vendor parameter.
    fn set_audio_parameter(&self, key: &str, condition: &str, value: &str);

    /// Reads a vendor parameter; empty when unknown.
    fn audio_parameter(&self, _key: &str, _condition: &str) -> String {
        String::new()
    }

    /// Powers the speaker amplifier on or off.
    fn set_pa_power(&self, _on: bool) -> Result<()> {
        Err(HpaeError::NotSupported)
    }

    /// Informs the device which application uids are rendering.
    fn update_apps_uid(&self, _uids: &[i32]) -> Result<()> {
        Ok(())
    }

    /// Drains offloaded data.
    fn drain(&self) -> Result<()> {
        Err(HpaeError::NotSupported)
    }

    /// Sets the offload buffer size.
    fn set_buffer_size(&self, _size_ms: u32) -> Result<()> {
        Err(HpaeError::NotSupported)
    }

    /// Mmap buffer geometry as `(total_frames, span_frames)`.
    fn mmap_buffer_info(&self) -> Result<(u32, u32)> {
        Err(HpaeError::NotSupported)
    }
}
