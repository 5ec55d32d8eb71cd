//! Capture source abstraction.
//!
//! Mirrors [`RenderSink`](crate::RenderSink) for the capture side. A source
//! may deliver an echo reference and a microphone reference together with
//! the mic frame through [`CaptureSource::capture_frame_with_ec`].

use hpae_core::{HpaeError, Result, SourceInfo};

/// Buffers filled by one echo-aware capture call.
#[derive(Debug)]
pub struct CaptureFrames<'a> {
    /// Microphone frame.
    pub mic: &'a mut [u8],
    /// Echo reference frame, when configured.
    pub ec: Option<&'a mut [u8]>,
    /// Microphone reference frame, when configured.
    pub mic_ref: Option<&'a mut [u8]>,
}

/// Hardware capture device.
pub trait CaptureSource: Send + Sync {
    /// Opens the device with the given geometry.
    fn init(&self, info: &SourceInfo) -> Result<()>;

    /// Whether the device is open.
    fn is_inited(&self) -> bool;

    /// Closes the device. Safe to call twice.
    fn deinit(&self);

    /// Starts capturing.
    fn start(&self) -> Result<()>;

    /// Stops capturing.
    fn stop(&self) -> Result<()>;

    /// Pauses capturing.
    fn pause(&self) -> Result<()> {
        self.stop()
    }

    /// Resumes after [`pause`](Self::pause).
    fn resume(&self) -> Result<()> {
        self.start()
    }

    /// Drops captured data.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Resets device-side position.
    fn reset(&self) -> Result<()> {
        Ok(())
    }

    /// Fills `buf` with one mic frame. Returns the byte count captured.
    fn capture_frame(&self, buf: &mut [u8]) -> Result<usize>;

    /// Fills the mic frame and, when present, the reference frames.
    ///
    /// Devices without reference paths capture the mic and zero-fill the
    /// reference buffers.
    fn capture_frame_with_ec(&self, frames: &mut CaptureFrames<'_>) -> Result<()> {
        self.capture_frame(frames.mic)?;
        if let Some(ec) = frames.ec.as_deref_mut() {
            ec.fill(0);
        }
        if let Some(mic_ref) = frames.mic_ref.as_deref_mut() {
            mic_ref.fill(0);
        }
        Ok(())
    }

    /// Mutes the capture path.
    fn set_mute(&self, _mute: bool) -> Result<()> {
        Err(HpaeError::NotSupported)
    }

    /// Whether the capture path is muted.
    fn mute(&self) -> bool {
        false
    }

    /// Sets the capture gain.
    fn set_volume(&self, _left: f32, _right: f32) -> Result<()> {
        Err(HpaeError::NotSupported)
    }

    /// Applies an audio scene code.
    fn set_audio_scene(&self, _scene: u32) -> Result<()> {
        Ok(())
    }

    /// Frames captured and the monotonic timestamp of that count.
    fn presentation_position(&self) -> Result<(u64, u64)> {
        Err(HpaeError::NotSupported)
    }

    /// Sets a vendor parameter.
    fn set_audio_parameter(&self, _key: &str, _condition: &str, _value: &str) {}

    /// Reads a vendor parameter; empty when unknown.
    fn audio_parameter(&self, _key: &str, _condition: &str) -> String {
        String::new()
    }

    /// Informs the device which application uids are capturing.
    fn update_apps_uid(&self, _uids: &[i32]) -> Result<()> {
        Ok(())
    }
}
