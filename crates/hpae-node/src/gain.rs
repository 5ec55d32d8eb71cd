//! Gain node: per-session client volume and start/stop fades.
//!
//! Fades are linear and last exactly one frame. When a fade-out completes the
//! node reports [`NodeStatusCallback::on_fade_done`] with the operation that
//! requested it and emits silence until faded in again. The renderer waits
//! for that report before disconnecting a pausing or stopping session.
//!
//! [`NodeStatusCallback::on_fade_done`]: hpae_core::NodeStatusCallback::on_fade_done

use hpae_core::{AudioNode, NodeInfo, NodeType, Operation, PcmBuffer};

/// Fade progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeState {
    /// Unity ramp, volume applied as is.
    Steady,
    /// Next frame ramps from 0 up to the volume.
    FadingIn,
    /// Next frame ramps from the volume down to 0, then reports `Operation`.
    FadingOut(Operation),
    /// Fade-out for `Operation` has completed; output is silent.
    FadedOut(Operation),
}

/// Applies client volume and fades to one session.
pub struct GainNode {
    info: NodeInfo,
    out: PcmBuffer,
    volume: f32,
    fade: FadeState,
}

impl GainNode {
    /// Gain node at unity volume, not fading.
    pub fn new(info: NodeInfo) -> Self {
        Self {
            out: PcmBuffer::new(info.buffer_info()),
            info,
            volume: 1.0,
            fade: FadeState::Steady,
        }
    }

    /// Sets the client volume, clamped to `[0, 1]`.
    pub fn set_client_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        tracing::debug!(session_id = self.info.session_id, volume = self.volume, "client volume");
    }

    /// Current client volume.
    pub fn client_volume(&self) -> f32 {
        self.volume
    }

    /// Starts a fade-in over the next frame.
    pub fn fade_in(&mut self) {
        self.fade = FadeState::FadingIn;
    }

    /// Starts a fade-out over the next frame, reporting `operation` when done.
    pub fn fade_out(&mut self, operation: Operation) {
        self.fade = FadeState::FadingOut(operation);
    }

    /// Current fade state.
    pub fn fade_state(&self) -> FadeState {
        self.fade
    }

    /// Whether the last fade-out has completed.
    pub fn is_faded_out(&self) -> bool {
        matches!(self.fade, FadeState::FadedOut(_))
    }

    fn ramp(&mut self, from: f32, to: f32) {
        let channels = self.out.channels().max(1) as usize;
        let frames = self.out.frame_len().max(1);
        let step = (to - from) / frames as f32;
        for (i, frame) in self.out.frame_mut().chunks_exact_mut(channels).enumerate() {
            let g = from + step * (i + 1) as f32;
            for s in frame {
                *s *= g;
            }
        }
    }
}

impl AudioNode for GainNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::Gain
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        let Some(&input) = inputs.first() else {
            return false;
        };
        if !self.out.info().same_frame_geometry(input.info()) {
            self.out.reconfig(*input.info());
        }
        self.out.copy_from(input);

        match self.fade {
            FadeState::Steady => self.out.scale(self.volume),
            FadeState::FadingIn => {
                self.ramp(0.0, self.volume);
                self.fade = FadeState::Steady;
            }
            FadeState::FadingOut(operation) => {
                self.ramp(self.volume, 0.0);
                self.fade = FadeState::FadedOut(operation);
                tracing::debug!(session_id = self.info.session_id, %operation, "fade out done");
                if let Some(cb) = self.info.callback() {
                    cb.on_fade_done(self.info.session_id, operation);
                }
            }
            FadeState::FadedOut(_) => {
                self.out.frame_mut().fill(0.0);
                self.out.set_silence(true);
            }
        }
        true
    }

    fn output(&self, port: u16) -> Option<&PcmBuffer> {
        (port == 0).then_some(&self.out)
    }

    fn reset(&mut self) -> bool {
        self.out.reset();
        self.fade = FadeState::Steady;
        true
    }
}
