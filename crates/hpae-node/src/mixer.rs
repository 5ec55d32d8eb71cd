//! Mixer node: sums every connected input into one frame.
//!
//! Without a limiter the output follows the geometry of the first input and
//! is reconfigured (with a log line) when it changes. With a limiter the
//! geometry is frozen at setup time, because the limiter's delay line is
//! sized once: inputs are summed into a scratch buffer of the node's own
//! geometry and the limiter writes the output.
//!
//! The output state is the AND of the input states. A mix is invalid only if
//! every input was invalid, and silent only if every input was silent.

use hpae_core::{
    AudioNode, BufferState, HpaeError, NodeInfo, NodeType, PcmBuffer, PcmBufferInfo, Result,
};
use hpae_effects::AudioLimiter;

/// Sums N inputs of the same geometry.
pub struct MixerNode {
    info: NodeInfo,
    mixed: PcmBuffer,
    scratch: PcmBuffer,
    limiter: Option<AudioLimiter>,
}

impl MixerNode {
    /// Mixer producing frames in `info`'s geometry until an input says otherwise.
    pub fn new(info: NodeInfo) -> Self {
        let buffer_info = info.buffer_info();
        Self {
            mixed: PcmBuffer::new(buffer_info),
            scratch: PcmBuffer::new(buffer_info),
            info,
            limiter: None,
        }
    }

    /// Installs the output limiter.
    ///
    /// Fails with [`HpaeError::AlreadyConfigured`] on the second call. If the
    /// limiter rejects the node geometry the mixer keeps running unlimited.
    pub fn setup_audio_limiter(&mut self) -> Result<()> {
        if self.limiter.is_some() {
            tracing::warn!(node = %self.info.node_id, "limiter already set up");
            return Err(HpaeError::AlreadyConfigured);
        }
        let mut limiter = AudioLimiter::new(self.info.node_id.index());
        let request_bytes = self.info.frame_samples() * size_of::<f32>();
        limiter.set_config(
            request_bytes,
            size_of::<f32>(),
            self.info.sample_rate,
            self.info.channels,
        )?;
        tracing::info!(
            node = %self.info.node_id,
            channels = self.info.channels,
            frame_len = self.info.frame_len,
            "mixer limiter enabled"
        );
        self.limiter = Some(limiter);
        Ok(())
    }

    /// Whether a limiter is installed.
    pub fn has_limiter(&self) -> bool {
        self.limiter.is_some()
    }

    /// Reconfigures the output to `input`'s geometry if it differs.
    ///
    /// Returns `true` when the output was reallocated.
    pub fn check_update_info(&mut self, input: &PcmBuffer) -> bool {
        let target = PcmBufferInfo::new(
            input.channels(),
            input.frame_len(),
            input.sample_rate(),
            input.channel_layout(),
        );
        if self.mixed.info().same_frame_geometry(&target) {
            return false;
        }
        tracing::info!(
            node = %self.info.node_id,
            from_channels = self.mixed.channels(),
            to_channels = target.channels,
            from_frame_len = self.mixed.frame_len(),
            to_frame_len = target.frame_len,
            rate = target.rate,
            "mixer output reconfigured"
        );
        self.mixed.reconfig(target)
    }

    /// Mixes `inputs` and returns the output, or `None` when there is nothing
    /// to mix.
    pub fn signal_process(&mut self, inputs: &[&PcmBuffer]) -> Option<&PcmBuffer> {
        let first = inputs.first()?;
        let mut state = BufferState::INVALID | BufferState::SILENCE;

        match self.limiter.as_mut() {
            None => {
                self.check_update_info(first);
                self.mixed.reset();
                for &input in inputs {
                    self.mixed += input;
                    state &= input.state();
                }
            }
            Some(limiter) => {
                self.scratch.reset();
                for &input in inputs {
                    self.scratch += input;
                    state &= input.state();
                }
                self.mixed.reset();
                let samples = self.info.frame_samples();
                limiter.process(samples, self.scratch.data(), self.mixed.data_mut());
            }
        }

        if let Some(tagged) = inputs.iter().find(|b| b.is_valid()) {
            self.mixed.set_stream_type(tagged.stream_type());
            self.mixed.set_stream_usage(tagged.stream_usage());
        }
        self.mixed.set_split_stream_type(self.info.split_stream_type);
        self.mixed.set_state(state);
        Some(&self.mixed)
    }

    /// Geometry of the current output.
    pub fn output_info(&self) -> &PcmBufferInfo {
        self.mixed.info()
    }
}

impl AudioNode for MixerNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::Mixer
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        self.signal_process(inputs).is_some()
    }

    fn output(&self, port: u16) -> Option<&PcmBuffer> {
        (port == 0).then_some(&self.mixed)
    }

    fn reset(&mut self) -> bool {
        self.mixed.reset();
        self.scratch.reset();
        if let Some(limiter) = self.limiter.as_mut() {
            limiter.reset();
        }
        true
    }
}
