//! Render effect node: one scene effect over a scene mix.

use hpae_core::{AudioNode, NodeInfo, NodeType, PcmBuffer, PcmBufferInfo, SceneType};
use hpae_effects::{RenderEffect, RenderEffectFactory};

/// Runs a [`RenderEffect`] over the mixed audio of one scene.
///
/// Input that does not match the effect's channel count, or a failing
/// effect, is passed through unchanged so a broken plugin degrades to
/// bypass instead of silence.
pub struct RenderEffectNode {
    info: NodeInfo,
    effect: Box<dyn RenderEffect>,
    out: PcmBuffer,
}

impl RenderEffectNode {
    /// Builds the node's effect through `factory` for `info.scene_type`.
    pub fn new(info: NodeInfo, factory: &dyn RenderEffectFactory) -> Self {
        let effect = factory.create(info.scene_type, info.channels, info.channel_layout);
        Self::with_effect(info, effect)
    }

    /// Wraps an existing effect instance.
    pub fn with_effect(info: NodeInfo, effect: Box<dyn RenderEffect>) -> Self {
        tracing::debug!(scene = effect.scene().as_str(), channels = info.channels, "render effect");
        Self {
            out: PcmBuffer::new(info.buffer_info()),
            info,
            effect,
        }
    }

    /// Scene of the wrapped effect.
    pub fn scene(&self) -> SceneType {
        self.effect.scene()
    }
}

impl AudioNode for RenderEffectNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::RenderEffect
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        let Some(&input) = inputs.first() else {
            return false;
        };
        let geometry = PcmBufferInfo::new(
            input.channels(),
            input.frame_len(),
            input.sample_rate(),
            input.channel_layout(),
        );
        if !self.out.info().same_frame_geometry(&geometry) {
            self.out.reconfig(geometry);
        }

        let (channels, _) = self.effect.expected_input();
        if channels == input.channels() {
            if let Err(e) = self.effect.process(input.frame(), self.out.frame_mut()) {
                tracing::warn!(scene = self.effect.scene().as_str(), error = %e, "effect failed, bypassing");
                self.out.frame_mut().copy_from_slice(input.frame());
            }
        } else {
            self.out.frame_mut().copy_from_slice(input.frame());
        }
        self.out.copy_tags_from(input);
        self.out.set_state(input.state());
        true
    }

    fn output(&self, port: u16) -> Option<&PcmBuffer> {
        (port == 0).then_some(&self.out)
    }

    fn reset(&mut self) -> bool {
        self.effect.reset();
        self.out.reset();
        true
    }
}

#[cfg(test)]
mod tests {
    use hpae_core::{BufferState, HpaeError, Result};
    use hpae_effects::BypassEffectFactory;

    use super::*;

    struct Halve;

    impl RenderEffect for Halve {
        fn scene(&self) -> SceneType {
            SceneType::Music
        }

        fn expected_input(&self) -> (u32, u64) {
            (2, 0x3)
        }

        fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
            for (o, i) in output.iter_mut().zip(input) {
                *o = i * 0.5;
            }
            Ok(())
        }
    }

    struct Broken;

    impl RenderEffect for Broken {
        fn scene(&self) -> SceneType {
            SceneType::Game
        }

        fn expected_input(&self) -> (u32, u64) {
            (2, 0x3)
        }

        fn process(&mut self, _input: &[f32], _output: &mut [f32]) -> Result<()> {
            Err(HpaeError::NotSupported)
        }
    }

    fn info() -> NodeInfo {
        let mut info = NodeInfo::default().with_geometry(2, 48000, 4);
        info.scene_type = SceneType::Music;
        info
    }

    fn frame(value: f32) -> PcmBuffer {
        let mut b = PcmBuffer::new(info().buffer_info());
        b.data_mut().fill(value);
        b.set_state(BufferState::NONE);
        b
    }

    #[test]
    fn factory_builds_scene_effect() {
        let node = RenderEffectNode::new(info(), &BypassEffectFactory);
        assert_eq!(node.scene(), SceneType::Music);
    }

    #[test]
    fn applies_effect() {
        let mut node = RenderEffectNode::with_effect(info(), Box::new(Halve));
        assert!(node.do_process(&[&frame(0.8)]));
        let out = node.output(0).unwrap();
        assert!(out.data().iter().all(|&s| (s - 0.4).abs() < 1e-6));
        assert!(out.is_valid());
    }

    #[test]
    fn failing_effect_bypasses() {
        let mut node = RenderEffectNode::with_effect(info(), Box::new(Broken));
        node.do_process(&[&frame(0.3)]);
        assert!(node.output(0).unwrap().data().iter().all(|&s| s == 0.3));
    }

    #[test]
    fn channel_mismatch_bypasses() {
        let mut node = RenderEffectNode::with_effect(info(), Box::new(Halve));
        let mut mono = PcmBuffer::new(PcmBufferInfo::new(1, 4, 48000, 0x4));
        mono.data_mut().fill(0.6);
        node.do_process(&[&mono]);
        let out = node.output(0).unwrap();
        assert_eq!(out.channels(), 1);
        assert!(out.data().iter().all(|&s| s == 0.6));
    }
}
