//! Scene render effects.
//!
//! Each render scene (music, movie, game, ...) mixes its sessions and then
//! runs one [`RenderEffect`] over the result before it is converted to the
//! sink geometry. Effect algorithms are plugins; [`BypassEffect`] is the only
//! built-in one.

use hpae_core::{HpaeError, Result, SceneType};

/// A scene effect over interleaved float frames.
pub trait RenderEffect: Send {
    /// Scene this instance was built for.
    fn scene(&self) -> SceneType;

    /// Channel count and layout the effect wants at its input.
    fn expected_input(&self) -> (u32, u64);

    /// Processes one frame of `input` into `output` (same length).
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()>;

    /// Clears internal state.
    fn reset(&mut self) {}
}

/// Creates effects per scene.
pub trait RenderEffectFactory: Send + Sync {
    /// Builds the effect for `scene` at the given mix geometry.
    fn create(&self, scene: SceneType, channels: u32, channel_layout: u64) -> Box<dyn RenderEffect>;
}

/// Effect that copies its input.
#[derive(Debug, Clone)]
pub struct BypassEffect {
    scene: SceneType,
    channels: u32,
    channel_layout: u64,
}

impl BypassEffect {
    /// Bypass for `scene` at the given geometry.
    pub fn new(scene: SceneType, channels: u32, channel_layout: u64) -> Self {
        Self {
            scene,
            channels,
            channel_layout,
        }
    }
}

impl RenderEffect for BypassEffect {
    fn scene(&self) -> SceneType {
        self.scene
    }

    fn expected_input(&self) -> (u32, u64) {
        (self.channels, self.channel_layout)
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != output.len() {
            return Err(HpaeError::invalid_param(format!(
                "effect buffers differ: {} vs {}",
                input.len(),
                output.len()
            )));
        }
        output.copy_from_slice(input);
        Ok(())
    }
}

/// Factory producing [`BypassEffect`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassEffectFactory;

impl RenderEffectFactory for BypassEffectFactory {
    fn create(&self, scene: SceneType, channels: u32, channel_layout: u64) -> Box<dyn RenderEffect> {
        Box::new(BypassEffect::new(scene, channels, channel_layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_copies() {
        let mut fx = BypassEffectFactory.create(SceneType::Music, 2, 3);
        assert_eq!(fx.scene(), SceneType::Music);
        assert_eq!(fx.expected_input(), (2, 3));
        let input = [0.1, 0.2, 0.3, 0.4];
        let mut out = [0.0; 4];
        fx.process(&input, &mut out).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn bypass_rejects_length_mismatch() {
        let mut fx = BypassEffect::new(SceneType::Game, 1, 4);
        assert!(fx.process(&[0.0; 4], &mut [0.0; 2]).is_err());
    }
}
