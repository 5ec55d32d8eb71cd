//! HPAE Effects - signal processing plugged into the engine's nodes
//!
//! - [`AudioLimiter`] - linked lookahead peak limiter used by the mixer node
//! - [`EnhanceChain`] / [`EnhanceChainFactory`] - capture enhancement plugins,
//!   with the built-in [`BypassEnhanceChain`]
//! - [`RenderEffect`] / [`RenderEffectFactory`] - scene render effect plugins,
//!   with the built-in [`BypassEffect`]
//!
//! ## Example
//!
//! ```rust
//! use hpae_effects::AudioLimiter;
//!
//! let mut limiter = AudioLimiter::new(1);
//! limiter.set_config(960 * 2 * 4, 4, 48000, 2).unwrap();
//!
//! let input = vec![2.0f32; 1920];
//! let mut output = vec![0.0f32; 1920];
//! limiter.process(1920, &input, &mut output);
//! assert!(output.iter().all(|s| s.abs() <= limiter.threshold() + 1e-6));
//! ```

pub mod enhance;
pub mod limiter;
pub mod render_effect;

pub use enhance::{
    AudioBufferConfig, BypassEnhanceChain, BypassEnhanceFactory, EnhanceAlgoConfig, EnhanceChain,
    EnhanceChainFactory, EnhanceDeviceAttr, EnhanceInput, scene_key_code,
};
pub use limiter::{AudioLimiter, db_to_linear};
pub use render_effect::{BypassEffect, BypassEffectFactory, RenderEffect, RenderEffectFactory};
