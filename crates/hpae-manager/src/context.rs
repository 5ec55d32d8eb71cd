//! Dependencies shared by every manager of one engine.

use std::sync::Arc;

use hpae_config::EngineSettings;
use hpae_effects::{BypassEffectFactory, BypassEnhanceFactory, EnhanceChainFactory, RenderEffectFactory};
use hpae_io::DeviceContext;

use crate::callback::CallbackRegistry;

/// Device context, listeners, settings and effect factories.
///
/// Constructed once by [`HpaeManager`](crate::HpaeManager) and cloned into
/// each renderer and capturer it opens.
#[derive(Clone)]
pub struct ManagerContext {
    /// Device ids and instances.
    pub device: Arc<DeviceContext>,
    /// Session status listeners.
    pub registry: Arc<CallbackRegistry>,
    /// Engine-wide settings.
    pub settings: EngineSettings,
    /// Scene render effects.
    pub render_effects: Arc<dyn RenderEffectFactory>,
    /// Capture enhancement chains.
    pub enhance: Arc<dyn EnhanceChainFactory>,
}

impl ManagerContext {
    /// Context with bypass effects and a fresh listener registry.
    pub fn new(device: Arc<DeviceContext>, settings: EngineSettings) -> Self {
        Self {
            device,
            registry: Arc::new(CallbackRegistry::new()),
            settings,
            render_effects: Arc::new(BypassEffectFactory),
            enhance: Arc::new(BypassEnhanceFactory),
        }
    }
}
