//! Engine-wide settings from the `[engine]` table.

use std::time::Duration;

use hpae_core::{FRAME_MS, PaPowerPolicy};
use serde::{Deserialize, Serialize};

/// Settings shared by every manager in the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Duration of one processing tick in milliseconds.
    pub frame_ms: u32,
    /// Continuous silence before a primary sink powers its amplifier down.
    pub pa_close_after_ms: u64,
    /// Interval at which a persistent power-down is logged, in seconds.
    pub pa_monitor_interval_s: u64,
    /// Frames of history kept by sink inputs for offload rewinds.
    pub history_frames: usize,
    /// Capacity of each manager's command queue.
    pub queue_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            frame_ms: FRAME_MS,
            pa_close_after_ms: 4000,
            pa_monitor_interval_s: 300,
            history_frames: 0,
            queue_depth: 64,
        }
    }
}

impl EngineSettings {
    /// Amplifier power policy for primary sinks.
    pub fn pa_power_policy(&self) -> PaPowerPolicy {
        PaPowerPolicy {
            close_after: Duration::from_millis(self.pa_close_after_ms),
            monitor_interval: Duration::from_secs(self.pa_monitor_interval_s),
        }
    }

    /// Tick period.
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_ms))
    }
}
