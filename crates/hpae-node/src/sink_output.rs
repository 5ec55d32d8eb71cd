//! Sink output node: the terminal stage of a render pipeline.
//!
//! Each tick the node takes its first input, converts it to the sink's wire
//! format and calls [`RenderSink::render_frame`]. Around that it keeps:
//!
//! - the device lifecycle ([`SinkLifecycle`]), a small state machine over
//!   [`StreamManagerState`] driven by init/start/pause/resume/stop/deinit;
//! - **PA power** for `"primary"` devices: after [`PaPowerPolicy::close_after`]
//!   of continuous valid silence the power amplifier is switched off, and the
//!   next audible frame switches it back on;
//! - **pacing** for `"remote"` devices, which have no hardware clock
//!   ([`RemoteTiming`]); other devices back off one frame period after a
//!   failed render.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hpae_core::{
    AudioNode, Clock, FRAME_MS, HpaeError, NodeInfo, NodeType, PaPowerPolicy, PcmBuffer, Result,
    SinkInfo, StreamManagerState, convert_from_float,
};
use hpae_io::{DeviceContext, RenderSink};

/// Device class of the built-in speaker path, the only one with PA control.
pub const PRIMARY_CLASS: &str = "primary";

/// Device class of network sinks, paced by [`RemoteTiming`].
pub const REMOTE_CLASS: &str = "remote";

const FRAME_PERIOD: Duration = Duration::from_millis(FRAME_MS as u64);

/// Render device handle and lifecycle state.
///
/// Shared by [`SinkOutputNode`] and the remote sink output node. Every
/// operation fails with [`HpaeError::NotInited`] until
/// [`get_render_sink_instance`](Self::get_render_sink_instance) succeeded.
pub struct SinkLifecycle {
    context: Arc<DeviceContext>,
    sink: Option<Arc<dyn RenderSink>>,
    render_id: Option<u32>,
    attr: SinkInfo,
    state: StreamManagerState,
    name: String,
}

impl SinkLifecycle {
    /// Lifecycle without a device; `name` is used in logs.
    pub fn new(context: Arc<DeviceContext>, name: impl Into<String>) -> Self {
        Self {
            context,
            sink: None,
            render_id: None,
            attr: SinkInfo::default(),
            state: StreamManagerState::New,
            name: name.into(),
        }
    }

    /// Acquires the render device for `(class, net_id)` from the context.
    ///
    /// The id reference is released again if no device can be built.
    pub fn get_render_sink_instance(&mut self, class: &str, net_id: &str) -> Result<()> {
        let id = self.context.get_render_id(class, net_id);
        let Some(sink) = self.context.render_sink(id) else {
            tracing::error!(class, net_id, id, "get render sink failed");
            self.context.release_id(id);
            return Err(HpaeError::device(format!("no render sink for class {class}")));
        };
        self.sink = Some(sink);
        self.render_id = Some(id);
        Ok(())
    }

    fn sink(&self) -> Result<&Arc<dyn RenderSink>> {
        self.sink.as_ref().ok_or(HpaeError::NotInited)
    }

    /// The device, if acquired.
    pub fn render_sink(&self) -> Option<&Arc<dyn RenderSink>> {
        self.sink.as_ref()
    }

    /// Id of the acquired device.
    pub fn render_id(&self) -> Option<u32> {
        self.render_id
    }

    /// Attributes passed to the last init.
    pub fn attr(&self) -> &SinkInfo {
        &self.attr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamManagerState {
        self.state
    }

    fn set_state(&mut self, state: StreamManagerState) {
        tracing::info!(sink = %self.name, from = ?self.state, to = ?state, "sink state change");
        self.state = state;
    }

    /// Initializes the device with `attr`. Already-initialized devices are
    /// accepted as is.
    pub fn init(&mut self, attr: &SinkInfo) -> Result<()> {
        let sink = Arc::clone(self.sink()?);
        self.attr = attr.clone();
        if sink.is_inited() {
            tracing::warn!(sink = %self.name, "render sink already inited");
            self.set_state(StreamManagerState::Idle);
            return Ok(());
        }
        sink.init(attr).inspect_err(|e| {
            tracing::error!(sink = %self.name, error = %e, "render sink init failed");
        })?;
        self.set_state(StreamManagerState::Idle);
        Ok(())
    }

    /// Deinitializes and releases the device.
    pub fn deinit(&mut self) -> Result<()> {
        let sink = Arc::clone(self.sink()?);
        self.set_state(StreamManagerState::Released);
        sink.deinit();
        self.sink = None;
        if let Some(id) = self.render_id.take() {
            self.context.release_id(id);
        }
        Ok(())
    }

    /// Starts the device.
    pub fn start(&mut self) -> Result<()> {
        self.sink()?.start()?;
        self.set_state(StreamManagerState::Running);
        Ok(())
    }

    /// Stops the device. The state is suspended before the device is asked.
    pub fn stop(&mut self) -> Result<()> {
        let sink = Arc::clone(self.sink()?);
        self.set_state(StreamManagerState::Suspended);
        sink.stop()
    }

    /// Pauses the device; the state is suspended whatever the device says.
    pub fn pause(&mut self) -> Result<()> {
        let sink = Arc::clone(self.sink()?);
        if let Err(e) = sink.pause() {
            tracing::warn!(sink = %self.name, error = %e, "render sink pause failed");
        }
        self.set_state(StreamManagerState::Suspended);
        Ok(())
    }

    /// Resumes the device.
    pub fn resume(&mut self) -> Result<()> {
        self.sink()?.resume()?;
        self.set_state(StreamManagerState::Running);
        Ok(())
    }

    /// Flushes the device.
    pub fn flush(&self) -> Result<()> {
        self.sink()?.flush()
    }

    /// Resets the device.
    pub fn reset(&self) -> Result<()> {
        self.sink()?.reset()
    }

    /// Forwards the uids of apps rendering to this device.
    pub fn update_apps_uid(&self, uids: &[i32]) -> Result<()> {
        let sink = self.sink()?;
        if !sink.is_inited() {
            tracing::error!(sink = %self.name, "update apps uid before init");
            return Err(HpaeError::IllegalState);
        }
        sink.update_apps_uid(uids)
    }

    /// Device latency in milliseconds.
    pub fn latency_ms(&self) -> Result<u32> {
        self.sink()?.latency_ms()
    }
}

/// Wall-clock pacing for devices without a hardware clock.
///
/// Each rendered frame advances a virtual time point by one frame period;
/// the caller then sleeps until that point. Late frames never sleep a
/// negative amount.
pub struct RemoteTiming {
    clock: Arc<dyn Clock>,
    time_point: Instant,
    last_sleep: Duration,
}

impl RemoteTiming {
    /// Pacing anchored at the clock's current time.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            time_point: clock.now(),
            clock,
            last_sleep: Duration::ZERO,
        }
    }

    /// Re-anchors the time point at now.
    pub fn reset(&mut self) {
        self.time_point = self.clock.now();
    }

    /// Advances one frame period and sleeps the remainder.
    pub fn handle(&mut self) {
        self.time_point += FRAME_PERIOD;
        self.last_sleep = self.time_point.saturating_duration_since(self.clock.now());
        tracing::trace!(sleep_us = self.last_sleep.as_micros() as u64, "remote pacing");
        self.clock.sleep(self.last_sleep);
    }

    /// The current virtual time point.
    pub fn time_point(&self) -> Instant {
        self.time_point
    }

    /// Duration of the last sleep.
    pub fn last_sleep(&self) -> Duration {
        self.last_sleep
    }
}

/// Silence tracking for PA power control.
#[derive(Clone, Copy, Debug)]
struct PaPower {
    policy: PaPowerPolicy,
    open: bool,
    announced: bool,
    silence: Duration,
}

impl PaPower {
    fn new(policy: PaPowerPolicy) -> Self {
        Self {
            policy,
            open: false,
            announced: false,
            silence: Duration::ZERO,
        }
    }

    fn opened(&mut self) {
        self.open = true;
        self.announced = false;
        self.silence = Duration::ZERO;
    }

    fn handle(&mut self, sink: &dyn RenderSink, buffer: &PcmBuffer) {
        if buffer.is_silence() {
            if !self.announced {
                tracing::info!(close_after = ?self.policy.close_after, "silence, pa close timer started");
                self.announced = true;
            }
            let rate = u64::from(buffer.sample_rate().max(1));
            self.silence += Duration::from_micros(buffer.frame_len() as u64 * 1_000_000 / rate);
            if self.open && self.silence >= self.policy.close_after {
                let ret = sink.set_pa_power(false);
                self.open = false;
                self.silence = Duration::ZERO;
                tracing::info!(ok = ret.is_ok(), "pa closed after silence");
            } else if !self.open && self.silence >= self.policy.monitor_interval {
                self.silence = Duration::ZERO;
                tracing::info!(interval = ?self.policy.monitor_interval, "pa still closed");
            }
        } else {
            if self.announced {
                self.announced = false;
                tracing::info!("audible frame, pa close timer cancelled");
            }
            self.silence = Duration::ZERO;
            if !self.open {
                let ret = sink.set_pa_power(true);
                self.open = true;
                tracing::info!(ok = ret.is_ok(), "pa reopened");
            }
        }
    }
}

/// Renders the mixed pipeline output to a device.
pub struct SinkOutputNode {
    info: NodeInfo,
    lifecycle: SinkLifecycle,
    clock: Arc<dyn Clock>,
    timing: RemoteTiming,
    pa: PaPower,
    frame_data: Vec<u8>,
    render_failures: u64,
}

impl SinkOutputNode {
    /// Sink output in `info`'s geometry and wire format.
    pub fn new(info: NodeInfo, context: Arc<DeviceContext>) -> Self {
        Self::with_policy(info, context, PaPowerPolicy::default())
    }

    /// Sink output with explicit PA power thresholds.
    pub fn with_policy(info: NodeInfo, context: Arc<DeviceContext>, policy: PaPowerPolicy) -> Self {
        let clock = context.clock();
        Self {
            lifecycle: SinkLifecycle::new(context, info.node_name.clone()),
            timing: RemoteTiming::new(Arc::clone(&clock)),
            clock,
            pa: PaPower::new(policy),
            frame_data: vec![0; info.frame_bytes()],
            render_failures: 0,
            info,
        }
    }

    /// Device lifecycle.
    pub fn lifecycle(&self) -> &SinkLifecycle {
        &self.lifecycle
    }

    /// Acquires the device for `(class, net_id)`.
    pub fn get_render_sink_instance(&mut self, class: &str, net_id: &str) -> Result<()> {
        self.lifecycle.get_render_sink_instance(class, net_id)
    }

    /// Initializes the device.
    pub fn render_sink_init(&mut self, attr: &SinkInfo) -> Result<()> {
        self.lifecycle.init(attr)
    }

    /// Deinitializes and releases the device.
    pub fn render_sink_deinit(&mut self) -> Result<()> {
        self.lifecycle.deinit()
    }

    /// Starts the device; primary devices also power the PA on.
    pub fn render_sink_start(&mut self) -> Result<()> {
        self.lifecycle.start()?;
        if self.info.device_class == REMOTE_CLASS {
            self.timing.reset();
        }
        if self.info.device_class == PRIMARY_CLASS
            && let Some(sink) = self.lifecycle.render_sink()
        {
            let ret = sink.set_pa_power(true);
            self.pa.opened();
            tracing::info!(ok = ret.is_ok(), "speaker sink started, pa opened");
        }
        Ok(())
    }

    /// Stops the device.
    pub fn render_sink_stop(&mut self) -> Result<()> {
        self.lifecycle.stop()
    }

    /// Pauses the device.
    pub fn render_sink_pause(&mut self) -> Result<()> {
        self.lifecycle.pause()
    }

    /// Resumes the device.
    pub fn render_sink_resume(&mut self) -> Result<()> {
        self.lifecycle.resume()
    }

    /// Flushes the device.
    pub fn render_sink_flush(&self) -> Result<()> {
        self.lifecycle.flush()
    }

    /// Resets the device.
    pub fn render_sink_reset(&self) -> Result<()> {
        self.lifecycle.reset()
    }

    /// Forwards app uids to the device.
    pub fn update_apps_uid(&self, uids: &[i32]) -> Result<()> {
        self.lifecycle.update_apps_uid(uids)
    }

    /// Device latency in milliseconds.
    pub fn latency_ms(&self) -> Result<u32> {
        self.lifecycle.latency_ms()
    }

    /// Device lifecycle state.
    pub fn sink_state(&self) -> StreamManagerState {
        self.lifecycle.state()
    }

    /// Whether the PA is currently powered.
    pub fn is_pa_open(&self) -> bool {
        self.pa.open
    }

    /// Failed renders since creation.
    pub fn render_failures(&self) -> u64 {
        self.render_failures
    }

    /// Bytes of the last rendered frame.
    pub fn render_frame_data(&self) -> &[u8] {
        &self.frame_data
    }
}

impl AudioNode for SinkOutputNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::SinkOutput
    }

    fn output_port_count(&self) -> u16 {
        0
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        let Some(sink) = self.lifecycle.render_sink().cloned() else {
            tracing::warn!(node = %self.info.node_id, "render sink missing");
            return false;
        };
        let Some(&buffer) = inputs.first() else {
            return false;
        };

        if self.info.device_class == PRIMARY_CLASS && buffer.is_valid() {
            self.pa.handle(sink.as_ref(), buffer);
        }
        let n = self.info.frame_samples().min(buffer.frame().len());
        convert_from_float(self.info.format, &buffer.frame()[..n], &mut self.frame_data);

        let ret = sink.render_frame(&self.frame_data);
        let failed = match &ret {
            Ok(written) if *written == self.frame_data.len() => false,
            Ok(written) => {
                tracing::error!(written, expected = self.frame_data.len(), "short render");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "render frame failed");
                true
            }
        };
        if failed {
            self.render_failures += 1;
        }

        if self.info.device_class == REMOTE_CLASS {
            self.timing.handle();
        } else if ret.is_err() {
            self.clock.sleep(FRAME_PERIOD);
        }
        true
    }

    fn output(&self, _port: u16) -> Option<&PcmBuffer> {
        None
    }
}

#[cfg(test)]
mod tests {
    use hpae_core::{BufferState, ManualClock, SampleFormat};
    use hpae_io::NullRenderSink;

    use super::*;

    fn setup(class: &str) -> (SinkOutputNode, Arc<NullRenderSink>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let ctx = Arc::new(DeviceContext::with_clock(clock.clone()));
        let sink = Arc::new(NullRenderSink::new());
        ctx.register_render_sink(class, sink.clone());

        let attr = SinkInfo {
            device_name: "speaker".into(),
            device_class: class.into(),
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::S16Le,
            frame_len: 960,
            ..SinkInfo::default()
        };
        let mut node = SinkOutputNode::new(NodeInfo::from_sink(&attr), ctx);
        node.get_render_sink_instance(class, "").unwrap();
        node.render_sink_init(&attr).unwrap();
        (node, sink, clock)
    }

    fn frame(value: f32) -> PcmBuffer {
        let mut b = PcmBuffer::new(NodeInfo::default().with_geometry(2, 48000, 960).buffer_info());
        b.data_mut().fill(value);
        b.set_state(BufferState::NONE);
        b.update_silence();
        b
    }

    #[test]
    fn lifecycle_states() {
        let (mut node, _sink, _clock) = setup("usb");
        assert_eq!(node.sink_state(), StreamManagerState::Idle);
        node.render_sink_start().unwrap();
        assert_eq!(node.sink_state(), StreamManagerState::Running);
        node.render_sink_pause().unwrap();
        assert_eq!(node.sink_state(), StreamManagerState::Suspended);
        node.render_sink_resume().unwrap();
        assert_eq!(node.sink_state(), StreamManagerState::Running);
        node.render_sink_stop().unwrap();
        assert_eq!(node.sink_state(), StreamManagerState::Suspended);
        node.render_sink_deinit().unwrap();
        assert_eq!(node.sink_state(), StreamManagerState::Released);
        assert!(matches!(node.render_sink_start(), Err(HpaeError::NotInited)));
    }

    #[test]
    fn missing_device_releases_id() {
        let ctx = Arc::new(DeviceContext::new());
        let mut node = SinkOutputNode::new(NodeInfo::default(), ctx.clone());
        assert!(node.get_render_sink_instance("nothing", "").is_err());
        assert_eq!(ctx.live_ids(), 0);
    }

    #[test]
    fn renders_converted_frame() {
        let (mut node, sink, _clock) = setup("usb");
        node.render_sink_start().unwrap();
        assert!(node.do_process(&[&frame(0.5)]));
        assert_eq!(sink.render_calls(), 1);
        assert_eq!(sink.bytes_rendered(), 960 * 2 * 2);
        let last = sink.last_frame();
        assert_eq!(i16::from_le_bytes([last[0], last[1]]), 16384);
    }

    #[test]
    fn failed_render_backs_off_one_frame() {
        let (mut node, sink, clock) = setup("usb");
        sink.set_fail_render(true);
        node.do_process(&[&frame(0.1)]);
        assert_eq!(clock.sleep_count(), 1);
        assert_eq!(clock.last_sleep(), Duration::from_millis(20));
        assert_eq!(node.render_failures(), 1);
    }

    #[test]
    fn primary_start_opens_pa() {
        let (mut node, sink, _clock) = setup(PRIMARY_CLASS);
        node.render_sink_start().unwrap();
        assert_eq!(sink.pa_on_count(), 1);
        assert!(node.is_pa_open());
    }

    #[test]
    fn invalid_buffers_do_not_count_as_silence() {
        let (mut node, sink, _clock) = setup(PRIMARY_CLASS);
        node.render_sink_start().unwrap();
        let mut invalid = frame(0.0);
        invalid.set_valid(false);
        for _ in 0..300 {
            node.do_process(&[&invalid]);
        }
        assert_eq!(sink.pa_off_count(), 0);
    }

    #[test]
    fn remote_paces_every_frame() {
        let (mut node, sink, clock) = setup(REMOTE_CLASS);
        node.render_sink_start().unwrap();
        for _ in 0..3 {
            node.do_process(&[&frame(0.2)]);
        }
        assert_eq!(sink.render_calls(), 3);
        assert_eq!(clock.total_slept(), Duration::from_millis(60));
    }
}
