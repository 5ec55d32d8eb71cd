//! Devices that discard or synthesize audio.
//!
//! [`NullRenderSink`] accepts frames and records what happened to it, which
//! makes it the workhorse of node and manager tests. With a clock attached
//! it also sleeps one frame period per render call, so a pipeline thread
//! driven by it runs at real-time cadence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use hpae_core::{Clock, HpaeError, Result, SinkInfo, SourceInfo, SplitStreamType};
use parking_lot::Mutex;

use crate::sink::RenderSink;
use crate::source::CaptureSource;

/// Render sink that drops audio and counts calls.
#[derive(Default)]
pub struct NullRenderSink {
    inited: AtomicBool,
    started: AtomicBool,
    fail_render: AtomicBool,
    frame_bytes: AtomicUsize,
    render_calls: AtomicU64,
    bytes_rendered: AtomicU64,
    pa_on: AtomicU64,
    pa_off: AtomicU64,
    info: Mutex<Option<SinkInfo>>,
    volume: Mutex<(f32, f32)>,
    params: Mutex<Vec<(String, String, String)>>,
    splits: Mutex<Vec<SplitStreamType>>,
    last_frame: Mutex<Vec<u8>>,
    captured: Mutex<Option<Vec<u8>>>,
    pacing: Option<Arc<dyn Clock>>,
}

impl NullRenderSink {
    /// Sink that renders instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that sleeps one frame period on `clock` per render call.
    pub fn paced(clock: Arc<dyn Clock>) -> Self {
        Self {
            pacing: Some(clock),
            ..Self::default()
        }
    }

    /// Keeps every rendered byte for later inspection.
    pub fn with_capture(self) -> Self {
        *self.captured.lock() = Some(Vec::new());
        self
    }

    /// Makes subsequent render calls fail with a device error.
    pub fn set_fail_render(&self, fail: bool) {
        self.fail_render.store(fail, Ordering::SeqCst);
    }

    /// Number of render calls, including failed ones.
    pub fn render_calls(&self) -> u64 {
        self.render_calls.load(Ordering::SeqCst)
    }

    /// Bytes accepted so far.
    pub fn bytes_rendered(&self) -> u64 {
        self.bytes_rendered.load(Ordering::SeqCst)
    }

    /// Whether the sink is started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of power-on requests.
    pub fn pa_on_count(&self) -> u64 {
        self.pa_on.load(Ordering::SeqCst)
    }

    /// Number of power-off requests.
    pub fn pa_off_count(&self) -> u64 {
        self.pa_off.load(Ordering::SeqCst)
    }

    /// Every `(key, condition, value)` passed to `set_audio_parameter`.
    pub fn parameters(&self) -> Vec<(String, String, String)> {
        self.params.lock().clone()
    }

    /// Split types of every split render call.
    pub fn split_calls(&self) -> Vec<SplitStreamType> {
        self.splits.lock().clone()
    }

    /// Bytes of the most recent accepted frame.
    pub fn last_frame(&self) -> Vec<u8> {
        self.last_frame.lock().clone()
    }

    /// Every accepted byte, if created [`with_capture`](Self::with_capture).
    pub fn captured(&self) -> Vec<u8> {
        self.captured.lock().clone().unwrap_or_default()
    }

    /// Geometry passed to `init`.
    pub fn sink_info(&self) -> Option<SinkInfo> {
        self.info.lock().clone()
    }

    fn accept(&self, data: &[u8]) -> Result<usize> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        if !self.inited.load(Ordering::SeqCst) {
            return Err(HpaeError::NotInited);
        }
        if self.fail_render.load(Ordering::SeqCst) {
            return Err(HpaeError::device("null sink set to fail"));
        }
        self.bytes_rendered
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        {
            let mut last = self.last_frame.lock();
            last.clear();
            last.extend_from_slice(data);
        }
        if let Some(all) = self.captured.lock().as_mut() {
            all.extend_from_slice(data);
        }
        if let Some(clock) = &self.pacing {
            clock.sleep(self.frame_period());
        }
        Ok(data.len())
    }

    fn frame_period(&self) -> Duration {
        self.info
            .lock()
            .as_ref()
            .filter(|info| info.sample_rate > 0)
            .map_or(Duration::from_millis(u64::from(hpae_core::FRAME_MS)), |info| {
                Duration::from_micros(info.frame_len as u64 * 1_000_000 / u64::from(info.sample_rate))
            })
    }
}

impl RenderSink for NullRenderSink {
    fn init(&self, info: &SinkInfo) -> Result<()> {
        let frame_bytes = info.frame_len * info.channels as usize * info.format.sample_size();
        self.frame_bytes.store(frame_bytes, Ordering::SeqCst);
        *self.info.lock() = Some(info.clone());
        self.inited.store(true, Ordering::SeqCst);
        tracing::debug!(device = %info.device_name, frame_bytes, "null sink init");
        Ok(())
    }

    fn is_inited(&self) -> bool {
        self.inited.load(Ordering::SeqCst)
    }

    fn deinit(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.inited.store(false, Ordering::SeqCst);
    }

    fn start(&self) -> Result<()> {
        if !self.is_inited() {
            return Err(HpaeError::NotInited);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.start()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn render_frame(&self, data: &[u8]) -> Result<usize> {
        self.accept(data)
    }

    fn split_render_frame(&self, data: &[u8], split: SplitStreamType) -> Result<usize> {
        self.splits.lock().push(split);
        self.accept(data)
    }

    fn set_volume(&self, left: f32, right: f32) -> Result<()> {
        *self.volume.lock() = (left, right);
        Ok(())
    }

    fn volume(&self) -> (f32, f32) {
        *self.volume.lock()
    }

    fn presentation_position(&self) -> Result<(u64, u64)> {
        let frame_bytes = self.frame_bytes.load(Ordering::SeqCst).max(1) as u64;
        let frame_len = self.info.lock().as_ref().map_or(0, |i| i.frame_len as u64);
        let frames = self.bytes_rendered() / frame_bytes * frame_len;
        let ts = self.pacing.as_ref().map_or(0, |c| c.monotonic_ns());
        Ok((frames, ts))
    }

    fn set_audio_parameter(&self, key: &str, condition: &str, value: &str) {
        self.params
            .lock()
            .push((key.to_owned(), condition.to_owned(), value.to_owned()));
    }

    fn audio_parameter(&self, key: &str, condition: &str) -> String {
        self.params
            .lock()
            .iter()
            .rev()
            .find(|(k, c, _)| k == key && c == condition)
            .map(|(_, _, v)| v.clone())
            .unwrap_or_default()
    }

    fn set_pa_power(&self, on: bool) -> Result<()> {
        if on {
            self.pa_on.fetch_add(1, Ordering::SeqCst);
        } else {
            self.pa_off.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Capture source producing silence or a repeating byte pattern.
#[derive(Default)]
pub struct NullCaptureSource {
    inited: AtomicBool,
    started: AtomicBool,
    muted: AtomicBool,
    fail_capture: AtomicBool,
    capture_calls: AtomicU64,
    pattern: Vec<u8>,
    cursor: AtomicUsize,
}

impl NullCaptureSource {
    /// Source that captures zeros.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that repeats `pattern` byte for byte.
    pub fn with_pattern(pattern: Vec<u8>) -> Self {
        Self {
            pattern,
            ..Self::default()
        }
    }

    /// Makes subsequent capture calls fail with a device error.
    pub fn set_fail_capture(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }

    /// Number of capture calls.
    pub fn capture_calls(&self) -> u64 {
        self.capture_calls.load(Ordering::SeqCst)
    }

    /// Whether the source is started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl CaptureSource for NullCaptureSource {
    fn init(&self, _info: &SourceInfo) -> Result<()> {
        self.inited.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_inited(&self) -> bool {
        self.inited.load(Ordering::SeqCst)
    }

    fn deinit(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.inited.store(false, Ordering::SeqCst);
    }

    fn start(&self) -> Result<()> {
        if !self.is_inited() {
            return Err(HpaeError::NotInited);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn capture_frame(&self, buf: &mut [u8]) -> Result<usize> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_inited() {
            return Err(HpaeError::NotInited);
        }
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(HpaeError::device("null source set to fail"));
        }
        if self.pattern.is_empty() || self.muted.load(Ordering::SeqCst) {
            buf.fill(0);
        } else {
            let start = self.cursor.fetch_add(buf.len(), Ordering::SeqCst);
            for (i, b) in buf.iter_mut().enumerate() {
                *b = self.pattern[(start + i) % self.pattern.len()];
            }
        }
        Ok(buf.len())
    }

    fn set_mute(&self, mute: bool) -> Result<()> {
        self.muted.store(mute, Ordering::SeqCst);
        Ok(())
    }

    fn mute(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CaptureFrames;
    use hpae_core::{ManualClock, SampleFormat};

    fn sink_info() -> SinkInfo {
        SinkInfo {
            device_name: "Speaker".into(),
            device_class: "primary".into(),
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::S16Le,
            frame_len: 960,
            ..SinkInfo::default()
        }
    }

    #[test]
    fn render_requires_init() {
        let sink = NullRenderSink::new();
        assert!(matches!(sink.render_frame(&[0; 4]), Err(HpaeError::NotInited)));
        assert!(matches!(sink.start(), Err(HpaeError::NotInited)));
        sink.init(&sink_info()).unwrap();
        assert_eq!(sink.render_frame(&[1; 4]).unwrap(), 4);
        assert_eq!(sink.render_calls(), 2);
        assert_eq!(sink.last_frame(), vec![1; 4]);
    }

    #[test]
    fn failing_sink_reports_device_error() {
        let sink = NullRenderSink::new();
        sink.init(&sink_info()).unwrap();
        sink.set_fail_render(true);
        let err = sink.render_frame(&[0; 4]).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(sink.bytes_rendered(), 0);
    }

    #[test]
    fn paced_sink_sleeps_one_frame() {
        let clock = Arc::new(ManualClock::new());
        let sink = NullRenderSink::paced(clock.clone()).with_capture();
        sink.init(&sink_info()).unwrap();
        sink.render_frame(&[0; 3840]).unwrap();
        sink.render_frame(&[2; 3840]).unwrap();
        assert_eq!(clock.sleep_count(), 2);
        assert_eq!(clock.last_sleep(), Duration::from_millis(20));
        assert_eq!(sink.captured().len(), 7680);
        assert_eq!(sink.presentation_position().unwrap().0, 1920);
    }

    #[test]
    fn parameters_are_recorded() {
        let sink = NullRenderSink::new();
        sink.set_audio_parameter("k", "c", "1");
        sink.set_audio_parameter("k", "c", "2");
        assert_eq!(sink.audio_parameter("k", "c"), "2");
        assert_eq!(sink.parameters().len(), 2);
    }

    #[test]
    fn capture_pattern_repeats() {
        let source = NullCaptureSource::with_pattern(vec![1, 2, 3]);
        source.init(&SourceInfo::default()).unwrap();
        let mut buf = [0u8; 5];
        source.capture_frame(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 1, 2]);
        source.capture_frame(&mut buf).unwrap();
        assert_eq!(buf, [3, 1, 2, 3, 1]);

        source.set_mute(true).unwrap();
        source.capture_frame(&mut buf).unwrap();
        assert_eq!(buf, [0; 5]);
    }

    #[test]
    fn capture_with_ec_zero_fills_references() {
        let source = NullCaptureSource::with_pattern(vec![9]);
        source.init(&SourceInfo::default()).unwrap();
        let mut mic = [0u8; 4];
        let mut ec = [7u8; 4];
        let mut frames = CaptureFrames {
            mic: &mut mic,
            ec: Some(&mut ec),
            mic_ref: None,
        };
        source.capture_frame_with_ec(&mut frames).unwrap();
        assert_eq!(mic, [9; 4]);
        assert_eq!(ec, [0; 4]);
    }
}
