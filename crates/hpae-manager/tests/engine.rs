//! Integration tests: sessions driven through `HpaeManager` on paced null
//! sinks, null sources and WAV-file devices, observed through a status
//! listener.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use hpae_config::{EngineSettings, ModuleInfo, ModuleRole};
use hpae_core::{
    HpaeError, Operation, SampleFormat, SessionState, StreamClass, StreamInfo, SystemClock,
};
use hpae_io::{
    DeviceContext, FILE_IO_CLASS, NullRenderSink, ReadCallback, ReadRequest, WavSpec, WriteCallback,
    WriteRequest, read_wav, write_wav,
};
use hpae_manager::{
    HpaeManager, SOFT_LINK_SESSION_MAX, SOFT_LINK_SESSION_MIN, SoftLinkState, StreamStatusListener,
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(3);

type Event = (StreamClass, u32, SessionState, Operation);

struct Listener {
    tx: Sender<Event>,
}

impl StreamStatusListener for Listener {
    fn on_status_update(&self, class: StreamClass, session_id: u32, state: SessionState, operation: Operation) {
        let _ = self.tx.send((class, session_id, state, operation));
    }
}

struct Harness {
    engine: HpaeManager,
    device: Arc<DeviceContext>,
    events: Receiver<Event>,
    _listener: Arc<Listener>,
}

impl Harness {
    fn new() -> Self {
        let device = Arc::new(DeviceContext::with_builtin(Arc::new(SystemClock)));
        let engine = HpaeManager::new(Arc::clone(&device), EngineSettings::default());
        let (tx, events) = crossbeam_channel::unbounded();
        let listener = Arc::new(Listener { tx });
        let weak: Weak<dyn StreamStatusListener> = Arc::downgrade(&listener) as _;
        engine.register_listener(weak);
        Self {
            engine,
            device,
            events,
            _listener: listener,
        }
    }

    /// Opens a sink on its own paced null device and returns the port id.
    fn open_sink(&self, name: &str) -> (u32, Arc<NullRenderSink>) {
        let class = format!("test_{name}");
        let sink = Arc::new(NullRenderSink::paced(self.device.clock()));
        self.device.register_render_sink(&class, Arc::clone(&sink) as _);
        let module = ModuleInfo::new(name, ModuleRole::Sink)
            .with_class(class)
            .with_format(48000, 2, "s16le", 3840);
        (self.engine.open_audio_port(&module).unwrap(), sink)
    }

    fn open_source(&self, name: &str) -> u32 {
        let module = ModuleInfo::new(name, ModuleRole::Source)
            .with_class("null")
            .with_format(16000, 1, "s16le", 640);
        self.engine.open_audio_port(&module).unwrap()
    }

    /// Waits for `operation` on `session_id`, skipping other events.
    fn wait_for(&self, session_id: u32, operation: Operation) -> SessionState {
        let deadline = Instant::now() + WAIT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(left) {
                Ok((_, id, state, op)) if id == session_id && op == operation => return state,
                Ok(_) => {}
                Err(_) => panic!("no {operation} for session {session_id}"),
            }
        }
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Client producer serving a constant S16 value.
struct ConstantClient(i16);

impl WriteCallback for ConstantClient {
    fn on_write_data(&self, request: &mut WriteRequest) -> hpae_core::Result<()> {
        let bytes = self.0.to_le_bytes();
        for chunk in request.data.chunks_exact_mut(2) {
            chunk.copy_from_slice(&bytes);
        }
        Ok(())
    }
}

/// Client producer serving `frames` constant frames, then underrunning.
struct FiniteClient {
    value: i16,
    frames_left: AtomicUsize,
}

impl WriteCallback for FiniteClient {
    fn on_write_data(&self, request: &mut WriteRequest) -> hpae_core::Result<()> {
        let served = self
            .frames_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if served.is_err() {
            request.data.fill(0);
            return Err(HpaeError::NotEnoughData);
        }
        let bytes = self.value.to_le_bytes();
        for chunk in request.data.chunks_exact_mut(2) {
            chunk.copy_from_slice(&bytes);
        }
        Ok(())
    }
}

/// Largest absolute S16 sample seen.
#[derive(Default)]
struct PeakReader {
    peak: AtomicU64,
}

impl ReadCallback for PeakReader {
    fn on_read_data(&self, request: &ReadRequest<'_>) -> hpae_core::Result<()> {
        let peak = request
            .data
            .chunks_exact(2)
            .map(|c| u64::from(i16::from_le_bytes([c[0], c[1]]).unsigned_abs()))
            .max()
            .unwrap_or(0);
        self.peak.fetch_max(peak, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct CountingReader {
    bytes: AtomicU64,
}

impl ReadCallback for CountingReader {
    fn on_read_data(&self, request: &ReadRequest<'_>) -> hpae_core::Result<()> {
        self.bytes.fetch_add(request.data.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Render sessions
// ---------------------------------------------------------------------------

#[test]
fn sink_input_info_echoes_stream_until_destroyed() {
    let h = Harness::new();
    h.open_sink("speaker");

    let mut stream = StreamInfo::play(11, 2, 44100, SampleFormat::S16Le);
    stream.uid = 1000;
    h.engine.create_stream(stream.clone()).unwrap();

    let info = h.engine.get_sink_input_info(11).unwrap();
    assert_eq!(info.stream, stream);
    assert_eq!(info.node_info.channels, 2);
    assert_eq!(info.node_info.sample_rate, 44100);
    assert_eq!(info.node_info.format, SampleFormat::S16Le);
    assert_eq!(info.state, SessionState::Prepared);

    h.engine.destroy_stream(StreamClass::Play, 11).unwrap();
    assert!(matches!(h.engine.get_sink_input_info(11), Err(HpaeError::InvalidOperation)));
}

#[test]
fn renderer_reports_unknown_session() {
    let h = Harness::new();
    h.open_sink("speaker");
    let renderer = h.engine.renderer("speaker").unwrap();

    renderer.create_stream(StreamInfo::play(5, 2, 48000, SampleFormat::S16Le)).unwrap();
    assert!(renderer.get_sink_input_info(5).is_ok());
    renderer.destroy_stream(5).unwrap();
    assert!(matches!(renderer.get_sink_input_info(5), Err(HpaeError::InvalidOperation)));
}

#[test]
fn create_rejects_bad_geometry_and_duplicates() {
    let h = Harness::new();
    h.open_sink("speaker");

    let bad = StreamInfo::play(1, 0, 48000, SampleFormat::S16Le);
    assert!(matches!(h.engine.create_stream(bad), Err(HpaeError::InvalidParam(_))));

    let ok = StreamInfo::play(2, 2, 48000, SampleFormat::S16Le);
    h.engine.create_stream(ok.clone()).unwrap();
    assert!(matches!(h.engine.create_stream(ok), Err(HpaeError::InvalidOperation)));
}

#[test]
fn start_pause_stop_report_status() {
    let h = Harness::new();
    let (_, sink) = h.open_sink("speaker");
    let client: Arc<dyn WriteCallback> = Arc::new(ConstantClient(1000));

    h.engine.create_stream(StreamInfo::play(21, 2, 48000, SampleFormat::S16Le)).unwrap();
    h.engine.register_write_callback(21, Arc::downgrade(&client)).unwrap();

    h.engine.start(StreamClass::Play, 21).unwrap();
    assert_eq!(h.wait_for(21, Operation::Started), SessionState::Running);
    wait_until(|| sink.render_calls() > 3);
    assert!(sink.is_started());
    assert!(sink.bytes_rendered() > 0);

    h.engine.pause(StreamClass::Play, 21).unwrap();
    assert_eq!(h.wait_for(21, Operation::Paused), SessionState::Paused);
    assert_eq!(h.engine.get_sink_input_info(21).unwrap().state, SessionState::Paused);

    h.engine.start(StreamClass::Play, 21).unwrap();
    h.wait_for(21, Operation::Started);
    h.engine.stop(StreamClass::Play, 21).unwrap();
    assert_eq!(h.wait_for(21, Operation::Stopped), SessionState::Stopped);

    h.engine.release(StreamClass::Play, 21).unwrap();
    h.wait_for(21, Operation::Released);
}

#[test]
fn pause_before_start_is_immediate() {
    let h = Harness::new();
    h.open_sink("speaker");
    h.engine.create_stream(StreamInfo::play(22, 2, 48000, SampleFormat::S16Le)).unwrap();

    h.engine.pause(StreamClass::Play, 22).unwrap();
    assert_eq!(h.wait_for(22, Operation::Paused), SessionState::Paused);
}

#[test]
fn client_volume_is_recorded() {
    let h = Harness::new();
    h.open_sink("speaker");
    h.engine.create_stream(StreamInfo::play(23, 2, 48000, SampleFormat::S16Le)).unwrap();

    h.engine.set_client_volume(23, 0.25).unwrap();
    let info = h.engine.get_sink_input_info(23).unwrap();
    assert!((info.client_volume - 0.25).abs() < 1e-6);
}

#[test]
fn flush_and_drain_are_play_only() {
    let h = Harness::new();
    h.open_sink("speaker");
    h.open_source("mic");
    h.engine.create_stream(StreamInfo::play(24, 2, 48000, SampleFormat::S16Le)).unwrap();
    h.engine.create_stream(StreamInfo::record(25, 1, 16000, SampleFormat::S16Le)).unwrap();

    h.engine.flush(StreamClass::Play, 24).unwrap();
    h.wait_for(24, Operation::Flushed);
    h.engine.drain(StreamClass::Play, 24).unwrap();
    h.wait_for(24, Operation::Drained);

    assert!(matches!(h.engine.flush(StreamClass::Record, 25), Err(HpaeError::NotSupported)));
    assert!(matches!(h.engine.drain(StreamClass::Record, 25), Err(HpaeError::NotSupported)));
}

// ---------------------------------------------------------------------------
// Capture sessions
// ---------------------------------------------------------------------------

#[test]
fn capture_session_delivers_frames() {
    let h = Harness::new();
    h.open_source("mic");
    let reader = Arc::new(CountingReader::default());
    let weak: Weak<dyn ReadCallback> = Arc::downgrade(&reader) as _;

    h.engine.create_stream(StreamInfo::record(31, 1, 16000, SampleFormat::S16Le)).unwrap();
    h.engine.register_read_callback(31, weak).unwrap();
    assert_eq!(h.engine.get_source_output_info(31).unwrap().state, SessionState::Prepared);

    h.engine.start(StreamClass::Record, 31).unwrap();
    assert_eq!(h.wait_for(31, Operation::Started), SessionState::Running);
    wait_until(|| reader.bytes.load(Ordering::SeqCst) > 0);

    let info = h.engine.get_source_output_info(31).unwrap();
    assert!(info.frames_read > 0);
    assert_eq!(info.node_info.channels, 1);

    h.engine.stop(StreamClass::Record, 31).unwrap();
    assert_eq!(h.wait_for(31, Operation::Stopped), SessionState::Stopped);
    h.engine.destroy_stream(StreamClass::Record, 31).unwrap();
    h.wait_for(31, Operation::Released);
}

#[test]
fn capture_converts_to_session_geometry() {
    let h = Harness::new();
    h.open_source("mic");
    let reader = Arc::new(CountingReader::default());
    let weak: Weak<dyn ReadCallback> = Arc::downgrade(&reader) as _;

    // 48 kHz stereo session on a 16 kHz mono source.
    h.engine.create_stream(StreamInfo::record(32, 2, 48000, SampleFormat::S16Le)).unwrap();
    h.engine.register_read_callback(32, weak).unwrap();
    h.engine.start(StreamClass::Record, 32).unwrap();
    h.wait_for(32, Operation::Started);
    wait_until(|| reader.bytes.load(Ordering::SeqCst) > 0);

    let bytes = reader.bytes.load(Ordering::SeqCst);
    assert_eq!(bytes % (960 * 2 * 2), 0);
}

#[test]
fn source_mute_needs_open_source() {
    let h = Harness::new();
    assert!(h.engine.set_source_mute("mic", true).is_err());
    h.open_source("mic");
    h.engine.set_source_mute("mic", true).unwrap();
}

// ---------------------------------------------------------------------------
// Ports and routing
// ---------------------------------------------------------------------------

#[test]
fn reopen_returns_same_port_and_reloads() {
    let h = Harness::new();
    let (id, _) = h.open_sink("speaker");
    let (again, _) = h.open_sink("speaker");
    assert_eq!(id, again);

    let renderer = h.engine.renderer("speaker").unwrap();
    renderer.deinit().unwrap();
    assert!(!renderer.is_init());
    let (reloaded, _) = h.open_sink("speaker");
    assert_eq!(reloaded, id);
    assert!(renderer.is_init());
}

#[test]
fn streams_route_by_name_or_default() {
    let h = Harness::new();
    let (a, _) = h.open_sink("sink_a");
    let (b, _) = h.open_sink("sink_b");
    assert_ne!(a, b);
    assert_eq!(h.engine.port_id("sink_b"), Some(b));

    h.engine.create_stream(StreamInfo::play(41, 2, 48000, SampleFormat::S16Le)).unwrap();
    let mut named = StreamInfo::play(42, 2, 48000, SampleFormat::S16Le);
    named.device_name = "sink_b".into();
    h.engine.create_stream(named).unwrap();

    assert!(h.engine.renderer("sink_a").unwrap().get_sink_input_info(41).is_ok());
    assert!(h.engine.renderer("sink_b").unwrap().get_sink_input_info(42).is_ok());

    let mut missing = StreamInfo::play(43, 2, 48000, SampleFormat::S16Le);
    missing.device_name = "nowhere".into();
    assert!(matches!(h.engine.create_stream(missing), Err(HpaeError::InvalidParam(_))));
}

#[test]
fn closing_default_sink_falls_back() {
    let h = Harness::new();
    let (a, _) = h.open_sink("sink_a");
    let (b, _) = h.open_sink("sink_b");

    h.engine.close_audio_port(a).unwrap();
    assert_eq!(h.engine.renderer("").unwrap().port_id(), b);
    assert!(h.engine.close_audio_port(a).is_err());

    h.engine.set_default_sink("sink_b").unwrap();
    assert!(h.engine.set_default_sink("sink_a").is_err());
}

#[test]
fn move_keeps_running_session() {
    let h = Harness::new();
    h.open_sink("sink_a");
    let (b, sink_b) = h.open_sink("sink_b");
    let client: Arc<dyn WriteCallback> = Arc::new(ConstantClient(500));

    h.engine.create_stream(StreamInfo::play(51, 2, 48000, SampleFormat::S16Le)).unwrap();
    h.engine.register_write_callback(51, Arc::downgrade(&client)).unwrap();
    h.engine.start(StreamClass::Play, 51).unwrap();
    h.wait_for(51, Operation::Started);

    h.engine.move_sink_input(51, "sink_b").unwrap();
    assert_eq!(h.wait_for(51, Operation::Moved), SessionState::Running);
    assert!(h.engine.renderer("sink_a").unwrap().get_sink_input_info(51).is_err());

    let info = h.engine.get_sink_input_info(51).unwrap();
    assert_eq!(info.state, SessionState::Running);
    assert_eq!(h.engine.renderer("sink_b").unwrap().port_id(), b);
    wait_until(|| sink_b.render_calls() > 0);
}

// ---------------------------------------------------------------------------
// Soft link
// ---------------------------------------------------------------------------

#[test]
fn soft_link_state_machine() {
    let h = Harness::new();
    let (sink, _) = h.open_sink("speaker");
    let source = h.open_source("mic");

    let link = h.engine.create_soft_link(sink, source).unwrap();
    assert_eq!(link.state(), SoftLinkState::New);
    for id in [link.render_session_id(), link.capture_session_id()] {
        assert!((SOFT_LINK_SESSION_MIN..=SOFT_LINK_SESSION_MAX).contains(&id));
    }

    assert!(matches!(link.stop(), Err(HpaeError::IllegalState)));
    link.init().unwrap();
    assert_eq!(link.state(), SoftLinkState::Prepared);
    link.init().unwrap();
    assert!(matches!(link.stop(), Err(HpaeError::IllegalState)));

    link.start().unwrap();
    assert_eq!(link.state(), SoftLinkState::Running);
    assert!(matches!(link.init(), Err(HpaeError::IllegalState)));
    link.start().unwrap();
    link.set_volume(0.5).unwrap();
    h.wait_for(link.capture_session_id(), Operation::Started);

    link.stop().unwrap();
    assert_eq!(link.state(), SoftLinkState::Stopped);
    link.stop().unwrap();

    link.release().unwrap();
    assert_eq!(link.state(), SoftLinkState::Released);
    link.release().unwrap();
}

#[test]
fn soft_link_ring_stays_empty_after_stop() {
    let h = Harness::new();
    let (sink, _) = h.open_sink("speaker");
    let source = h.open_source("mic");

    let link = h.engine.create_soft_link(sink, source).unwrap();
    link.init().unwrap();
    link.start().unwrap();
    h.wait_for(link.capture_session_id(), Operation::Started);
    thread::sleep(Duration::from_millis(100));

    link.stop().unwrap();
    let ring = link.ring();
    let write = ring.cur_write_frame();
    assert_eq!(ring.available_data_frames(), 0);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(ring.cur_write_frame(), write);
    assert_eq!(ring.available_data_frames(), 0);
}

#[test]
fn soft_link_survives_closed_port() {
    let h = Harness::new();
    let (sink, _) = h.open_sink("speaker");
    let source = h.open_source("mic");

    let link = h.engine.create_soft_link(sink, source).unwrap();
    link.init().unwrap();
    link.start().unwrap();
    h.engine.close_audio_port(sink).unwrap();
    thread::sleep(Duration::from_millis(100));

    link.release().unwrap();
    assert_eq!(link.state(), SoftLinkState::Released);
}

#[test]
fn soft_link_needs_sink_and_source() {
    let h = Harness::new();
    let (sink, _) = h.open_sink("speaker");
    let source = h.open_source("mic");
    assert!(h.engine.create_soft_link(source, sink).is_err());
    assert!(h.engine.create_soft_link(sink, 999).is_err());
}

// ---------------------------------------------------------------------------
// File devices
// ---------------------------------------------------------------------------

#[test]
fn file_sink_records_drained_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("speaker.wav");
    let h = Harness::new();
    let module = ModuleInfo::new("file_speaker", ModuleRole::Sink)
        .with_class(FILE_IO_CLASS)
        .with_format(48000, 2, "s16le", 3840)
        .with_file(path.to_string_lossy());
    let port = h.engine.open_audio_port(&module).unwrap();

    let client: Arc<dyn WriteCallback> = Arc::new(FiniteClient {
        value: 8192,
        frames_left: AtomicUsize::new(10),
    });
    h.engine.create_stream(StreamInfo::play(61, 2, 48000, SampleFormat::S16Le)).unwrap();
    h.engine.register_write_callback(61, Arc::downgrade(&client)).unwrap();
    h.engine.start(StreamClass::Play, 61).unwrap();
    h.engine.drain(StreamClass::Play, 61).unwrap();
    h.wait_for(61, Operation::Drained);
    h.engine.stop(StreamClass::Play, 61).unwrap();
    h.wait_for(61, Operation::Stopped);
    h.engine.close_audio_port(port).unwrap();

    let (samples, spec) = read_wav(&path).unwrap();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 48000);
    assert!(samples.len() >= 10 * 960 * 2, "only {} samples", samples.len());
    assert!(samples.iter().any(|s| (s - 0.25).abs() < 0.01));
}

#[test]
fn file_source_replays_wav() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mic.wav");
    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        is_float: false,
    };
    write_wav(&path, &vec![0.5f32; 16000], spec).unwrap();

    let h = Harness::new();
    let module = ModuleInfo::new("file_mic", ModuleRole::Source)
        .with_class(FILE_IO_CLASS)
        .with_format(16000, 1, "s16le", 640)
        .with_file(path.to_string_lossy());
    h.engine.open_audio_port(&module).unwrap();

    let reader = Arc::new(PeakReader::default());
    let weak: Weak<dyn ReadCallback> = Arc::downgrade(&reader) as _;
    h.engine.create_stream(StreamInfo::record(62, 1, 16000, SampleFormat::S16Le)).unwrap();
    h.engine.register_read_callback(62, weak).unwrap();
    h.engine.start(StreamClass::Record, 62).unwrap();
    h.wait_for(62, Operation::Started);
    wait_until(|| reader.peak.load(Ordering::SeqCst) > 16000);

    h.engine.stop(StreamClass::Record, 62).unwrap();
    h.wait_for(62, Operation::Stopped);
}
