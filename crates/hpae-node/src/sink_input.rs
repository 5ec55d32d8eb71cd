//! Sink input node: the entry of one client render stream.
//!
//! Each tick the node asks the client's [`WriteCallback`] for one frame in
//! the stream's wire format, converts it to float and hands it downstream.
//!
//! - **11025 Hz** streams are pulled every other tick with a 40ms frame,
//!   starting with the first tick; on the ticks in between the node emits an empty buffer and the converter
//!   downstream bridges the gap from its FIFO.
//! - **History**: with `history_frame_count > 0` every pulled frame is also
//!   stored in a ring. After a rewind the node replays those frames, asking
//!   the client only for a position update (`need_data == false`).
//! - **Underflow**: a failed pull zero-fills the frame, marks it invalid and
//!   reports [`Operation::Underflow`]; an armed drain then reports
//!   [`Operation::Drained`] once.
//! - **Offload** sinks do not pull at all until offload is enabled.

use std::sync::{Arc, Weak};

use hpae_core::{
    AudioNode, Clock, HpaeError, NodeInfo, NodeType, Operation, PcmBuffer, PcmBufferInfo, Result,
    SAMPLE_RATE_11025, SessionState, convert_to_float,
};
use hpae_io::{WriteCallback, WriteRequest};

/// Device class of offload sinks.
pub const OFFLOAD_CLASS: &str = "offload";

/// Pulls a client render stream into the pipeline.
pub struct SinkInputNode {
    info: NodeInfo,
    input: PcmBuffer,
    empty: PcmBuffer,
    emitted_empty: bool,
    pull_data_flag: bool,
    history: Option<PcmBuffer>,
    write_callback: Option<Weak<dyn WriteCallback>>,
    request: WriteRequest,
    clock: Arc<dyn Clock>,
    total_frames: u64,
    drain: bool,
    offload_enable: bool,
    state: SessionState,
    app_uid: i32,
}

impl SinkInputNode {
    /// Sink input for the stream described by `info`.
    ///
    /// 11025 Hz streams get a 441-frame (40ms) frame regardless of
    /// `info.frame_len`.
    pub fn new(mut info: NodeInfo, clock: Arc<dyn Clock>) -> Self {
        if info.sample_rate == SAMPLE_RATE_11025 {
            info.frame_len = 441;
        }
        let buffer_info = info.buffer_info();
        let history = (info.history_frame_count > 0)
            .then(|| PcmBuffer::new(buffer_info.with_history(info.history_frame_count)));
        let request = WriteRequest {
            data: vec![0; info.frame_bytes()],
            device_class: info.device_class.clone(),
            device_net_id: info.device_net_id.clone(),
            need_data: true,
            ..WriteRequest::default()
        };
        Self {
            input: PcmBuffer::new(buffer_info),
            empty: PcmBuffer::new(PcmBufferInfo::new(
                info.channels,
                0,
                info.sample_rate,
                info.channel_layout,
            )),
            emitted_empty: false,
            pull_data_flag: info.sample_rate == SAMPLE_RATE_11025,
            history,
            write_callback: None,
            request,
            clock,
            total_frames: 0,
            drain: false,
            offload_enable: false,
            state: SessionState::New,
            app_uid: -1,
            info,
        }
    }

    /// Registers the client producer. Held weakly.
    pub fn register_write_callback(&mut self, callback: Weak<dyn WriteCallback>) {
        self.write_callback = Some(callback);
    }

    /// Arms the single-shot drain report.
    pub fn drain(&mut self) {
        tracing::info!(session_id = self.info.session_id, "drain requested");
        self.drain = true;
    }

    /// Whether a drain is armed.
    pub fn is_draining(&self) -> bool {
        self.drain
    }

    /// Drops buffered history.
    ///
    /// With no history configured the ring is released; with the same depth
    /// it is cleared; with a new depth it is rebuilt.
    pub fn flush(&mut self) {
        let depth = self.info.history_frame_count;
        if depth == 0 {
            self.history = None;
        } else if let Some(h) = self.history.as_mut().filter(|h| h.frames() == depth) {
            h.reset();
        } else {
            self.history = Some(PcmBuffer::new(self.info.buffer_info().with_history(depth)));
        }
        tracing::debug!(session_id = self.info.session_id, depth, "flush");
    }

    /// Rewinds the history ring by `rewind_us` and returns the frames
    /// re-exposed for replay.
    pub fn rewind_history_buffer(&mut self, rewind_us: u64) -> Result<usize> {
        let Some(history) = self.history.as_mut() else {
            tracing::error!(session_id = self.info.session_id, "rewind without history");
            return Err(HpaeError::InvalidOperation);
        };
        let frames = convert_us_to_frame_count(rewind_us, &self.info);
        let rewound = history.rewind_buffer(frames);
        tracing::info!(session_id = self.info.session_id, frames, rewound, "rewind history");
        Ok(rewound)
    }

    /// Frames delivered to the device side and the current monotonic time.
    ///
    /// Frames still waiting in history do not count as delivered.
    pub fn current_position(&self) -> (u64, u64) {
        let pending = self.history.as_ref().map_or(0, PcmBuffer::cur_frames) as u64;
        let position = self
            .total_frames
            .saturating_sub(pending * self.info.frame_len as u64);
        (position, self.clock.monotonic_ns())
    }

    /// Total frames pulled from the client.
    pub fn frames_written(&self) -> u64 {
        self.total_frames
    }

    /// Latency last reported by the manager, in microseconds.
    pub fn latency_us(&self) -> u64 {
        self.request.latency_us
    }

    /// Session state as tracked by the manager.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Records the session state.
    pub fn set_state(&mut self, state: SessionState) {
        tracing::debug!(session_id = self.info.session_id, from = ?self.state, to = ?state, "session state");
        self.state = state;
    }

    /// Uid of the owning app.
    pub fn app_uid(&self) -> i32 {
        self.app_uid
    }

    /// Associates the owning app.
    pub fn set_app_uid(&mut self, uid: i32) {
        self.app_uid = uid;
    }

    /// Gates pulls on offload sinks.
    pub fn set_offload_enabled(&mut self, enable: bool) {
        self.offload_enable = enable;
    }

    /// Whether offload pulls are enabled.
    pub fn offload_enabled(&self) -> bool {
        self.offload_enable
    }

    /// Frames currently buffered in history.
    pub fn history_frames(&self) -> usize {
        self.history.as_ref().map_or(0, PcmBuffer::cur_frames)
    }

    fn get_data_from_shared_buffer(&mut self) -> Result<()> {
        let (position, timestamp) = self.current_position();
        self.request.frames_written = self.total_frames;
        self.request.frame_position = position;
        self.request.timestamp_ns = timestamp;
        self.request.need_data = self.history.as_ref().is_none_or(|h| h.cur_frames() == 0);

        let Some(callback) = self.write_callback.as_ref().and_then(Weak::upgrade) else {
            tracing::error!(session_id = self.info.session_id, "write callback is gone");
            return Ok(());
        };
        callback.on_write_data(&mut self.request)
    }

    /// Returns `false` when the frame was served from history.
    fn read_to_audio_buffer(&mut self) -> (bool, Result<()>) {
        let status = self.info.callback();
        if let Some(cb) = &status {
            self.request.latency_us = cb.on_request_latency(self.info.session_id);
        }

        let ret = if self.info.device_class == OFFLOAD_CLASS && !self.offload_enable {
            tracing::warn!(session_id = self.info.session_id, "offload disabled, not pulling");
            Err(HpaeError::OperationFailed("offload disabled".into()))
        } else {
            let ret = self.get_data_from_shared_buffer();
            if self.info.sample_rate == SAMPLE_RATE_11025 {
                self.pull_data_flag = false;
            }
            if !self.request.need_data
                && let Some(history) = self.history.as_mut()
            {
                history.get_frame_data(&mut self.input);
                return (false, ret);
            }
            self.check_and_destroy_history();

            if let (Some(cb), Err(e)) = (&status, &ret) {
                tracing::debug!(session_id = self.info.session_id, error = %e, "underflow");
                cb.on_node_status_update(self.info.session_id, Operation::Underflow);
                if self.drain {
                    cb.on_node_status_update(self.info.session_id, Operation::Drained);
                    self.drain = false;
                }
            }
            ret
        };

        self.input.set_valid(ret.is_ok());
        (true, ret)
    }

    fn check_and_destroy_history(&mut self) {
        let depth = self.info.history_frame_count;
        if depth == 0 {
            if self.history.take().is_some() {
                tracing::debug!(session_id = self.info.session_id, "history released");
            }
        } else if self.history.is_none() {
            self.history = Some(PcmBuffer::new(self.info.buffer_info().with_history(depth)));
            tracing::debug!(session_id = self.info.session_id, depth, "history created");
        }
    }
}

/// Number of history frames covering `us` microseconds of `info`'s wire data.
fn convert_us_to_frame_count(us: u64, info: &NodeInfo) -> usize {
    let frame_bytes = info.frame_bytes() as u64;
    if frame_bytes == 0 {
        return 0;
    }
    (us * u64::from(info.sample_rate) / 1_000_000 / frame_bytes) as usize
}

impl AudioNode for SinkInputNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::SinkInput
    }

    fn do_process(&mut self, _inputs: &[&PcmBuffer]) -> bool {
        if self.info.sample_rate == SAMPLE_RATE_11025 && !self.pull_data_flag {
            self.pull_data_flag = true;
            self.emitted_empty = true;
            return true;
        }
        self.emitted_empty = false;

        let (pulled, ret) = self.read_to_audio_buffer();
        if !pulled {
            return true;
        }

        convert_to_float(self.info.format, &self.request.data, self.input.frame_mut());
        if ret.is_err() {
            self.input.frame_mut().fill(0.0);
            self.input.set_silence(true);
        } else {
            self.input.update_silence();
            self.total_frames += self.info.frame_len as u64;
            if let Some(history) = self.history.as_mut() {
                history.store_frame_data(&self.input);
            }
        }
        self.input.set_stream_type(self.info.stream_type);
        self.input.set_stream_usage(self.info.stream_usage);
        true
    }

    fn output(&self, port: u16) -> Option<&PcmBuffer> {
        if port != 0 {
            return None;
        }
        Some(if self.emitted_empty { &self.empty } else { &self.input })
    }

    fn reset(&mut self) -> bool {
        self.input.reset();
        self.pull_data_flag = self.info.sample_rate == SAMPLE_RATE_11025;
        self.emitted_empty = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hpae_core::{ManualClock, NodeStatusCallback, SampleFormat, StreamInfo};

    use super::*;

    #[derive(Default)]
    struct Status(Mutex<Vec<Operation>>);

    impl NodeStatusCallback for Status {
        fn on_request_latency(&self, _session_id: u32) -> u64 {
            1500
        }

        fn on_node_status_update(&self, _session_id: u32, operation: Operation) {
            self.0.lock().unwrap().push(operation);
        }
    }

    /// Serves a fixed byte pattern, or fails when empty.
    struct Source {
        frame: Mutex<Option<Vec<u8>>>,
        calls: Mutex<Vec<bool>>,
    }

    impl Source {
        fn new(frame: Option<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                frame: Mutex::new(frame),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl WriteCallback for Source {
        fn on_write_data(&self, request: &mut WriteRequest) -> Result<()> {
            self.calls.lock().unwrap().push(request.need_data);
            if !request.need_data {
                return Ok(());
            }
            match self.frame.lock().unwrap().as_ref() {
                Some(f) => {
                    request.data.copy_from_slice(f);
                    Ok(())
                }
                None => Err(HpaeError::NotEnoughData),
            }
        }
    }

    fn node(rate: u32, history: usize, status: &Arc<Status>) -> SinkInputNode {
        let mut info = NodeInfo::from_stream(&StreamInfo::play(1, 1, rate, SampleFormat::S16Le));
        info.history_frame_count = history;
        let weak: Weak<dyn NodeStatusCallback> = Arc::downgrade(status) as _;
        SinkInputNode::new(info.with_callback(weak), Arc::new(ManualClock::new()))
    }

    fn s16(value: i16, samples: usize) -> Vec<u8> {
        (0..samples).flat_map(|_| value.to_le_bytes()).collect()
    }

    #[test]
    fn pulls_and_converts() {
        let status = Arc::new(Status::default());
        let mut n = node(48000, 0, &status);
        let src = Source::new(Some(s16(16384, 960)));
        let weak: Weak<dyn WriteCallback> = Arc::downgrade(&src) as _;
        n.register_write_callback(weak);

        assert!(n.do_process(&[]));
        let out = n.output(0).unwrap();
        assert!(out.is_valid());
        assert!(out.data().iter().all(|&s| (s - 0.5).abs() < 1e-4));
        assert_eq!(n.frames_written(), 960);
        assert_eq!(n.latency_us(), 1500);
    }

    #[test]
    fn underflow_reports_and_drains_once() {
        let status = Arc::new(Status::default());
        let mut n = node(48000, 0, &status);
        let src = Source::new(None);
        let weak: Weak<dyn WriteCallback> = Arc::downgrade(&src) as _;
        n.register_write_callback(weak);
        n.drain();

        n.do_process(&[]);
        n.do_process(&[]);
        let out = n.output(0).unwrap();
        assert!(!out.is_valid());
        assert!(out.data().iter().all(|&s| s == 0.0));
        assert_eq!(
            *status.0.lock().unwrap(),
            vec![Operation::Underflow, Operation::Drained, Operation::Underflow]
        );
        assert!(!n.is_draining());
        assert_eq!(n.frames_written(), 0);
    }

    #[test]
    fn dropped_callback_counts_as_silence() {
        let status = Arc::new(Status::default());
        let mut n = node(48000, 0, &status);
        let src = Source::new(Some(s16(100, 960)));
        let weak: Weak<dyn WriteCallback> = Arc::downgrade(&src) as _;
        n.register_write_callback(weak);
        drop(src);

        n.do_process(&[]);
        assert!(n.output(0).unwrap().is_valid());
        assert!(status.0.lock().unwrap().is_empty());
    }

    #[test]
    fn rate_11025_alternates_with_empty_frames() {
        let status = Arc::new(Status::default());
        let mut n = node(11025, 0, &status);
        assert_eq!(n.node_info().frame_len, 441);
        let src = Source::new(Some(s16(1000, 441)));
        let weak: Weak<dyn WriteCallback> = Arc::downgrade(&src) as _;
        n.register_write_callback(weak);

        let mut lens = Vec::new();
        for _ in 0..4 {
            n.do_process(&[]);
            lens.push(n.output(0).unwrap().frame_len());
        }
        assert_eq!(lens, vec![441, 0, 441, 0]);
        assert_eq!(src.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn rate_11025_pulls_first_tick_after_reset() {
        let status = Arc::new(Status::default());
        let mut n = node(11025, 0, &status);
        let src = Source::new(Some(s16(1000, 441)));
        let weak: Weak<dyn WriteCallback> = Arc::downgrade(&src) as _;
        n.register_write_callback(weak);

        n.do_process(&[]);
        n.do_process(&[]);
        n.do_process(&[]);
        assert!(n.reset());
        n.do_process(&[]);
        assert_eq!(n.output(0).unwrap().frame_len(), 441);
        assert_eq!(src.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn offload_without_enable_does_not_pull() {
        let status = Arc::new(Status::default());
        let mut n = node(48000, 0, &status);
        n.node_info_mut().device_class = OFFLOAD_CLASS.into();
        let src = Source::new(Some(s16(100, 960)));
        let weak: Weak<dyn WriteCallback> = Arc::downgrade(&src) as _;
        n.register_write_callback(weak);

        n.do_process(&[]);
        assert!(src.calls.lock().unwrap().is_empty());
        assert!(!n.output(0).unwrap().is_valid());
        assert!(status.0.lock().unwrap().is_empty());

        n.set_offload_enabled(true);
        n.do_process(&[]);
        assert_eq!(src.calls.lock().unwrap().len(), 1);
        assert!(n.output(0).unwrap().is_valid());
    }

    #[test]
    fn history_replays_after_rewind() {
        let status = Arc::new(Status::default());
        let mut n = node(48000, 4, &status);
        let src = Source::new(Some(s16(8192, 960)));
        let weak: Weak<dyn WriteCallback> = Arc::downgrade(&src) as _;
        n.register_write_callback(weak);

        n.do_process(&[]);
        n.do_process(&[]);
        assert_eq!(n.frames_written(), 1920);

        // The rewind span is measured against the 1920-byte wire frame.
        let us_per_frame = 1_000_000 * 960 * 2 / 48000;
        let rewound = n.rewind_history_buffer(2 * us_per_frame).unwrap();
        assert_eq!(rewound, 2);
        assert_eq!(n.current_position().0, 0);

        n.do_process(&[]);
        assert!(!*src.calls.lock().unwrap().last().unwrap());
        assert!(n.output(0).unwrap().is_valid());
        assert_eq!(n.history_frames(), 1);
        assert_eq!(n.current_position().0, 960);
    }

    #[test]
    fn rewind_requires_history() {
        let status = Arc::new(Status::default());
        let mut n = node(48000, 0, &status);
        assert!(matches!(n.rewind_history_buffer(20_000), Err(HpaeError::InvalidOperation)));
    }

    #[test]
    fn flush_follows_history_depth() {
        let status = Arc::new(Status::default());
        let mut n = node(48000, 2, &status);
        n.node_info_mut().history_frame_count = 0;
        n.flush();
        assert_eq!(n.history_frames(), 0);
        assert!(n.rewind_history_buffer(1).is_err());

        n.node_info_mut().history_frame_count = 3;
        n.flush();
        assert!(n.rewind_history_buffer(0).is_ok());
    }
}
