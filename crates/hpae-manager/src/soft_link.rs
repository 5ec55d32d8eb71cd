//! Source-to-sink bridge inside the engine.
//!
//! A [`SoftLink`] opens a record session on a capturer and a play session
//! on a renderer and joins them through an [`AudioRingBuffer`]: the capture
//! side writes the ring through a [`RingReadCallback`] and the render side
//! drains it through a [`RingWriteCallback`]. A full ring drops the captured
//! frame and the source output counts an overflow; an empty ring zero-fills
//! and the sink input reports an underflow.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use hpae_core::{HpaeError, Result, SampleFormat, StreamInfo, StreamUsage, frame_len_for_rate};
use hpae_io::{AudioRingBuffer, ReadCallback, RingReadCallback, RingStatus, RingWriteCallback, WriteCallback};
use parking_lot::Mutex;

use crate::capturer::CapturerManager;
use crate::renderer::RendererManager;

/// Lowest session id handed out to soft-link streams.
pub const SOFT_LINK_SESSION_MIN: u32 = 90_000;
/// Highest session id handed out to soft-link streams.
pub const SOFT_LINK_SESSION_MAX: u32 = 99_999;

const RING_SPANS: u64 = 8;
const LINK_FORMAT: SampleFormat = SampleFormat::S16Le;
/// Longest `stop` waits for both workers to apply the stop.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(SOFT_LINK_SESSION_MIN);

fn following_session_id(id: u32) -> u32 {
    if (SOFT_LINK_SESSION_MIN..SOFT_LINK_SESSION_MAX).contains(&id) {
        id + 1
    } else {
        SOFT_LINK_SESSION_MIN
    }
}

/// Next soft-link session id, wrapping to the minimum after the maximum.
pub fn generate_session_id() -> u32 {
    let prev = NEXT_SESSION_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| Some(following_session_id(id)));
    // The closure never returns `None`.
    match prev {
        Ok(id) | Err(id) => id,
    }
}

/// Lifecycle of a [`SoftLink`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SoftLinkState {
    /// Constructed; no sessions exist.
    #[default]
    New,
    /// Both sessions created.
    Prepared,
    /// Both sessions started.
    Running,
    /// Both sessions stopped.
    Stopped,
    /// Sessions destroyed.
    Released,
}

impl fmt::Display for SoftLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Prepared => "prepared",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

/// A capture session on one port feeding a play session on another.
pub struct SoftLink {
    renderer: Arc<RendererManager>,
    capturer: Arc<CapturerManager>,
    render_stream: StreamInfo,
    capture_stream: StreamInfo,
    ring: Arc<AudioRingBuffer>,
    writer: Arc<RingWriteCallback>,
    reader: Arc<RingReadCallback>,
    state: Mutex<SoftLinkState>,
}

impl SoftLink {
    /// Link from `capturer`'s source to `renderer`'s sink. Both streams use
    /// the source's channel count and rate.
    pub fn new(renderer: Arc<RendererManager>, capturer: Arc<CapturerManager>) -> Result<Self> {
        let source = capturer.source_info();
        let frame_len = frame_len_for_rate(source.sample_rate);
        let bytes_per_frame = source.channels as usize * LINK_FORMAT.sample_size();
        let ring = Arc::new(AudioRingBuffer::new(
            frame_len as u64 * RING_SPANS,
            frame_len as u64,
            bytes_per_frame,
        )?);

        let mut capture_stream =
            StreamInfo::record(generate_session_id(), source.channels, source.sample_rate, LINK_FORMAT);
        capture_stream.device_name = source.source_name.clone();
        let mut render_stream =
            StreamInfo::play(generate_session_id(), source.channels, source.sample_rate, LINK_FORMAT);
        render_stream.stream_usage = StreamUsage::VoiceCommunication;
        render_stream.device_name = renderer.sink_info().device_name;

        Ok(Self {
            writer: Arc::new(RingWriteCallback::new(Arc::clone(&ring))),
            reader: Arc::new(RingReadCallback::new(Arc::clone(&ring))),
            renderer,
            capturer,
            render_stream,
            capture_stream,
            ring,
            state: Mutex::new(SoftLinkState::New),
        })
    }

    /// Current state.
    pub fn state(&self) -> SoftLinkState {
        *self.state.lock()
    }

    /// Session id of the play side.
    pub fn render_session_id(&self) -> u32 {
        self.render_stream.session_id
    }

    /// Session id of the record side.
    pub fn capture_session_id(&self) -> u32 {
        self.capture_stream.session_id
    }

    /// The ring between the two sessions.
    pub fn ring(&self) -> &Arc<AudioRingBuffer> {
        &self.ring
    }

    /// Creates both sessions. A second call before `start` is a no-op.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            SoftLinkState::Prepared => return Ok(()),
            SoftLinkState::New => {}
            other => {
                tracing::error!(state = %other, "soft link init in wrong state");
                return Err(HpaeError::IllegalState);
            }
        }

        let render_id = self.render_session_id();
        let capture_id = self.capture_session_id();
        self.renderer.create_stream(self.render_stream.clone())?;
        if let Err(e) = self.capturer.create_stream(self.capture_stream.clone()) {
            let _ = self.renderer.destroy_stream(render_id);
            return Err(e);
        }
        let writer = Arc::downgrade(&self.writer) as std::sync::Weak<dyn WriteCallback>;
        let reader = Arc::downgrade(&self.reader) as std::sync::Weak<dyn ReadCallback>;
        self.renderer.register_write_callback(render_id, writer)?;
        self.capturer.register_read_callback(capture_id, reader)?;

        *state = SoftLinkState::Prepared;
        tracing::info!(render_id, capture_id, "soft link prepared");
        Ok(())
    }

    /// Starts the capture side, then the render side.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            SoftLinkState::Running => return Ok(()),
            SoftLinkState::Prepared | SoftLinkState::Stopped => {}
            other => {
                tracing::error!(state = %other, "soft link start in wrong state");
                return Err(HpaeError::IllegalState);
            }
        }
        self.ring.set_status(RingStatus::Running);
        self.capturer.start(self.capture_session_id())?;
        self.renderer.start(self.render_session_id())?;
        *state = SoftLinkState::Running;
        tracing::info!(render_id = self.render_session_id(), "soft link running");
        Ok(())
    }

    /// Stops both sides and drops whatever the ring still holds.
    ///
    /// The ring is flushed only once both managers have applied the stop, so
    /// no captured frame lands in it afterwards.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            SoftLinkState::Stopped => return Ok(()),
            SoftLinkState::Running => {}
            other => {
                tracing::error!(state = %other, "soft link stop in wrong state");
                return Err(HpaeError::IllegalState);
            }
        }
        self.capturer.stop(self.capture_session_id())?;
        self.renderer.stop(self.render_session_id())?;
        self.wait_settled();
        self.flush_ring();
        *state = SoftLinkState::Stopped;
        tracing::info!(render_id = self.render_session_id(), "soft link stopped");
        Ok(())
    }

    /// Destroys both sessions. Allowed from any state.
    pub fn release(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == SoftLinkState::Released {
            return Ok(());
        }
        if *state != SoftLinkState::New {
            // The ports may already be closed; release still completes.
            if let Err(e) = self.capturer.destroy_stream(self.capture_session_id()) {
                tracing::warn!(error = %e, "soft link capture release failed");
            }
            if let Err(e) = self.renderer.destroy_stream(self.render_session_id()) {
                tracing::warn!(error = %e, "soft link render release failed");
            }
        }
        self.ring.set_status(RingStatus::Released);
        *state = SoftLinkState::Released;
        tracing::info!(render_id = self.render_session_id(), "soft link released");
        Ok(())
    }

    /// Client volume of the render side.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if self.state() == SoftLinkState::New {
            return Err(HpaeError::IllegalState);
        }
        self.renderer.set_client_volume(self.render_session_id(), volume)
    }

    fn wait_settled(&self) {
        let deadline = Instant::now() + SETTLE_TIMEOUT;
        while self.capturer.is_msg_processing() || self.renderer.is_msg_processing() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    render_id = self.render_session_id(),
                    "soft link stop not applied in time, flushing anyway"
                );
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn flush_ring(&self) {
        let write = self.ring.cur_write_frame();
        if let Err(e) = self.ring.reset_cur_read_write_pos(write, write) {
            tracing::warn!(error = %e, "soft link ring flush failed");
        }
        self.ring.set_status(RingStatus::Stopped);
    }
}

impl Drop for SoftLink {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl fmt::Debug for SoftLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftLink")
            .field("render_session", &self.render_session_id())
            .field("capture_session", &self.capture_session_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
