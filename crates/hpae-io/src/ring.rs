//! Span-structured ring buffer shared between a client and the engine.
//!
//! The ring holds `total_frames` frames split into spans of `span_frames`.
//! Positions are absolute frame counters that only grow:
//!
//! ```text
//!   base <= read <= write
//!   write - read < total_frames          (at least one free frame)
//!   write - base < 2 * total_frames
//! ```
//!
//! `base` advances by `total_frames` whenever the reader passes a whole lap,
//! which keeps the second invariant. A frame at absolute position `p` lives
//! at byte offset `((p - base) % total_frames) * bytes_per_frame`.
//!
//! Each span carries a status (`Idle → Writing → WriteDone → Reading →
//! ReadDone`), write/read timestamps, a mute flag and a volume ramp. One
//! producer and one consumer may use the ring from different threads; the
//! positions are atomics and the sample bytes sit behind a short lock held
//! only for the copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use hpae_core::{Clock, HpaeError, Result, SystemClock};
use parking_lot::Mutex;

/// Lifecycle of one span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SpanStatus {
    /// Never written.
    Idle = 0,
    /// Producer is copying into the span.
    Writing = 1,
    /// Producer finished the span.
    WriteDone = 2,
    /// Consumer is copying out of the span.
    Reading = 3,
    /// Consumer finished the span.
    ReadDone = 4,
    /// Span is unusable.
    Invalid = 5,
}

impl SpanStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Writing,
            2 => Self::WriteDone,
            3 => Self::Reading,
            4 => Self::ReadDone,
            _ => Self::Invalid,
        }
    }
}

/// Stream status published through the ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum RingStatus {
    /// Created, not started.
    #[default]
    Idle = 0,
    /// Start requested.
    Starting = 1,
    /// Frames are flowing.
    Running = 2,
    /// Pause requested.
    Pausing = 3,
    /// Paused.
    Paused = 4,
    /// Stop requested.
    Stopping = 5,
    /// Stopped.
    Stopped = 6,
    /// Released.
    Released = 7,
    /// Unusable.
    Invalid = 8,
}

impl RingStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Pausing,
            4 => Self::Paused,
            5 => Self::Stopping,
            6 => Self::Stopped,
            7 => Self::Released,
            _ => Self::Invalid,
        }
    }
}

/// Per-span metadata.
#[derive(Debug)]
pub struct SpanInfo {
    status: AtomicU8,
    offset_in_frame: u64,
    write_start_ns: AtomicU64,
    write_done_ns: AtomicU64,
    read_start_ns: AtomicU64,
    read_done_ns: AtomicU64,
    mute: AtomicBool,
    volume_start: AtomicU32,
    volume_end: AtomicU32,
}

impl SpanInfo {
    fn new(offset_in_frame: u64) -> Self {
        Self {
            status: AtomicU8::new(SpanStatus::Idle as u8),
            offset_in_frame,
            write_start_ns: AtomicU64::new(0),
            write_done_ns: AtomicU64::new(0),
            read_start_ns: AtomicU64::new(0),
            read_done_ns: AtomicU64::new(0),
            mute: AtomicBool::new(false),
            volume_start: AtomicU32::new(1.0f32.to_bits()),
            volume_end: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Current status.
    pub fn status(&self) -> SpanStatus {
        SpanStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: SpanStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// First frame of the span, relative to the ring start.
    pub fn offset_in_frame(&self) -> u64 {
        self.offset_in_frame
    }

    /// When the producer started and finished the span.
    pub fn write_times_ns(&self) -> (u64, u64) {
        (
            self.write_start_ns.load(Ordering::Acquire),
            self.write_done_ns.load(Ordering::Acquire),
        )
    }

    /// When the consumer started and finished the span.
    pub fn read_times_ns(&self) -> (u64, u64) {
        (
            self.read_start_ns.load(Ordering::Acquire),
            self.read_done_ns.load(Ordering::Acquire),
        )
    }

    /// Whether the consumer must read zeros from this span.
    pub fn is_mute(&self) -> bool {
        self.mute.load(Ordering::Acquire)
    }

    /// Marks the span muted.
    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Release);
    }

    /// Volume ramp across the span.
    pub fn volume(&self) -> (f32, f32) {
        (
            f32::from_bits(self.volume_start.load(Ordering::Acquire)),
            f32::from_bits(self.volume_end.load(Ordering::Acquire)),
        )
    }

    /// Sets the volume ramp across the span.
    pub fn set_volume(&self, start: f32, end: f32) {
        self.volume_start.store(start.to_bits(), Ordering::Release);
        self.volume_end.store(end.to_bits(), Ordering::Release);
    }
}

/// Frame ring with atomic positions and per-span metadata.
pub struct AudioRingBuffer {
    total_frames: u64,
    span_frames: u64,
    bytes_per_frame: usize,
    base: AtomicU64,
    write: AtomicU64,
    read: AtomicU64,
    status: AtomicU8,
    handle_pos: AtomicU64,
    handle_time_ns: AtomicU64,
    spans: Vec<SpanInfo>,
    data: Mutex<Vec<u8>>,
    clock: Arc<dyn Clock>,
}

impl AudioRingBuffer {
    /// Ring of `total_frames` frames in spans of `span_frames`, stamped by
    /// the system clock.
    pub fn new(total_frames: u64, span_frames: u64, bytes_per_frame: usize) -> Result<Self> {
        Self::with_clock(total_frames, span_frames, bytes_per_frame, Arc::new(SystemClock))
    }

    /// Same as [`new`](Self::new) with an explicit clock.
    pub fn with_clock(
        total_frames: u64,
        span_frames: u64,
        bytes_per_frame: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if total_frames == 0 || span_frames == 0 || bytes_per_frame == 0 {
            return Err(HpaeError::invalid_param("ring sizes must be non-zero"));
        }
        if total_frames % span_frames != 0 {
            return Err(HpaeError::invalid_param(format!(
                "ring of {total_frames} frames is not a whole number of {span_frames}-frame spans"
            )));
        }
        let spans = (0..total_frames / span_frames)
            .map(|i| SpanInfo::new(i * span_frames))
            .collect();
        Ok(Self {
            total_frames,
            span_frames,
            bytes_per_frame,
            base: AtomicU64::new(0),
            write: AtomicU64::new(0),
            read: AtomicU64::new(0),
            status: AtomicU8::new(RingStatus::Idle as u8),
            handle_pos: AtomicU64::new(0),
            handle_time_ns: AtomicU64::new(0),
            spans,
            data: Mutex::new(vec![0; total_frames as usize * bytes_per_frame]),
            clock,
        })
    }

    /// Capacity in frames.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Frames per span.
    pub fn span_frames(&self) -> u64 {
        self.span_frames
    }

    /// Number of spans.
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Bytes per frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Absolute write position.
    pub fn cur_write_frame(&self) -> u64 {
        self.write.load(Ordering::Acquire)
    }

    /// Absolute read position.
    pub fn cur_read_frame(&self) -> u64 {
        self.read.load(Ordering::Acquire)
    }

    /// Absolute position of the current lap start.
    pub fn base_frame(&self) -> u64 {
        self.base.load(Ordering::Acquire)
    }

    /// Frames written but not yet read.
    pub fn available_data_frames(&self) -> u64 {
        self.cur_write_frame() - self.cur_read_frame()
    }

    /// Frames that can be written without breaking `write - read < total`.
    pub fn writable_frames(&self) -> u64 {
        self.total_frames - 1 - self.available_data_frames()
    }

    /// Stream status.
    pub fn status(&self) -> RingStatus {
        RingStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Publishes a new stream status.
    pub fn set_status(&self, status: RingStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Last `(position, timestamp)` pair reported by the consumer.
    pub fn handle_info(&self) -> (u64, u64) {
        (
            self.handle_pos.load(Ordering::Acquire),
            self.handle_time_ns.load(Ordering::Acquire),
        )
    }

    /// Records a `(position, timestamp)` pair.
    pub fn set_handle_info(&self, frames: u64, time_ns: u64) {
        self.handle_pos.store(frames, Ordering::Release);
        self.handle_time_ns.store(time_ns, Ordering::Release);
    }

    /// Span holding absolute frame `pos`.
    pub fn span_info(&self, pos: u64) -> Option<&SpanInfo> {
        let base = self.base_frame();
        if pos < base {
            return None;
        }
        let idx = ((pos - base) % self.total_frames / self.span_frames) as usize;
        self.spans.get(idx)
    }

    /// Moves the write position forward to `frame`.
    pub fn set_cur_write_frame(&self, frame: u64) -> Result<()> {
        let write = self.cur_write_frame();
        let read = self.cur_read_frame();
        if frame < write || frame - read >= self.total_frames {
            return Err(HpaeError::invalid_param(format!(
                "write position {frame} invalid (read {read}, write {write}, total {})",
                self.total_frames
            )));
        }
        self.write.store(frame, Ordering::Release);
        Ok(())
    }

    /// Moves the read position forward to `frame`, advancing the base after
    /// each full lap.
    pub fn set_cur_read_frame(&self, frame: u64) -> Result<()> {
        let write = self.cur_write_frame();
        let read = self.cur_read_frame();
        if frame < read || frame > write {
            return Err(HpaeError::invalid_param(format!(
                "read position {frame} invalid (read {read}, write {write})"
            )));
        }
        let mut base = self.base_frame();
        while frame >= base + self.total_frames {
            base += self.total_frames;
        }
        self.base.store(base, Ordering::Release);
        self.read.store(frame, Ordering::Release);
        Ok(())
    }

    /// Re-seats both positions; the base moves to `read`.
    pub fn reset_cur_read_write_pos(&self, read: u64, write: u64) -> Result<()> {
        if write < read || write - read >= self.total_frames {
            return Err(HpaeError::invalid_param(format!(
                "cannot reset to read {read}, write {write}"
            )));
        }
        self.base.store(read, Ordering::Release);
        self.read.store(read, Ordering::Release);
        self.write.store(write, Ordering::Release);
        Ok(())
    }

    /// Copies whole frames from `data` in at the write position.
    ///
    /// Fails with `WriteFailed` if the frames do not fit.
    pub fn write_frames(&self, data: &[u8]) -> Result<()> {
        let frames = self.whole_frames(data.len())?;
        if frames > self.writable_frames() {
            return Err(HpaeError::WriteFailed);
        }
        let start = self.cur_write_frame();
        let now = self.clock.monotonic_ns();
        self.mark_spans(start, frames, |span| {
            span.set_status(SpanStatus::Writing);
            span.write_start_ns.store(now, Ordering::Release);
        });
        {
            let mut buf = self.data.lock();
            self.copy_wrapped(start, data.len(), |ring_range, src_range| {
                buf[ring_range].copy_from_slice(&data[src_range]);
            });
        }
        let done = self.clock.monotonic_ns();
        self.mark_spans(start, frames, |span| {
            span.write_done_ns.store(done, Ordering::Release);
            span.set_status(SpanStatus::WriteDone);
        });
        self.set_cur_write_frame(start + frames)
    }

    /// Copies whole frames out at the read position into `out`.
    ///
    /// Fails with `NotEnoughData` if fewer frames are available. Frames in
    /// muted spans read as zeros.
    pub fn read_frames(&self, out: &mut [u8]) -> Result<()> {
        let frames = self.whole_frames(out.len())?;
        if frames > self.available_data_frames() {
            return Err(HpaeError::NotEnoughData);
        }
        let start = self.cur_read_frame();
        let now = self.clock.monotonic_ns();
        self.mark_spans(start, frames, |span| {
            span.set_status(SpanStatus::Reading);
            span.read_start_ns.store(now, Ordering::Release);
        });
        {
            let buf = self.data.lock();
            self.copy_wrapped(start, out.len(), |ring_range, dst_range| {
                out[dst_range].copy_from_slice(&buf[ring_range]);
            });
        }
        for f in 0..frames {
            if self.span_info(start + f).is_some_and(SpanInfo::is_mute) {
                let b = f as usize * self.bytes_per_frame;
                out[b..b + self.bytes_per_frame].fill(0);
            }
        }
        let done = self.clock.monotonic_ns();
        self.mark_spans(start, frames, |span| {
            span.read_done_ns.store(done, Ordering::Release);
            span.set_status(SpanStatus::ReadDone);
        });
        self.set_cur_read_frame(start + frames)?;
        self.set_handle_info(start + frames, done);
        Ok(())
    }

    fn whole_frames(&self, bytes: usize) -> Result<u64> {
        if bytes % self.bytes_per_frame != 0 {
            return Err(HpaeError::invalid_param(format!(
                "{bytes} bytes is not a whole number of {}-byte frames",
                self.bytes_per_frame
            )));
        }
        Ok((bytes / self.bytes_per_frame) as u64)
    }

    fn mark_spans(&self, start: u64, frames: u64, mut f: impl FnMut(&SpanInfo)) {
        let end = start + frames;
        let mut pos = start;
        while pos < end {
            let Some(info) = self.span_info(pos) else {
                break;
            };
            f(info);
            pos += self.span_frames - (pos - self.base_frame()) % self.span_frames;
        }
    }

    /// Calls `copy(ring_range, linear_range)` for the one or two byte ranges
    /// that `len` bytes at absolute frame `start` occupy.
    fn copy_wrapped(
        &self,
        start: u64,
        len: usize,
        mut copy: impl FnMut(std::ops::Range<usize>, std::ops::Range<usize>),
    ) {
        let ring_bytes = self.total_frames as usize * self.bytes_per_frame;
        let offset = ((start - self.base_frame()) % self.total_frames) as usize * self.bytes_per_frame;
        let first = len.min(ring_bytes - offset);
        copy(offset..offset + first, 0..first);
        if first < len {
            copy(0..len - first, first..len);
        }
    }
}

impl std::fmt::Debug for AudioRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRingBuffer")
            .field("total_frames", &self.total_frames)
            .field("span_frames", &self.span_frames)
            .field("bytes_per_frame", &self.bytes_per_frame)
            .field("base", &self.base_frame())
            .field("read", &self.cur_read_frame())
            .field("write", &self.cur_write_frame())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpae_core::ManualClock;

    fn ring(total: u64, span: u64) -> AudioRingBuffer {
        AudioRingBuffer::with_clock(total, span, 2, Arc::new(ManualClock::new())).unwrap()
    }

    fn frames(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(AudioRingBuffer::new(0, 1, 2).is_err());
        assert!(AudioRingBuffer::new(10, 3, 2).is_err());
        assert!(AudioRingBuffer::new(12, 3, 2).is_ok());
    }

    #[test]
    fn holds_at_most_total_minus_one() {
        let r = ring(4, 2);
        assert_eq!(r.writable_frames(), 3);
        r.write_frames(&frames(&[1, 2, 3])).unwrap();
        assert!(matches!(r.write_frames(&frames(&[4])), Err(HpaeError::WriteFailed)));
        assert_eq!(r.available_data_frames(), 3);
    }

    #[test]
    fn wraps_and_advances_base() {
        let r = ring(4, 2);
        let mut out = vec![0u8; 6];
        r.write_frames(&frames(&[1, 2, 3])).unwrap();
        r.read_frames(&mut out).unwrap();
        assert_eq!(out, frames(&[1, 2, 3]));

        r.write_frames(&frames(&[4, 5, 6])).unwrap();
        assert!(r.cur_write_frame() - r.base_frame() < 2 * r.total_frames());
        r.read_frames(&mut out).unwrap();
        assert_eq!(out, frames(&[4, 5, 6]));
        assert_eq!(r.base_frame(), 4);
        assert_eq!(r.cur_read_frame(), 6);
    }

    #[test]
    fn underrun_is_not_enough_data() {
        let r = ring(8, 4);
        r.write_frames(&frames(&[1])).unwrap();
        let mut out = vec![0u8; 4];
        assert!(matches!(r.read_frames(&mut out), Err(HpaeError::NotEnoughData)));
        assert_eq!(r.cur_read_frame(), 0);
    }

    #[test]
    fn position_setters_validate() {
        let r = ring(4, 2);
        assert!(r.set_cur_write_frame(4).is_err());
        r.set_cur_write_frame(3).unwrap();
        assert!(r.set_cur_read_frame(4).is_err());
        r.set_cur_read_frame(2).unwrap();
        assert!(r.set_cur_read_frame(1).is_err());
        assert!(r.set_cur_write_frame(2).is_err());
        assert!(r.reset_cur_read_write_pos(10, 9).is_err());
        r.reset_cur_read_write_pos(100, 102).unwrap();
        assert_eq!(r.base_frame(), 100);
        assert_eq!(r.available_data_frames(), 2);
    }

    #[test]
    fn span_status_and_mute() {
        let r = ring(4, 2);
        r.write_frames(&frames(&[1, 2])).unwrap();
        assert_eq!(r.span_info(0).unwrap().status(), SpanStatus::WriteDone);
        assert_eq!(r.span_info(2).unwrap().status(), SpanStatus::Idle);

        r.span_info(0).unwrap().set_mute(true);
        let mut out = vec![0xffu8; 4];
        r.read_frames(&mut out).unwrap();
        assert_eq!(out, vec![0; 4]);
        assert_eq!(r.span_info(0).unwrap().status(), SpanStatus::ReadDone);
        assert_eq!(r.handle_info().0, 2);
    }

    #[test]
    fn status_roundtrip() {
        let r = ring(4, 2);
        assert_eq!(r.status(), RingStatus::Idle);
        r.set_status(RingStatus::Running);
        assert_eq!(r.status(), RingStatus::Running);
    }
}
