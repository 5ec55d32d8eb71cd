//! Float PCM frame container.
//!
//! A [`PcmBuffer`] holds one processing frame of interleaved `f32` samples
//! (`channels × frame_len`), or, when built with a history depth, a ring of
//! such frames used by sink inputs to replay recent audio.
//!
//! Buffers are allocated once by the owning node and reused every tick.
//! [`PcmBuffer::reset`] clears content in place; only
//! [`PcmBuffer::reconfig`] reallocates, and only when the geometry changed.

use core::ops::{AddAssign, BitAnd, BitAndAssign, BitOr, BitOrAssign};

use crate::stream::{SourceBufferType, SplitStreamType, StreamType, StreamUsage};

/// Buffer state bit set.
///
/// An empty set means "valid, not silent". Producers set bits; the mixer
/// AND-reduces them across inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferState(u32);

impl BufferState {
    /// Valid, audible content.
    pub const NONE: Self = Self(0);
    /// Content must not be consumed.
    pub const INVALID: Self = Self(1 << 0);
    /// Content is all zeros.
    pub const SILENCE: Self = Self(1 << 1);

    /// Returns `true` if all bits in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of two state sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the intersection of two state sets.
    #[inline]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns `self` without the bits in `other`.
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl Default for BufferState {
    fn default() -> Self {
        Self::INVALID.union(Self::SILENCE)
    }
}

impl BitOr for BufferState {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for BufferState {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl BitAnd for BufferState {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl BitAndAssign for BufferState {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = self.intersection(rhs);
    }
}

/// Geometry of a [`PcmBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PcmBufferInfo {
    /// Interleaved channel count.
    pub channels: u32,
    /// Frames (sample instants) per processing tick.
    pub frame_len: usize,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Channel layout mask.
    pub channel_layout: u64,
    /// Number of ticks held (1 for a plain buffer, history depth otherwise).
    pub frames: usize,
    /// Whether the buffer is a history ring.
    pub multi_frames: bool,
}

impl PcmBufferInfo {
    /// Geometry of a single-tick buffer.
    pub const fn new(channels: u32, frame_len: usize, rate: u32, channel_layout: u64) -> Self {
        Self {
            channels,
            frame_len,
            rate,
            channel_layout,
            frames: 1,
            multi_frames: false,
        }
    }

    /// Same geometry as a history ring of `frames` ticks.
    pub const fn with_history(mut self, frames: usize) -> Self {
        self.frames = if frames == 0 { 1 } else { frames };
        self.multi_frames = true;
        self
    }

    /// Samples in one tick (`channels × frame_len`).
    #[inline]
    pub const fn frame_samples(&self) -> usize {
        self.channels as usize * self.frame_len
    }

    /// Samples in the whole buffer.
    #[inline]
    pub const fn total_samples(&self) -> usize {
        self.frame_samples() * self.frames
    }

    /// Returns `true` if the single-tick geometry (ignoring history depth)
    /// matches `other`.
    #[inline]
    pub fn same_frame_geometry(&self, other: &Self) -> bool {
        self.channels == other.channels
            && self.frame_len == other.frame_len
            && self.rate == other.rate
            && self.channel_layout == other.channel_layout
    }
}

/// Read/write cursor over the history ring, in ticks.
#[derive(Clone, Copy, Debug, Default)]
struct HistoryCursor {
    read: usize,
    write: usize,
    /// Unread ticks.
    cur: usize,
    /// Slots holding any data (read or unread).
    stored: usize,
}

/// Interleaved `f32` sample buffer with stream metadata.
#[derive(Clone, Debug)]
pub struct PcmBuffer {
    info: PcmBufferInfo,
    data: Vec<f32>,
    state: BufferState,
    finished: bool,
    source_buffer_type: SourceBufferType,
    split_stream_type: SplitStreamType,
    stream_type: StreamType,
    stream_usage: StreamUsage,
    history: HistoryCursor,
}

impl PcmBuffer {
    /// Allocates a zeroed buffer in the `INVALID | SILENCE` state.
    pub fn new(info: PcmBufferInfo) -> Self {
        Self {
            info,
            data: vec![0.0; info.total_samples()],
            state: BufferState::default(),
            finished: false,
            source_buffer_type: SourceBufferType::default(),
            split_stream_type: SplitStreamType::default(),
            stream_type: StreamType::default(),
            stream_usage: StreamUsage::default(),
            history: HistoryCursor::default(),
        }
    }

    /// Zeroes the samples, marks the buffer invalid and silent and forgets
    /// history. Capacity is unchanged.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.state = BufferState::default();
        self.finished = false;
        self.history = HistoryCursor::default();
    }

    /// Switches to a new geometry.
    ///
    /// Returns `false` and does nothing when `info` equals the current
    /// geometry; otherwise reallocates zeroed storage and returns `true`.
    pub fn reconfig(&mut self, info: PcmBufferInfo) -> bool {
        if info == self.info {
            return false;
        }
        self.info = info;
        self.data = vec![0.0; info.total_samples()];
        self.state = BufferState::default();
        self.history = HistoryCursor::default();
        true
    }

    /// Geometry.
    #[inline]
    pub fn info(&self) -> &PcmBufferInfo {
        &self.info
    }

    /// Channel count.
    #[inline]
    pub fn channels(&self) -> u32 {
        self.info.channels
    }

    /// Frames per tick.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.info.frame_len
    }

    /// Sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.info.rate
    }

    /// Channel layout mask.
    #[inline]
    pub fn channel_layout(&self) -> u64 {
        self.info.channel_layout
    }

    /// All samples. For a history ring this spans every slot.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// All samples, mutable.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Samples of the first (or only) tick.
    #[inline]
    pub fn frame(&self) -> &[f32] {
        &self.data[..self.info.frame_samples()]
    }

    /// Samples of the first (or only) tick, mutable.
    #[inline]
    pub fn frame_mut(&mut self) -> &mut [f32] {
        let n = self.info.frame_samples();
        &mut self.data[..n]
    }

    /// Current state bits.
    #[inline]
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Replaces the state bits.
    #[inline]
    pub fn set_state(&mut self, state: BufferState) {
        self.state = state;
    }

    /// `true` unless the `INVALID` bit is set.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.state.contains(BufferState::INVALID)
    }

    /// `true` if the `SILENCE` bit is set.
    #[inline]
    pub fn is_silence(&self) -> bool {
        self.state.contains(BufferState::SILENCE)
    }

    /// Sets or clears the `INVALID` bit.
    pub fn set_valid(&mut self, valid: bool) {
        self.state = if valid {
            self.state.difference(BufferState::INVALID)
        } else {
            self.state.union(BufferState::INVALID)
        };
    }

    /// Sets or clears the `SILENCE` bit.
    pub fn set_silence(&mut self, silence: bool) {
        self.state = if silence {
            self.state.union(BufferState::SILENCE)
        } else {
            self.state.difference(BufferState::SILENCE)
        };
    }

    /// Sets the `SILENCE` bit from the content of the first tick.
    pub fn update_silence(&mut self) {
        let silent = self.frame().iter().all(|&s| s == 0.0);
        self.set_silence(silent);
    }

    /// End-of-stream marker.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Sets the end-of-stream marker.
    #[inline]
    pub fn set_finished(&mut self, finished: bool) {
        self.finished = finished;
    }

    /// Capture sub-buffer tag.
    #[inline]
    pub fn source_buffer_type(&self) -> SourceBufferType {
        self.source_buffer_type
    }

    /// Sets the capture sub-buffer tag.
    #[inline]
    pub fn set_source_buffer_type(&mut self, ty: SourceBufferType) {
        self.source_buffer_type = ty;
    }

    /// Split-stream tag.
    #[inline]
    pub fn split_stream_type(&self) -> SplitStreamType {
        self.split_stream_type
    }

    /// Sets the split-stream tag.
    #[inline]
    pub fn set_split_stream_type(&mut self, ty: SplitStreamType) {
        self.split_stream_type = ty;
    }

    /// Stream type tag.
    #[inline]
    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    /// Sets the stream type tag.
    #[inline]
    pub fn set_stream_type(&mut self, ty: StreamType) {
        self.stream_type = ty;
    }

    /// Stream usage tag.
    #[inline]
    pub fn stream_usage(&self) -> StreamUsage {
        self.stream_usage
    }

    /// Sets the stream usage tag.
    #[inline]
    pub fn set_stream_usage(&mut self, usage: StreamUsage) {
        self.stream_usage = usage;
    }

    /// Copies the overlapping samples, the state and the tags of `other`.
    pub fn copy_from(&mut self, other: &PcmBuffer) {
        let n = self.data.len().min(other.data.len());
        self.data[..n].copy_from_slice(&other.data[..n]);
        self.copy_tags_from(other);
        self.state = other.state;
        self.finished = other.finished;
    }

    /// Copies only the stream tags of `other`.
    pub fn copy_tags_from(&mut self, other: &PcmBuffer) {
        self.source_buffer_type = other.source_buffer_type;
        self.split_stream_type = other.split_stream_type;
        self.stream_type = other.stream_type;
        self.stream_usage = other.stream_usage;
    }

    /// Scales the first tick by `gain`.
    pub fn scale(&mut self, gain: f32) {
        for s in self.frame_mut() {
            *s *= gain;
        }
    }

    // ------------------------------------------------------------------
    // History ring
    // ------------------------------------------------------------------

    /// Unread ticks in the history ring.
    #[inline]
    pub fn cur_frames(&self) -> usize {
        self.history.cur
    }

    /// History ring depth in ticks.
    #[inline]
    pub fn frames(&self) -> usize {
        self.info.frames
    }

    fn slot(&self, index: usize) -> core::ops::Range<usize> {
        let n = self.info.frame_samples();
        index * n..(index + 1) * n
    }

    /// Archives one already-played tick from `frame` in the history ring.
    ///
    /// Archived ticks are not unread; only [`rewind_buffer`](Self::rewind_buffer)
    /// exposes them again. When the ring is full the oldest tick is
    /// overwritten, dropping it from the unread set if it was there.
    pub fn store_frame_data(&mut self, frame: &PcmBuffer) {
        let range = self.slot(self.history.write);
        let n = range.len().min(frame.frame().len());
        self.data[range.start..range.start + n].copy_from_slice(&frame.frame()[..n]);

        let depth = self.info.frames;
        self.history.write = (self.history.write + 1) % depth;
        if self.history.cur == 0 {
            self.history.read = self.history.write;
        } else if self.history.cur == depth {
            self.history.read = (self.history.read + 1) % depth;
            self.history.cur -= 1;
        }
        self.history.stored = (self.history.stored + 1).min(depth);
    }

    /// Pops the oldest unread tick into `out`.
    ///
    /// Returns `false` and leaves `out` untouched when nothing is unread.
    pub fn get_frame_data(&mut self, out: &mut PcmBuffer) -> bool {
        if self.history.cur == 0 {
            return false;
        }
        let range = self.slot(self.history.read);
        let dst = out.frame_mut();
        let n = range.len().min(dst.len());
        dst[..n].copy_from_slice(&self.data[range.start..range.start + n]);
        out.set_valid(true);
        out.update_silence();

        self.history.read = (self.history.read + 1) % self.info.frames;
        self.history.cur -= 1;
        true
    }

    /// Moves the read cursor back so the most recently archived ticks are
    /// read again.
    ///
    /// Rewinds at most the archived ticks that are not already unread;
    /// returns how many ticks were actually rewound.
    pub fn rewind_buffer(&mut self, frames: usize) -> usize {
        let depth = self.info.frames;
        let n = frames.min(self.history.stored - self.history.cur);
        self.history.read = (self.history.read + depth - n % depth) % depth;
        self.history.cur += n;
        n
    }
}

impl AddAssign<&PcmBuffer> for PcmBuffer {
    /// Sample-wise accumulation over the overlapping range.
    fn add_assign(&mut self, rhs: &PcmBuffer) {
        for (d, s) in self.data.iter_mut().zip(rhs.data.iter()) {
            *d += s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> PcmBufferInfo {
        PcmBufferInfo::new(2, 4, 48000, 3)
    }

    fn filled(value: f32) -> PcmBuffer {
        let mut b = PcmBuffer::new(stereo());
        b.frame_mut().fill(value);
        b.set_state(BufferState::NONE);
        b
    }

    #[test]
    fn new_buffer_is_invalid_and_silent() {
        let b = PcmBuffer::new(stereo());
        assert!(!b.is_valid());
        assert!(b.is_silence());
        assert_eq!(b.data().len(), 8);
    }

    #[test]
    fn reset_keeps_allocation() {
        let mut b = filled(0.5);
        let ptr = b.data().as_ptr();
        b.reset();
        assert_eq!(ptr, b.data().as_ptr());
        assert!(b.data().iter().all(|&s| s == 0.0));
        assert!(!b.is_valid());
    }

    #[test]
    fn reconfig_only_on_change() {
        let mut b = PcmBuffer::new(stereo());
        assert!(!b.reconfig(stereo()));
        assert!(b.reconfig(PcmBufferInfo::new(6, 4, 48000, 0x3F)));
        assert_eq!(b.data().len(), 24);
    }

    #[test]
    fn add_assign_sums() {
        let mut a = filled(0.25);
        let b = filled(0.5);
        a += &b;
        assert!(a.data().iter().all(|&s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn add_assign_mismatched_is_bounded() {
        let mut a = PcmBuffer::new(PcmBufferInfo::new(1, 4, 48000, 4));
        let b = filled(1.0);
        a += &b;
        assert_eq!(a.data(), &[1.0; 4]);
    }

    #[test]
    fn state_flags() {
        let mut b = PcmBuffer::new(stereo());
        b.set_valid(true);
        assert!(b.is_valid());
        assert!(b.is_silence());
        b.set_silence(false);
        assert_eq!(b.state(), BufferState::NONE);

        let s = BufferState::INVALID | BufferState::SILENCE;
        assert_eq!(s & BufferState::SILENCE, BufferState::SILENCE);
    }

    #[test]
    fn copy_from_takes_tags() {
        let mut src = filled(0.1);
        src.set_split_stream_type(SplitStreamType::Navigation);
        src.set_finished(true);
        let mut dst = PcmBuffer::new(stereo());
        dst.copy_from(&src);
        assert_eq!(dst.split_stream_type(), SplitStreamType::Navigation);
        assert!(dst.is_finished());
        assert!(dst.is_valid());
    }

    #[test]
    fn history_store_archives_without_unread() {
        let mut history = PcmBuffer::new(stereo().with_history(3));
        history.store_frame_data(&filled(0.1));
        history.store_frame_data(&filled(0.2));
        assert_eq!(history.cur_frames(), 0);

        let mut out = PcmBuffer::new(stereo());
        assert!(!history.get_frame_data(&mut out));
        assert!(!out.is_valid());
    }

    #[test]
    fn rewind_replays_most_recent() {
        let mut history = PcmBuffer::new(stereo().with_history(3));
        for v in [0.1, 0.2, 0.3] {
            history.store_frame_data(&filled(v));
        }
        assert_eq!(history.rewind_buffer(2), 2);
        assert_eq!(history.cur_frames(), 2);

        let mut out = PcmBuffer::new(stereo());
        assert!(history.get_frame_data(&mut out));
        assert!((out.data()[0] - 0.2).abs() < 1e-6);
        assert!(out.is_valid());
        assert!(history.get_frame_data(&mut out));
        assert!((out.data()[0] - 0.3).abs() < 1e-6);
        assert_eq!(history.cur_frames(), 0);
    }

    #[test]
    fn history_overwrites_oldest_when_full() {
        let mut history = PcmBuffer::new(stereo().with_history(2));
        for v in [0.1, 0.2, 0.3] {
            history.store_frame_data(&filled(v));
        }
        assert_eq!(history.rewind_buffer(5), 2);
        let mut out = PcmBuffer::new(stereo());
        history.get_frame_data(&mut out);
        assert!((out.data()[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn rewind_limited_to_stored_frames() {
        let mut history = PcmBuffer::new(stereo().with_history(4));
        let mut out = PcmBuffer::new(stereo());
        for v in [0.1, 0.2] {
            history.store_frame_data(&filled(v));
        }
        assert_eq!(history.rewind_buffer(10), 2);
        assert_eq!(history.rewind_buffer(1), 0);
        history.get_frame_data(&mut out);
        assert!((out.data()[0] - 0.1).abs() < 1e-6);
        assert_eq!(history.rewind_buffer(3), 1);
        assert_eq!(history.cur_frames(), 2);
    }
}
