//! Format converter node: rate, channel count and frame length.
//!
//! The converter turns whatever geometry arrives at its input into the
//! target geometry of its [`NodeInfo`]:
//!
//! 1. **Channels** are folded first. Upmixing repeats input channels
//!    round-robin (`out[c] = in[c % in_ch]`); downmixing averages every input
//!    channel `j` with `j % out_ch == c`.
//! 2. **Rate** is converted by linear interpolation with an exact integer
//!    phase, so a 20ms input tick always yields a 20ms output tick with no
//!    drift (882 frames at 44.1 kHz become exactly 960 at 48 kHz).
//! 3. A **FIFO** decouples input and output quanta. Each tick emits one
//!    target frame if the FIFO holds one; an 11025 Hz session that delivers
//!    40ms every other tick is bridged this way.
//!
//! When the FIFO cannot fill a frame the output is zeroed and marked invalid.
//! The FIFO never holds more than two target frames plus the latest input
//! quantum; a producer that outpaces the tick (say 1024 frames every 20ms at
//! 48 kHz) loses its oldest samples instead of accumulating latency.

use std::collections::VecDeque;

use hpae_core::{AudioNode, BufferState, NodeInfo, NodeType, PcmBuffer};

/// Linear resampler over interleaved frames with an integer phase.
///
/// The phase `p` is kept in units of `1 / out_rate` input frames. For an
/// input block `x[0..n]` the interpolation runs over `[prev, x0, .., x(n-1)]`
/// with position `p / out_rate`; `p` advances by `in_rate` per output frame
/// and drops by `n × out_rate` per block.
#[derive(Clone, Debug)]
struct LinearResampler {
    in_rate: u64,
    out_rate: u64,
    channels: usize,
    phase: u64,
    prev: Vec<f32>,
}

impl LinearResampler {
    fn new(in_rate: u32, out_rate: u32, channels: usize) -> Self {
        Self {
            in_rate: u64::from(in_rate.max(1)),
            out_rate: u64::from(out_rate.max(1)),
            channels,
            phase: 0,
            prev: vec![0.0; channels],
        }
    }

    fn is_passthrough(&self) -> bool {
        self.in_rate == self.out_rate
    }

    /// Appends the resampled form of `input` (interleaved) to `out`.
    fn process(&mut self, input: &[f32], out: &mut VecDeque<f32>) {
        let ch = self.channels;
        if ch == 0 {
            return;
        }
        let n = (input.len() / ch) as u64;
        if n == 0 {
            return;
        }
        if self.is_passthrough() {
            out.extend(input.iter().copied());
            self.prev.copy_from_slice(&input[input.len() - ch..]);
            return;
        }

        let limit = n * self.out_rate;
        while self.phase < limit {
            let idx = (self.phase / self.out_rate) as usize;
            let frac = (self.phase % self.out_rate) as f32 / self.out_rate as f32;
            for c in 0..ch {
                let a = if idx == 0 { self.prev[c] } else { input[(idx - 1) * ch + c] };
                let b = input[idx * ch + c];
                out.push_back(a + (b - a) * frac);
            }
            self.phase += self.in_rate;
        }
        self.phase -= limit;
        self.prev.copy_from_slice(&input[input.len() - ch..]);
    }
}

/// Folds `input` (`in_ch` interleaved) into `output` (`out_ch` interleaved).
fn fold_channels(input: &[f32], in_ch: usize, output: &mut Vec<f32>, out_ch: usize) {
    output.clear();
    if in_ch == 0 || out_ch == 0 {
        return;
    }
    for frame in input.chunks_exact(in_ch) {
        if in_ch <= out_ch {
            output.extend((0..out_ch).map(|c| frame[c % in_ch]));
        } else {
            for c in 0..out_ch {
                let (sum, count) = frame
                    .iter()
                    .skip(c)
                    .step_by(out_ch)
                    .fold((0.0f32, 0u32), |(s, k), &v| (s + v, k + 1));
                output.push(sum / count.max(1) as f32);
            }
        }
    }
}

/// Converts any input geometry to the node's target geometry.
pub struct ConverterNode {
    info: NodeInfo,
    out: PcmBuffer,
    resampler: LinearResampler,
    source: (u32, u32),
    fifo: VecDeque<f32>,
    folded: Vec<f32>,
    last_state: BufferState,
    dropped_samples: u64,
}

impl ConverterNode {
    /// Converter from `source` geometry (channels, rate) to `target`.
    pub fn new(source: &NodeInfo, target: NodeInfo) -> Self {
        let out_ch = target.channels as usize;
        Self {
            out: PcmBuffer::new(target.buffer_info()),
            resampler: LinearResampler::new(source.sample_rate, target.sample_rate, out_ch),
            source: (source.channels, source.sample_rate),
            fifo: VecDeque::with_capacity(target.frame_samples() * 4),
            folded: Vec::new(),
            last_state: BufferState::default(),
            dropped_samples: 0,
            info: target,
        }
    }

    /// Samples currently buffered, in target channels.
    pub fn buffered_samples(&self) -> usize {
        self.fifo.len()
    }

    /// Samples discarded because the FIFO overran.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Drops the oldest samples beyond two target frames plus `pushed`.
    fn trim_fifo(&mut self, pushed: usize) {
        let cap = self.info.frame_samples() * 2 + pushed;
        let excess = self.fifo.len().saturating_sub(cap);
        if excess == 0 {
            return;
        }
        self.fifo.drain(..excess);
        if self.dropped_samples == 0 {
            tracing::warn!(
                node = %self.info.node_id,
                session_id = self.info.session_id,
                excess,
                "converter fifo overrun, dropping oldest samples"
            );
        }
        self.dropped_samples += excess as u64;
    }

    fn check_source(&mut self, input: &PcmBuffer) {
        let geometry = (input.channels(), input.sample_rate());
        if geometry == self.source {
            return;
        }
        tracing::info!(
            node = %self.info.node_id,
            from_channels = self.source.0,
            from_rate = self.source.1,
            to_channels = geometry.0,
            to_rate = geometry.1,
            "converter input changed"
        );
        self.source = geometry;
        self.resampler =
            LinearResampler::new(geometry.1, self.info.sample_rate, self.info.channels as usize);
        self.fifo.clear();
    }
}

impl AudioNode for ConverterNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::Converter
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        let Some(&input) = inputs.first() else {
            return false;
        };

        if input.frame_len() > 0 {
            self.check_source(input);
            let in_ch = input.channels() as usize;
            fold_channels(input.frame(), in_ch, &mut self.folded, self.info.channels as usize);
            let before = self.fifo.len();
            self.resampler.process(&self.folded, &mut self.fifo);
            self.trim_fifo(self.fifo.len() - before);
            self.last_state = input.state();
        }
        self.out.copy_tags_from(input);

        let needed = self.info.frame_samples();
        if needed > 0 && self.fifo.len() >= needed {
            for (dst, src) in self.out.frame_mut().iter_mut().zip(self.fifo.drain(..needed)) {
                *dst = src;
            }
            self.out.set_state(self.last_state);
        } else {
            self.out.frame_mut().fill(0.0);
            self.out.set_state(BufferState::INVALID | BufferState::SILENCE);
        }
        true
    }

    fn output(&self, port: u16) -> Option<&PcmBuffer> {
        (port == 0).then_some(&self.out)
    }

    fn reset(&mut self) -> bool {
        self.out.reset();
        self.fifo.clear();
        self.resampler =
            LinearResampler::new(self.source.1, self.info.sample_rate, self.info.channels as usize);
        self.last_state = BufferState::default();
        self.dropped_samples = 0;
        true
    }
}
