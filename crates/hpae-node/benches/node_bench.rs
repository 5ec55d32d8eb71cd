//! Criterion benchmarks for the per-tick cost of the hot nodes.
//!
//! - **Mixer**: summing 2..16 stereo sessions, with and without the limiter
//! - **Converter**: one 20ms tick from common client rates to 48 kHz stereo
//!
//! Run with: `cargo bench -p hpae-node`
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hpae_core::{AudioNode, BufferState, NodeInfo, PcmBuffer, frame_len_for_rate};
use hpae_node::{ConverterNode, MixerNode};

const INPUT_COUNTS: &[usize] = &[2, 4, 8, 16];

fn stereo_48k() -> NodeInfo {
    NodeInfo::default().with_geometry(2, 48000, 960)
}

fn filled(info: &NodeInfo, value: f32) -> PcmBuffer {
    let mut b = PcmBuffer::new(info.buffer_info());
    for (i, s) in b.data_mut().iter_mut().enumerate() {
        *s = value * ((i % 97) as f32 / 97.0 - 0.5);
    }
    b.set_state(BufferState::NONE);
    b
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

fn bench_mixer(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer");
    let info = stereo_48k();
    for &count in INPUT_COUNTS {
        let buffers: Vec<PcmBuffer> = (0..count).map(|i| filled(&info, 0.1 + i as f32 * 0.05)).collect();
        let inputs: Vec<&PcmBuffer> = buffers.iter().collect();

        let mut plain = MixerNode::new(info.clone());
        group.bench_with_input(BenchmarkId::new("sum", count), &count, |b, _| {
            b.iter(|| plain.do_process(black_box(&inputs)));
        });

        let mut limited = MixerNode::new(info.clone());
        if limited.setup_audio_limiter().is_ok() {
            group.bench_with_input(BenchmarkId::new("limited", count), &count, |b, _| {
                b.iter(|| limited.do_process(black_box(&inputs)));
            });
        }
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

fn bench_converter(c: &mut Criterion) {
    let mut group = c.benchmark_group("converter");
    for rate in [16000u32, 44100, 48000] {
        let source = NodeInfo::default().with_geometry(1, rate, frame_len_for_rate(rate));
        let input = filled(&source, 0.5);
        let mut node = ConverterNode::new(&source, stereo_48k());
        group.bench_with_input(BenchmarkId::new("to_48k_stereo", rate), &rate, |b, _| {
            b.iter(|| node.do_process(black_box(&[&input])));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mixer, bench_converter);
criterion_main!(benches);
