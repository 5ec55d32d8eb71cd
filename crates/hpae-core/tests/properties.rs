//! Property-based tests for hpae-core buffers and format conversion.
//!
//! Covers buffer reset, accumulation and history bookkeeping, plus the
//! float/wire conversion bounds, using proptest for randomized geometry and
//! sample data.

use hpae_core::{BufferState, PcmBuffer, PcmBufferInfo, SampleFormat, convert_from_float, convert_to_float};
use proptest::prelude::*;

const FORMATS: [SampleFormat; 5] = [
    SampleFormat::U8,
    SampleFormat::S16Le,
    SampleFormat::S24Le,
    SampleFormat::S32Le,
    SampleFormat::F32Le,
];

fn geometry() -> impl Strategy<Value = (u32, usize, u32)> {
    (
        1u32..=8,
        1usize..=1024,
        prop::sample::select(vec![8000u32, 11025, 16000, 44100, 48000, 96000]),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Reset on any geometry yields zeroed, invalid, silent content without
    /// moving the allocation.
    #[test]
    fn reset_zeroes_in_place((channels, frame_len, rate) in geometry(), fill in -1.0f32..=1.0f32) {
        let mut buffer = PcmBuffer::new(PcmBufferInfo::new(channels, frame_len, rate, 0));
        buffer.data_mut().fill(fill);
        buffer.set_state(BufferState::NONE);
        let ptr = buffer.data().as_ptr();

        buffer.reset();

        prop_assert_eq!(ptr, buffer.data().as_ptr());
        prop_assert_eq!(buffer.data().len(), channels as usize * frame_len);
        prop_assert!(buffer.data().iter().all(|&s| s == 0.0));
        prop_assert!(!buffer.is_valid());
        prop_assert!(buffer.is_silence());
    }

    /// Accumulating two same-geometry buffers gives the elementwise sum.
    #[test]
    fn accumulate_is_elementwise_sum(
        a in prop::collection::vec(-1.0f32..=1.0f32, 64),
        b in prop::collection::vec(-1.0f32..=1.0f32, 64),
    ) {
        let info = PcmBufferInfo::new(2, 32, 48000, 3);
        let mut x = PcmBuffer::new(info);
        let mut y = PcmBuffer::new(info);
        x.data_mut().copy_from_slice(&a);
        y.data_mut().copy_from_slice(&b);

        x += &y;

        for i in 0..64 {
            prop_assert!((x.data()[i] - (a[i] + b[i])).abs() < 1e-6);
        }
    }

    /// Accumulating mismatched geometry never touches samples past the
    /// shorter buffer.
    #[test]
    fn accumulate_mismatch_is_bounded(short in 1usize..64, long in 64usize..256) {
        let mut dst = PcmBuffer::new(PcmBufferInfo::new(1, long, 48000, 4));
        let mut src = PcmBuffer::new(PcmBufferInfo::new(1, short, 48000, 4));
        src.data_mut().fill(1.0);

        dst += &src;

        prop_assert!(dst.data()[..short].iter().all(|&s| s == 1.0));
        prop_assert!(dst.data()[short..].iter().all(|&s| s == 0.0));
    }

    /// Archiving never creates unread ticks, rewinding never exposes more
    /// ticks than the ring holds, and every rewound tick can be read back.
    #[test]
    fn history_counts_stay_bounded(depth in 1usize..8, stores in 0usize..20, rewind in 0usize..20, reads in 0usize..20) {
        let info = PcmBufferInfo::new(1, 4, 48000, 4);
        let mut history = PcmBuffer::new(info.with_history(depth));
        let frame = PcmBuffer::new(info);
        let mut out = PcmBuffer::new(info);

        for _ in 0..stores {
            history.store_frame_data(&frame);
        }
        prop_assert_eq!(history.cur_frames(), 0);

        let rewound = history.rewind_buffer(rewind);
        prop_assert_eq!(rewound, rewind.min(stores.min(depth)));
        prop_assert!(history.cur_frames() <= depth);

        let mut popped = 0;
        for _ in 0..reads {
            if history.get_frame_data(&mut out) {
                popped += 1;
            }
        }
        prop_assert_eq!(popped, reads.min(rewound));
    }

    /// Float → wire → float stays within one quantization step for every
    /// format, for in-range samples.
    #[test]
    fn conversion_error_within_one_step(samples in prop::collection::vec(-1.0f32..0.999f32, 1..256), idx in 0usize..5) {
        let format = FORMATS[idx];
        let mut wire = vec![0u8; samples.len() * format.sample_size()];
        let mut back = vec![0.0f32; samples.len()];

        prop_assert_eq!(convert_from_float(format, &samples, &mut wire), samples.len());
        prop_assert_eq!(convert_to_float(format, &wire, &mut back), samples.len());

        let step = match format {
            SampleFormat::U8 => 1.0 / 128.0,
            SampleFormat::S16Le => 1.0 / 32768.0,
            _ => 1e-6,
        };
        for (a, b) in samples.iter().zip(&back) {
            prop_assert!((a - b).abs() <= step, "{a} vs {b} ({format})");
        }
    }

    /// Out-of-range floats saturate instead of wrapping.
    #[test]
    fn conversion_saturates(value in prop_oneof![1.0f32..100.0f32, -100.0f32..-1.0f32]) {
        let mut wire = [0u8; 2];
        convert_from_float(SampleFormat::S16Le, &[value], &mut wire);
        let v = i16::from_le_bytes(wire);
        if value > 0.0 {
            prop_assert_eq!(v, i16::MAX);
        } else {
            prop_assert_eq!(v, i16::MIN);
        }
    }
}
