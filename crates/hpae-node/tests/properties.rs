//! Property-based tests for the converter and mixer nodes.
//!
//! The converter must emit exactly one target frame per tick for any source
//! geometry while keeping its FIFO bounded, and the mixer's output state must
//! be the AND of its input states for any mix of valid, invalid and silent
//! inputs.

use hpae_core::{AudioNode, BufferState, NodeInfo, PcmBuffer, frame_len_for_rate};
use hpae_node::{ConverterNode, MixerNode};
use proptest::prelude::*;

fn target(channels: u32) -> NodeInfo {
    NodeInfo::default().with_geometry(channels, 48000, 960)
}

fn frame(info: &NodeInfo, fill: f32, state: BufferState) -> PcmBuffer {
    let mut buffer = PcmBuffer::new(info.buffer_info());
    buffer.data_mut().fill(fill);
    buffer.set_state(state);
    buffer
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Any standard rate and channel count converts to whole target frames.
    #[test]
    fn converter_emits_target_frames(
        in_channels in 1u32..=8,
        out_channels in 1u32..=8,
        rate in prop::sample::select(vec![8000u32, 16000, 22050, 32000, 44100, 48000, 96000]),
        ticks in 1usize..40,
    ) {
        let source = NodeInfo::default().with_geometry(in_channels, rate, frame_len_for_rate(rate));
        let mut node = ConverterNode::new(&source, target(out_channels));
        let input = frame(&source, 0.5, BufferState::NONE);
        let samples = 960 * out_channels as usize;

        for _ in 0..ticks {
            prop_assert!(node.do_process(&[&input]));
            let out = node.output(0).unwrap();
            prop_assert_eq!(out.frame_len(), 960);
            prop_assert_eq!(out.frame().len(), samples);
            prop_assert!(out.is_valid());
        }
        prop_assert!(node.buffered_samples() < samples);
        prop_assert_eq!(node.dropped_samples(), 0);
    }

    /// Input quanta of any length never grow the FIFO past two target frames
    /// plus one quantum.
    #[test]
    fn converter_fifo_is_bounded(
        in_frames in 1usize..=4096,
        out_channels in 1u32..=4,
        ticks in 1usize..200,
    ) {
        let source = NodeInfo::default().with_geometry(out_channels, 48000, in_frames);
        let mut node = ConverterNode::new(&source, target(out_channels));
        let input = frame(&source, 0.1, BufferState::NONE);
        let bound = (960 * 2 + in_frames) * out_channels as usize;

        for _ in 0..ticks {
            node.do_process(&[&input]);
            prop_assert!(node.buffered_samples() <= bound);
            prop_assert_eq!(node.buffered_samples() % out_channels as usize, 0);
        }
    }

    /// A mix is valid if any input is, and silent only if every input is.
    #[test]
    fn mixer_ands_input_states(states in prop::collection::vec((any::<bool>(), any::<bool>()), 1..8)) {
        let info = target(2);
        let inputs: Vec<PcmBuffer> = states
            .iter()
            .map(|&(valid, silent)| {
                let mut state = BufferState::NONE;
                if !valid {
                    state |= BufferState::INVALID;
                }
                if silent {
                    state |= BufferState::SILENCE;
                }
                frame(&info, if silent { 0.0 } else { 0.1 }, state)
            })
            .collect();
        let refs: Vec<&PcmBuffer> = inputs.iter().collect();

        let mut mixer = MixerNode::new(info);
        let out = mixer.signal_process(&refs).unwrap();
        prop_assert_eq!(out.is_valid(), states.iter().any(|&(valid, _)| valid));
        prop_assert_eq!(out.is_silence(), states.iter().all(|&(_, silent)| silent));
    }
}
