//! Closed set of engine nodes.
//!
//! Pipelines are generic over their node type. The managers use
//! [`HpaeNode`], one variant per concrete node, so a pipeline can hold a
//! mix of them without boxing and control code can reach a node's own API
//! through the typed accessors.

use hpae_core::{AudioNode, NodeInfo, NodeType, PcmBuffer};

use crate::{
    CaptureEffectNode, ConverterNode, GainNode, MixerNode, RemoteSinkOutputNode, RenderEffectNode,
    SinkInputNode, SinkOutputNode, SourceInputNode, SourceOutputNode,
};

/// Any engine node.
pub enum HpaeNode {
    /// See [`MixerNode`].
    Mixer(MixerNode),
    /// See [`GainNode`].
    Gain(GainNode),
    /// See [`ConverterNode`].
    Converter(ConverterNode),
    /// See [`RenderEffectNode`].
    RenderEffect(RenderEffectNode),
    /// See [`SinkInputNode`].
    SinkInput(SinkInputNode),
    /// See [`SinkOutputNode`].
    SinkOutput(SinkOutputNode),
    /// See [`RemoteSinkOutputNode`].
    RemoteSinkOutput(RemoteSinkOutputNode),
    /// See [`SourceInputNode`].
    SourceInput(SourceInputNode),
    /// See [`CaptureEffectNode`].
    CaptureEffect(CaptureEffectNode),
    /// See [`SourceOutputNode`].
    SourceOutput(SourceOutputNode),
}

macro_rules! dispatch {
    ($self:expr, $node:ident => $body:expr) => {
        match $self {
            HpaeNode::Mixer($node) => $body,
            HpaeNode::Gain($node) => $body,
            HpaeNode::Converter($node) => $body,
            HpaeNode::RenderEffect($node) => $body,
            HpaeNode::SinkInput($node) => $body,
            HpaeNode::SinkOutput($node) => $body,
            HpaeNode::RemoteSinkOutput($node) => $body,
            HpaeNode::SourceInput($node) => $body,
            HpaeNode::CaptureEffect($node) => $body,
            HpaeNode::SourceOutput($node) => $body,
        }
    };
}

macro_rules! accessors {
    ($($variant:ident => $ty:ty, $get:ident, $get_mut:ident;)*) => {
        impl HpaeNode {
            $(
                #[doc = concat!("The inner [`", stringify!($ty), "`], if this is one.")]
                pub fn $get(&self) -> Option<&$ty> {
                    match self {
                        Self::$variant(node) => Some(node),
                        _ => None,
                    }
                }

                #[doc = concat!("Mutable [`", stringify!($ty), "`], if this is one.")]
                pub fn $get_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        Self::$variant(node) => Some(node),
                        _ => None,
                    }
                }
            )*
        }

        $(
            impl From<$ty> for HpaeNode {
                fn from(node: $ty) -> Self {
                    Self::$variant(node)
                }
            }
        )*
    };
}

accessors! {
    Mixer => MixerNode, as_mixer, as_mixer_mut;
    Gain => GainNode, as_gain, as_gain_mut;
    Converter => ConverterNode, as_converter, as_converter_mut;
    RenderEffect => RenderEffectNode, as_render_effect, as_render_effect_mut;
    SinkInput => SinkInputNode, as_sink_input, as_sink_input_mut;
    SinkOutput => SinkOutputNode, as_sink_output, as_sink_output_mut;
    RemoteSinkOutput => RemoteSinkOutputNode, as_remote_sink_output, as_remote_sink_output_mut;
    SourceInput => SourceInputNode, as_source_input, as_source_input_mut;
    CaptureEffect => CaptureEffectNode, as_capture_effect, as_capture_effect_mut;
    SourceOutput => SourceOutputNode, as_source_output, as_source_output_mut;
}

impl AudioNode for HpaeNode {
    fn node_info(&self) -> &NodeInfo {
        dispatch!(self, n => n.node_info())
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        dispatch!(self, n => n.node_info_mut())
    }

    fn node_type(&self) -> NodeType {
        dispatch!(self, n => n.node_type())
    }

    fn output_port_count(&self) -> u16 {
        dispatch!(self, n => n.output_port_count())
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        dispatch!(self, n => n.do_process(inputs))
    }

    fn output(&self, port: u16) -> Option<&PcmBuffer> {
        dispatch!(self, n => n.output(port))
    }

    fn reset(&mut self) -> bool {
        dispatch!(self, n => n.reset())
    }

    fn connect(&mut self, pre: &NodeInfo) {
        dispatch!(self, n => n.connect(pre))
    }

    fn disconnect(&mut self, pre: &NodeInfo) {
        dispatch!(self, n => n.disconnect(pre))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_to_inner_node() {
        let mut node = HpaeNode::from(GainNode::new(NodeInfo::default().with_geometry(1, 48000, 4)));
        assert_eq!(node.node_type(), NodeType::Gain);
        assert_eq!(node.output_port_count(), 1);
        assert!(node.as_gain().is_some());
        assert!(node.as_mixer().is_none());
        node.as_gain_mut().unwrap().set_client_volume(0.5);
        assert_eq!(node.as_gain().unwrap().client_volume(), 0.5);
    }
}
