//! Capture effect node: runs an enhancement chain over the captured mic.
//!
//! The node takes up to three inputs told apart by their
//! [`SourceBufferType`] tag, not by edge order. Each tick the mic, echo
//! reference and mic reference are converted to S16LE, handed to the
//! [`EnhanceChain`] together and the processed mic frame is converted back.
//! Algorithms pick their own geometry per sub-buffer; upstream converters
//! are built from [`CaptureEffectNode::capturer_effect_config`].

use std::collections::HashMap;
use std::sync::Arc;

use hpae_core::{
    AudioNode, HpaeError, NodeInfo, NodeType, PcmBuffer, Result, SampleFormat, SourceBufferType,
    convert_from_float, convert_to_float, frame_len_for_rate,
};
use hpae_effects::{AudioBufferConfig, EnhanceChain, EnhanceChainFactory, EnhanceDeviceAttr, EnhanceInput};

const CHAIN_FORMAT: SampleFormat = SampleFormat::S16Le;

/// Enhancement stage of a capture session.
pub struct CaptureEffectNode {
    info: NodeInfo,
    factory: Arc<dyn EnhanceChainFactory>,
    chain: Option<Box<dyn EnhanceChain>>,
    scene_key: u64,
    configs: HashMap<SourceBufferType, NodeInfo>,
    mic_bytes: Vec<u8>,
    ec_bytes: Vec<u8>,
    mic_ref_bytes: Vec<u8>,
    out_bytes: Vec<u8>,
    out: PcmBuffer,
}

impl CaptureEffectNode {
    /// Node without a chain; it passes the mic through until
    /// [`capture_effect_create`](Self::capture_effect_create) succeeds.
    pub fn new(info: NodeInfo, factory: Arc<dyn EnhanceChainFactory>) -> Self {
        Self {
            out: PcmBuffer::new(info.buffer_info()),
            info,
            factory,
            chain: None,
            scene_key: 0,
            configs: HashMap::new(),
            mic_bytes: Vec::new(),
            ec_bytes: Vec::new(),
            mic_ref_bytes: Vec::new(),
            out_bytes: Vec::new(),
        }
    }

    /// Builds the chain for `scene_key` and records the geometry it wants
    /// for each sub-buffer.
    pub fn capture_effect_create(&mut self, scene_key: u64, attr: &EnhanceDeviceAttr) -> Result<()> {
        let chain = self.factory.create(scene_key, attr).inspect_err(|e| {
            tracing::error!(scene_key, error = %e, "create enhance chain failed");
        })?;
        let algo = chain.algo_config();
        if algo.mic.sample_rate == 0 {
            tracing::error!(scene_key, "enhance chain reports no mic rate");
            return Err(HpaeError::invalid_param("enhance chain mic rate is 0"));
        }

        self.configs.clear();
        for (ty, cfg) in [
            (SourceBufferType::Mic, algo.mic),
            (SourceBufferType::Ec, algo.ec),
            (SourceBufferType::MicRef, algo.mic_ref),
        ] {
            self.configs.insert(ty, self.config_info(cfg, ty));
        }
        let chain_bytes = |cfg: AudioBufferConfig| {
            frame_len_for_rate(cfg.sample_rate) * cfg.channels as usize * CHAIN_FORMAT.sample_size()
        };
        self.mic_bytes = vec![0; chain_bytes(algo.mic)];
        self.ec_bytes = vec![0; chain_bytes(algo.ec)];
        self.mic_ref_bytes = vec![0; chain_bytes(algo.mic_ref)];
        self.out_bytes = vec![0; self.mic_bytes.len()];
        tracing::info!(
            scene_key,
            mic = self.mic_bytes.len(),
            ec = self.ec_bytes.len(),
            mic_ref = self.mic_ref_bytes.len(),
            "enhance chain created"
        );

        let mic = &self.configs[&SourceBufferType::Mic];
        self.out.reconfig(mic.buffer_info());
        self.scene_key = scene_key;
        self.chain = Some(chain);
        Ok(())
    }

    fn config_info(&self, cfg: AudioBufferConfig, ty: SourceBufferType) -> NodeInfo {
        let mut info = self
            .info
            .clone()
            .with_geometry(cfg.channels, cfg.sample_rate, frame_len_for_rate(cfg.sample_rate));
        info.format = cfg.format;
        info.source_buffer_type = ty;
        info
    }

    /// Geometry the chain wants for `ty`; `None` before the chain exists.
    pub fn capturer_effect_config(&self, ty: SourceBufferType) -> Option<NodeInfo> {
        self.configs.get(&ty).cloned()
    }

    /// Drops the chain. Returns `NotInited` when there is none.
    pub fn capture_effect_release(&mut self) -> Result<()> {
        if self.chain.take().is_none() {
            return Err(HpaeError::NotInited);
        }
        tracing::info!(scene_key = self.scene_key, "enhance chain released");
        self.configs.clear();
        Ok(())
    }

    /// Scene key of the current chain.
    pub fn scene_key(&self) -> u64 {
        self.scene_key
    }

    /// Whether a chain is installed.
    pub fn has_chain(&self) -> bool {
        self.chain.is_some()
    }

    fn pass_through(&mut self, mic: &PcmBuffer) {
        if !self.out.info().same_frame_geometry(mic.info()) {
            self.out.reconfig(*mic.info());
        }
        self.out.copy_from(mic);
    }
}

impl AudioNode for CaptureEffectNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::CaptureEffect
    }

    fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
        if inputs.is_empty() {
            tracing::warn!(session_id = self.info.session_id, "capture effect has no input");
            return false;
        }
        let Some(&mic) = inputs.iter().find(|b| b.source_buffer_type() == SourceBufferType::Mic) else {
            return false;
        };
        let Some(chain) = self.chain.as_mut() else {
            self.pass_through(mic);
            return true;
        };

        for &input in inputs {
            let bytes = match input.source_buffer_type() {
                SourceBufferType::Mic => &mut self.mic_bytes,
                SourceBufferType::Ec => &mut self.ec_bytes,
                SourceBufferType::MicRef => &mut self.mic_ref_bytes,
            };
            let n = (bytes.len() / CHAIN_FORMAT.sample_size()).min(input.frame().len());
            bytes.fill(0);
            convert_from_float(CHAIN_FORMAT, &input.frame()[..n], bytes);
        }

        let input = EnhanceInput {
            mic: &self.mic_bytes,
            ec: &self.ec_bytes,
            mic_ref: &self.mic_ref_bytes,
        };
        if let Err(e) = chain.apply(input, &mut self.out_bytes) {
            tracing::error!(scene_key = self.scene_key, error = %e, "enhance apply failed");
            self.pass_through(mic);
            return true;
        }

        let n = convert_to_float(CHAIN_FORMAT, &self.out_bytes, self.out.frame_mut());
        self.out.frame_mut()[n..].fill(0.0);
        self.out.copy_tags_from(mic);
        self.out.set_state(mic.state());
        self.out.update_silence();
        true
    }

    fn output(&self, port: u16) -> Option<&PcmBuffer> {
        (port == 0).then_some(&self.out)
    }

    fn reset(&mut self) -> bool {
        self.out.reset();
        true
    }
}
