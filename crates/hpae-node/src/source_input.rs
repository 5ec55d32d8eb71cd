//! Source input node: the entry stage of a capture pipeline.
//!
//! One output port per [`SourceBufferType`]: the mic frame on port 0, the
//! echo reference on port 1 and the mic reference on port 2. The reference
//! ports exist only when the source is configured with them. All buffers of
//! one tick come from a single [`CaptureSource::capture_frame_with_ec`]
//! call, so they stay aligned.

use std::sync::Arc;

use hpae_core::{
    AudioNode, BufferState, EcType, HpaeError, NodeInfo, NodeType, PcmBuffer, Result,
    SampleFormat, SourceBufferType, SourceInfo, StreamManagerState, convert_to_float,
    frame_len_for_rate,
};
use hpae_io::{CaptureFrames, CaptureSource, DeviceContext};

/// Captured bytes and float output of one buffer type.
struct CapturePort {
    info: NodeInfo,
    bytes: Vec<u8>,
    out: PcmBuffer,
}

impl CapturePort {
    fn new(mut info: NodeInfo, ty: SourceBufferType) -> Self {
        info.source_buffer_type = ty;
        let mut out = PcmBuffer::new(info.buffer_info());
        out.set_source_buffer_type(ty);
        Self {
            bytes: vec![0; info.frame_bytes()],
            out,
            info,
        }
    }

    fn reference(base: &NodeInfo, channels: u32, rate: u32, format: SampleFormat, ty: SourceBufferType) -> Self {
        let mut info = base.clone().with_geometry(channels, rate, frame_len_for_rate(rate));
        info.format = format;
        Self::new(info, ty)
    }

    fn convert(&mut self) {
        let n = convert_to_float(self.info.format, &self.bytes, self.out.frame_mut());
        self.out.frame_mut()[n..].fill(0.0);
        self.out.set_state(BufferState::NONE);
        self.out.update_silence();
    }

    fn invalidate(&mut self) {
        self.out.frame_mut().fill(0.0);
        self.out.set_state(BufferState::INVALID | BufferState::SILENCE);
    }
}

/// Pulls frames from a capture device into the pipeline.
pub struct SourceInputNode {
    info: NodeInfo,
    context: Arc<DeviceContext>,
    source: Option<Arc<dyn CaptureSource>>,
    capture_id: Option<u32>,
    attr: SourceInfo,
    state: StreamManagerState,
    mic: CapturePort,
    ec: Option<CapturePort>,
    mic_ref: Option<CapturePort>,
    capture_failures: u64,
}

impl SourceInputNode {
    /// Source input for `attr`, with reference ports as configured there.
    pub fn new(attr: &SourceInfo, context: Arc<DeviceContext>) -> Self {
        let info = NodeInfo::from_source(attr);
        let ec = (attr.ec_type != EcType::None).then(|| {
            CapturePort::reference(&info, attr.ec_channels, attr.ec_sample_rate, attr.ec_format, SourceBufferType::Ec)
        });
        let mic_ref = attr.mic_ref_enabled.then(|| {
            CapturePort::reference(
                &info,
                attr.mic_ref_channels,
                attr.mic_ref_sample_rate,
                attr.mic_ref_format,
                SourceBufferType::MicRef,
            )
        });
        Self {
            mic: CapturePort::new(info.clone(), SourceBufferType::Mic),
            ec,
            mic_ref,
            context,
            source: None,
            capture_id: None,
            attr: attr.clone(),
            state: StreamManagerState::New,
            capture_failures: 0,
            info,
        }
    }

    /// Acquires the capture device for `(class, net_id)` from the context.
    pub fn get_capture_source_instance(&mut self, class: &str, net_id: &str) -> Result<()> {
        let id = self.context.get_capture_id(class, net_id);
        let Some(source) = self.context.capture_source(id) else {
            tracing::error!(class, net_id, id, "get capture source failed");
            self.context.release_id(id);
            return Err(HpaeError::device(format!("no capture source for class {class}")));
        };
        self.source = Some(source);
        self.capture_id = Some(id);
        Ok(())
    }

    fn source(&self) -> Result<Arc<dyn CaptureSource>> {
        self.source.clone().ok_or(HpaeError::NotInited)
    }

    fn set_state(&mut self, state: StreamManagerState) {
        tracing::info!(source = %self.info.node_name, from = ?self.state, to = ?state, "source state change");
        self.state = state;
    }

    /// Initializes the device with the attributes given at construction.
    pub fn capture_source_init(&mut self) -> Result<()> {
        let source = self.source()?;
        if source.is_inited() {
            tracing::warn!(source = %self.info.node_name, "capture source already inited");
        } else {
            source.init(&self.attr)?;
        }
        self.set_state(StreamManagerState::Idle);
        Ok(())
    }

    /// Deinitializes and releases the device.
    pub fn capture_source_deinit(&mut self) -> Result<()> {
        let source = self.source()?;
        self.set_state(StreamManagerState::Released);
        source.deinit();
        self.source = None;
        if let Some(id) = self.capture_id.take() {
            self.context.release_id(id);
        }
        Ok(())
    }

    /// Starts capturing.
    pub fn capture_source_start(&mut self) -> Result<()> {
        self.source()?.start()?;
        self.set_state(StreamManagerState::Running);
        Ok(())
    }

    /// Stops capturing; the state is suspended before the device is asked.
    pub fn capture_source_stop(&mut self) -> Result<()> {
        let source = self.source()?;
        self.set_state(StreamManagerState::Suspended);
        source.stop()
    }

    /// Pauses capturing.
    pub fn capture_source_pause(&mut self) -> Result<()> {
        let source = self.source()?;
        if let Err(e) = source.pause() {
            tracing::warn!(source = %self.info.node_name, error = %e, "capture source pause failed");
        }
        self.set_state(StreamManagerState::Suspended);
        Ok(())
    }

    /// Resumes capturing.
    pub fn capture_source_resume(&mut self) -> Result<()> {
        self.source()?.resume()?;
        self.set_state(StreamManagerState::Running);
        Ok(())
    }

    /// Drops buffered device data.
    pub fn capture_source_flush(&self) -> Result<()> {
        self.source()?.flush()
    }

    /// Resets the device position.
    pub fn capture_source_reset(&self) -> Result<()> {
        self.source()?.reset()
    }

    /// Mutes the device.
    pub fn set_mute(&self, mute: bool) -> Result<()> {
        self.source()?.set_mute(mute)
    }

    /// Forwards capturing app uids to the device.
    pub fn update_apps_uid(&self, uids: &[i32]) -> Result<()> {
        self.source()?.update_apps_uid(uids)
    }

    /// Device lifecycle state.
    pub fn source_state(&self) -> StreamManagerState {
        self.state
    }

    /// Device attributes.
    pub fn attr(&self) -> &SourceInfo {
        &self.attr
    }

    /// Geometry of the port carrying `ty`, when configured.
    pub fn port_info(&self, ty: SourceBufferType) -> Option<&NodeInfo> {
        self.port(ty).map(|p| &p.info)
    }

    /// Failed captures since creation.
    pub fn capture_failures(&self) -> u64 {
        self.capture_failures
    }

    fn port(&self, ty: SourceBufferType) -> Option<&CapturePort> {
        match ty {
            SourceBufferType::Mic => Some(&self.mic),
            SourceBufferType::Ec => self.ec.as_ref(),
            SourceBufferType::MicRef => self.mic_ref.as_ref(),
        }
    }

    fn ports_mut(&mut self) -> impl Iterator<Item = &mut CapturePort> {
        std::iter::once(&mut self.mic).chain(self.ec.as_mut()).chain(self.mic_ref.as_mut())
    }
}

impl AudioNode for SourceInputNode {
    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn node_info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn node_type(&self) -> NodeType {
        NodeType::SourceInput
    }

    fn output_port_count(&self) -> u16 {
        SourceBufferType::ALL.len() as u16
    }

    fn do_process(&mut self, _inputs: &[&PcmBuffer]) -> bool {
        let Some(source) = self.source.clone() else {
            tracing::warn!(node = %self.info.node_id, "capture source missing");
            return false;
        };

        let mut frames = CaptureFrames {
            mic: &mut self.mic.bytes,
            ec: self.ec.as_mut().map(|p| p.bytes.as_mut_slice()),
            mic_ref: self.mic_ref.as_mut().map(|p| p.bytes.as_mut_slice()),
        };
        match source.capture_frame_with_ec(&mut frames) {
            Ok(()) => self.ports_mut().for_each(CapturePort::convert),
            Err(e) => {
                self.capture_failures += 1;
                tracing::error!(source = %self.info.node_name, error = %e, "capture frame failed");
                self.ports_mut().for_each(CapturePort::invalidate);
            }
        }
        true
    }

    fn output(&self, port: u16) -> Option<&PcmBuffer> {
        SourceBufferType::ALL
            .into_iter()
            .find(|ty| ty.port() == port)
            .and_then(|ty| self.port(ty))
            .map(|p| &p.out)
    }

    fn reset(&mut self) -> bool {
        self.ports_mut().for_each(|p| p.out.reset());
        true
    }
}

#[cfg(test)]
mod tests {
    use hpae_core::SourceType;
    use hpae_io::NullCaptureSource;

    use super::*;

    fn attr(ec: bool) -> SourceInfo {
        SourceInfo {
            source_name: "mic".into(),
            device_class: "primary".into(),
            source_type: SourceType::Mic,
            sample_rate: 16000,
            channels: 1,
            format: SampleFormat::S16Le,
            frame_len: 320,
            ec_type: if ec { EcType::SameAdapter } else { EcType::None },
            ec_sample_rate: 48000,
            ec_channels: 2,
            ec_format: SampleFormat::S16Le,
            ..SourceInfo::default()
        }
    }

    fn setup(ec: bool, source: NullCaptureSource) -> (SourceInputNode, Arc<NullCaptureSource>) {
        let ctx = Arc::new(DeviceContext::new());
        let source = Arc::new(source);
        ctx.register_capture_source("primary", source.clone());
        let mut node = SourceInputNode::new(&attr(ec), ctx);
        node.get_capture_source_instance("primary", "").unwrap();
        node.capture_source_init().unwrap();
        node.capture_source_start().unwrap();
        (node, source)
    }

    #[test]
    fn mic_only_exposes_one_port() {
        let (node, _source) = setup(false, NullCaptureSource::new());
        assert!(node.output(0).is_some());
        assert!(node.output(1).is_none());
        assert!(node.output(2).is_none());
        assert_eq!(node.source_state(), StreamManagerState::Running);
    }

    #[test]
    fn captures_pattern_as_float() {
        let pattern = 16384i16.to_le_bytes().to_vec();
        let (mut node, source) = setup(false, NullCaptureSource::with_pattern(pattern));
        assert!(node.do_process(&[]));
        let out = node.output(0).unwrap();
        assert!(out.is_valid());
        assert!(!out.is_silence());
        assert!(out.data().iter().all(|&s| (s - 0.5).abs() < 1e-4));
        assert_eq!(out.source_buffer_type(), SourceBufferType::Mic);
        assert_eq!(source.capture_calls(), 1);
    }

    #[test]
    fn ec_port_has_its_own_geometry() {
        let (mut node, _source) = setup(true, NullCaptureSource::new());
        node.do_process(&[]);
        let ec = node.output(SourceBufferType::Ec.port()).unwrap();
        assert_eq!(ec.channels(), 2);
        assert_eq!(ec.frame_len(), 960);
        assert_eq!(ec.source_buffer_type(), SourceBufferType::Ec);
        assert!(ec.is_valid());
    }

    #[test]
    fn failed_capture_invalidates_every_port() {
        let (mut node, source) = setup(true, NullCaptureSource::new());
        source.set_fail_capture(true);
        node.do_process(&[]);
        assert!(!node.output(0).unwrap().is_valid());
        assert!(!node.output(1).unwrap().is_valid());
        assert_eq!(node.capture_failures(), 1);
    }

    #[test]
    fn stop_then_deinit_releases() {
        let (mut node, _source) = setup(false, NullCaptureSource::new());
        node.capture_source_stop().unwrap();
        assert_eq!(node.source_state(), StreamManagerState::Suspended);
        node.capture_source_deinit().unwrap();
        assert_eq!(node.source_state(), StreamManagerState::Released);
        assert!(!node.do_process(&[]));
    }
}
