//! Capturer manager: every record session of one source.
//!
//! ```text
//!                 ┌ mic ─> Converter ─┐
//! SourceInput ────┼ ec ──> Converter ─┼-> CaptureEffect ─┬-> Converter -> SourceOutput
//!   (device)      └ ref ─> Converter ─┘  (per scene)     └-> Converter -> SourceOutput
//!        │
//!        └ mic ──────────────────────────────────────────────> Converter -> SourceOutput
//! ```
//!
//! Sessions whose source type maps to an enhance scene share one capture
//! effect per scene, fed by converters built from the chain's requested
//! geometry. Sessions without a scene, or whose chain could not be built,
//! read the mic port directly. A session's converter is connected to its
//! upstream only while the session runs.
//!
//! The capture source has no clock the engine can rely on, so the worker
//! paces itself at one frame per period with [`RemoteTiming`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use hpae_core::{
    AudioNode, EcType, EnhanceScene, HpaeError, NodeId, NodeInfo, NodeStatusCallback, Operation, Pipeline,
    PortRef, Result, SessionState, SourceBufferType, SourceInfo, StreamClass, StreamInfo,
    StreamManagerState,
};
use hpae_effects::{EnhanceDeviceAttr, scene_key_code};
use hpae_io::ReadCallback;
use hpae_node::{
    CaptureEffectNode, ConverterNode, HpaeNode, RemoteTiming, SourceInputNode, SourceOutputNode,
};
use parking_lot::Mutex;

use crate::callback::{NodeEvent, StatusChannel};
use crate::context::ManagerContext;
use crate::session::SourceOutputInfo;
use crate::worker::{Engine, Worker};

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

enum CapturerCommand {
    CreateStream(StreamInfo),
    DestroyStream(u32),
    Start(u32),
    Pause(u32),
    Stop(u32),
    RegisterReadCallback(u32, Weak<dyn ReadCallback>),
    SetMute(bool),
    SourceOutputInfo(u32, Sender<Result<SourceOutputInfo>>),
}

struct CaptureSession {
    stream: StreamInfo,
    scene: Option<EnhanceScene>,
    converter: NodeId,
    output: NodeId,
}

struct EffectPath {
    node: NodeId,
    converters: Vec<NodeId>,
}

struct CapturerState {
    source_info: SourceInfo,
    ctx: ManagerContext,
    port_id: u32,
    pipeline: Pipeline<HpaeNode>,
    source: NodeId,
    sessions: HashMap<u32, CaptureSession>,
    effects: HashMap<EnhanceScene, EffectPath>,
    status: Arc<StatusChannel>,
    events: Receiver<NodeEvent>,
    timing: RemoteTiming,
    device_open: bool,
}

impl CapturerState {
    fn open(port_id: u32, source_info: SourceInfo, ctx: ManagerContext) -> Result<Self> {
        let (status, events) = StatusChannel::new();
        let mut pipeline = Pipeline::new();
        let mut node = SourceInputNode::new(&source_info, Arc::clone(&ctx.device));
        node.get_capture_source_instance(&source_info.device_class, &source_info.device_net_id)?;
        if let Err(e) = node.capture_source_init() {
            let _ = node.capture_source_deinit();
            return Err(e);
        }
        let source = pipeline.add_node(node.into());
        tracing::info!(source = %source_info.source_name, class = %source_info.device_class, "capture source opened");
        Ok(Self {
            timing: RemoteTiming::new(ctx.device.clock()),
            source_info,
            ctx,
            port_id,
            pipeline,
            source,
            sessions: HashMap::new(),
            effects: HashMap::new(),
            status,
            events,
            device_open: true,
        })
    }

    fn source_node(&self) -> Option<&SourceInputNode> {
        self.pipeline.node(self.source)?.as_source_input()
    }

    fn source_node_mut(&mut self) -> Option<&mut SourceInputNode> {
        self.pipeline.node_mut(self.source)?.as_source_input_mut()
    }

    fn source_state(&self) -> StreamManagerState {
        self.source_node().map_or(StreamManagerState::Released, SourceInputNode::source_state)
    }

    fn close_device(&mut self) {
        if !std::mem::take(&mut self.device_open) {
            return;
        }
        let name = self.source_info.source_name.clone();
        if let Some(node) = self.source_node_mut() {
            if node.source_state() == StreamManagerState::Running
                && let Err(e) = node.capture_source_stop()
            {
                tracing::warn!(source = %name, error = %e, "capture source stop failed");
            }
            if let Err(e) = node.capture_source_deinit() {
                tracing::warn!(source = %name, error = %e, "capture source deinit failed");
            }
        }
        tracing::info!(source = %name, "capture source closed");
    }

    fn status_weak(&self) -> Weak<dyn NodeStatusCallback> {
        Arc::downgrade(&self.status) as Weak<dyn NodeStatusCallback>
    }

    fn output(&self, session_id: u32) -> Option<&SourceOutputNode> {
        let id = self.sessions.get(&session_id)?.output;
        self.pipeline.node(id)?.as_source_output()
    }

    fn output_mut(&mut self, session_id: u32) -> Option<&mut SourceOutputNode> {
        let id = self.sessions.get(&session_id)?.output;
        self.pipeline.node_mut(id)?.as_source_output_mut()
    }

    fn session_state(&self, session_id: u32) -> Option<SessionState> {
        self.output(session_id).map(SourceOutputNode::state)
    }

    fn notify(&self, session_id: u32, state: SessionState, operation: Operation) {
        self.ctx.registry.notify(StreamClass::Record, session_id, state, operation);
    }

    fn device_attr(&self) -> EnhanceDeviceAttr {
        let info = &self.source_info;
        EnhanceDeviceAttr {
            mic_channels: info.channels,
            ec_channels: if info.ec_type == EcType::None { 0 } else { info.ec_channels },
            mic_ref_channels: if info.mic_ref_enabled { info.mic_ref_channels } else { 0 },
            sample_rate: info.sample_rate,
        }
    }

    // --- capture effects ---

    /// Builds the effect path for `scene`, or `None` if no chain exists for it.
    fn ensure_effect(&mut self, scene: EnhanceScene) -> Option<NodeId> {
        if let Some(path) = self.effects.get(&scene) {
            return Some(path.node);
        }
        let scene_key = scene_key_code(scene, self.port_id);
        let mut info = NodeInfo::from_source(&self.source_info).with_callback(self.status_weak());
        info.node_name = format!("{}_{}_effect", self.source_info.source_name, scene.as_str());
        info.enhance_scene = scene;
        let mut effect = CaptureEffectNode::new(info, Arc::clone(&self.ctx.enhance));
        if let Err(e) = effect.capture_effect_create(scene_key, &self.device_attr()) {
            tracing::warn!(scene = scene.as_str(), error = %e, "no capture effect, reading mic directly");
            return None;
        }

        let mut port_links = Vec::new();
        for ty in SourceBufferType::ALL {
            let (Some(port_info), Some(target)) = (
                self.source_node().and_then(|n| n.port_info(ty)).cloned(),
                effect.capturer_effect_config(ty),
            ) else {
                continue;
            };
            if target.sample_rate == 0 || target.channels == 0 {
                continue;
            }
            port_links.push((ty, ConverterNode::new(&port_info, target)));
        }

        let node = self.pipeline.add_node(effect.into());
        let mut converters = Vec::with_capacity(port_links.len());
        for (ty, converter) in port_links {
            let id = self.pipeline.add_node(converter.into());
            let linked = self
                .pipeline
                .connect(PortRef::new(self.source, ty.port()), id)
                .and_then(|_| self.pipeline.connect(id.into(), node));
            if let Err(e) = linked {
                tracing::error!(?ty, error = %e, "capture effect port link failed");
            }
            converters.push(id);
        }
        tracing::info!(scene = scene.as_str(), scene_key, ports = converters.len(), "capture effect created");
        self.effects.insert(scene, EffectPath { node, converters });
        Some(node)
    }

    fn release_effect_if_unused(&mut self, scene: EnhanceScene) {
        if self.sessions.values().any(|s| s.scene == Some(scene)) {
            return;
        }
        let Some(path) = self.effects.remove(&scene) else {
            return;
        };
        if let Ok(mut node) = self.pipeline.remove_node(path.node)
            && let Some(effect) = node.as_capture_effect_mut()
        {
            let _ = effect.capture_effect_release();
        }
        for id in path.converters {
            let _ = self.pipeline.remove_node(id);
        }
        tracing::info!(scene = scene.as_str(), "capture effect released");
    }

    fn upstream_of(&self, session: &CaptureSession) -> PortRef {
        session
            .scene
            .and_then(|scene| self.effects.get(&scene))
            .map_or(PortRef::new(self.source, SourceBufferType::Mic.port()), |path| path.node.into())
    }

    // --- session wiring ---

    fn connect_session(&mut self, session_id: u32) -> Result<()> {
        let session = self.sessions.get(&session_id).ok_or(HpaeError::InvalidOperation)?;
        let upstream = self.upstream_of(session);
        let converter = session.converter;
        if self.pipeline.find_edge(upstream, converter).is_none() {
            self.pipeline.connect(upstream, converter)?;
        }
        Ok(())
    }

    fn disconnect_session(&mut self, session_id: u32) {
        if let Some(session) = self.sessions.get(&session_id) {
            let converter = session.converter;
            self.pipeline.disconnect_all_inputs(converter);
        }
    }

    fn any_running(&self) -> bool {
        self.sessions
            .keys()
            .any(|&id| self.session_state(id) == Some(SessionState::Running))
    }

    fn start_source(&mut self) -> Result<()> {
        if self.source_state() == StreamManagerState::Running {
            return Ok(());
        }
        let uids: Vec<i32> = self.sessions.values().map(|s| s.stream.uid).collect();
        let node = self.source_node_mut().ok_or(HpaeError::NotInited)?;
        node.capture_source_start()?;
        if let Err(e) = node.update_apps_uid(&uids) {
            tracing::debug!(error = %e, "update apps uid failed");
        }
        self.timing.reset();
        Ok(())
    }

    fn stop_source_if_idle(&mut self) {
        if self.any_running() || self.source_state() != StreamManagerState::Running {
            return;
        }
        if let Some(node) = self.source_node_mut()
            && let Err(e) = node.capture_source_stop()
        {
            tracing::warn!(error = %e, "capture source stop failed");
        }
    }

    // --- commands ---

    fn create_stream(&mut self, stream: StreamInfo) -> Result<()> {
        let session_id = stream.session_id;
        if self.sessions.contains_key(&session_id) {
            tracing::error!(session_id, "session already exists");
            return Err(HpaeError::InvalidOperation);
        }
        let info = NodeInfo {
            device_class: self.source_info.device_class.clone(),
            device_net_id: self.source_info.device_net_id.clone(),
            ..NodeInfo::from_stream(&stream).with_callback(self.status_weak())
        };
        let scene = match info.enhance_scene {
            EnhanceScene::None => None,
            scene => self.ensure_effect(scene).map(|_| scene),
        };
        let upstream_info = scene
            .and_then(|scene| self.effects.get(&scene))
            .and_then(|path| self.pipeline.node(path.node))
            .and_then(HpaeNode::as_capture_effect)
            .and_then(|effect| effect.capturer_effect_config(SourceBufferType::Mic))
            .or_else(|| self.source_node().map(|n| n.node_info().clone()))
            .ok_or(HpaeError::NotInited)?;

        let converter_info = NodeInfo {
            node_name: format!("session_{session_id}_converter"),
            ..info.clone()
        };
        let converter = self
            .pipeline
            .add_node(ConverterNode::new(&upstream_info, converter_info).into());
        let mut output = SourceOutputNode::new(info, self.ctx.device.clock());
        output.set_app_uid(stream.uid);
        output.set_state(SessionState::Prepared);
        let output = self.pipeline.add_node(output.into());
        self.pipeline.connect(converter.into(), output)?;

        self.sessions.insert(
            session_id,
            CaptureSession {
                stream,
                scene,
                converter,
                output,
            },
        );
        tracing::info!(session_id, source = %self.source_info.source_name, ?scene, "capture session created");
        Ok(())
    }

    fn destroy_stream(&mut self, session_id: u32) -> Result<()> {
        let session = self.sessions.remove(&session_id).ok_or(HpaeError::InvalidOperation)?;
        let _ = self.pipeline.remove_node(session.output);
        let _ = self.pipeline.remove_node(session.converter);
        if let Some(scene) = session.scene {
            self.release_effect_if_unused(scene);
        }
        self.stop_source_if_idle();
        tracing::info!(session_id, "capture session destroyed");
        self.notify(session_id, SessionState::Released, Operation::Released);
        Ok(())
    }

    fn start(&mut self, session_id: u32) -> Result<()> {
        let state = self.session_state(session_id).ok_or(HpaeError::InvalidOperation)?;
        if state == SessionState::Running {
            return Ok(());
        }
        self.connect_session(session_id)?;
        self.start_source()?;
        if let Some(output) = self.output_mut(session_id) {
            output.set_state(SessionState::Running);
        }
        self.notify(session_id, SessionState::Running, Operation::Started);
        Ok(())
    }

    fn pause_or_stop(&mut self, session_id: u32, operation: Operation) -> Result<()> {
        let done = if operation == Operation::Paused {
            SessionState::Paused
        } else {
            SessionState::Stopped
        };
        let output = self.output_mut(session_id).ok_or(HpaeError::InvalidOperation)?;
        output.set_state(done);
        self.disconnect_session(session_id);
        self.stop_source_if_idle();
        self.notify(session_id, done, operation);
        Ok(())
    }

    fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.source_node().ok_or(HpaeError::NotInited)?.set_mute(mute)
    }

    fn source_output_info(&self, session_id: u32) -> Result<SourceOutputInfo> {
        let session = self.sessions.get(&session_id).ok_or(HpaeError::InvalidOperation)?;
        let node = self.output(session_id).ok_or(HpaeError::InvalidOperation)?;
        Ok(SourceOutputInfo {
            node_info: node.node_info().clone(),
            stream: session.stream.clone(),
            state: node.state(),
            frames_read: node.frames_read(),
            overflows: node.overflows(),
        })
    }

    fn dispatch_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            let (NodeEvent::Status { session_id, operation } | NodeEvent::FadeDone { session_id, operation }) = event;
            let state = self.session_state(session_id).unwrap_or(SessionState::Released);
            self.notify(session_id, state, operation);
        }
    }

    fn log_failure(&self, what: &str, session_id: u32, result: Result<()>) {
        if let Err(e) = result {
            tracing::error!(session_id, source = %self.source_info.source_name, error = %e, "{what} failed");
        }
    }
}

impl Engine for CapturerState {
    type Command = CapturerCommand;

    fn handle(&mut self, cmd: CapturerCommand) {
        match cmd {
            CapturerCommand::CreateStream(stream) => {
                let id = stream.session_id;
                let ret = self.create_stream(stream);
                self.log_failure("create stream", id, ret);
            }
            CapturerCommand::DestroyStream(id) => {
                let ret = self.destroy_stream(id);
                self.log_failure("destroy stream", id, ret);
            }
            CapturerCommand::Start(id) => {
                let ret = self.start(id);
                self.log_failure("start", id, ret);
            }
            CapturerCommand::Pause(id) => {
                let ret = self.pause_or_stop(id, Operation::Paused);
                self.log_failure("pause", id, ret);
            }
            CapturerCommand::Stop(id) => {
                let ret = self.pause_or_stop(id, Operation::Stopped);
                self.log_failure("stop", id, ret);
            }
            CapturerCommand::RegisterReadCallback(id, callback) => match self.output_mut(id) {
                Some(output) => {
                    if !output.register_read_callback(callback) {
                        tracing::warn!(session_id = id, "read callback already dropped");
                    }
                }
                None => self.log_failure("register read callback", id, Err(HpaeError::InvalidOperation)),
            },
            CapturerCommand::SetMute(mute) => {
                let ret = self.set_mute(mute);
                self.log_failure("set mute", 0, ret);
            }
            CapturerCommand::SourceOutputInfo(id, reply) => {
                let _ = reply.send(self.source_output_info(id));
            }
        }
    }

    fn is_running(&self) -> bool {
        self.source_state() == StreamManagerState::Running && self.any_running()
    }

    fn process(&mut self) {
        self.pipeline.process();
        self.dispatch_events();
        self.timing.handle();
    }
}

impl Drop for CapturerState {
    fn drop(&mut self) {
        self.close_device();
    }
}

/// Handle to the capture pipeline of one source.
pub struct CapturerManager {
    port_id: u32,
    ctx: ManagerContext,
    source_info: Mutex<SourceInfo>,
    worker: Mutex<Option<Worker<CapturerState>>>,
}

impl CapturerManager {
    /// Manager for the source described by `source_info`. Nothing is opened
    /// until [`init`](Self::init).
    pub fn new(port_id: u32, source_info: SourceInfo, ctx: ManagerContext) -> Self {
        Self {
            port_id,
            ctx,
            source_info: Mutex::new(source_info),
            worker: Mutex::new(None),
        }
    }

    /// Port id assigned by the engine manager.
    pub fn port_id(&self) -> u32 {
        self.port_id
    }

    /// Current source description.
    pub fn source_info(&self) -> SourceInfo {
        self.source_info.lock().clone()
    }

    /// Opens the source and starts the processing thread.
    pub fn init(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            tracing::warn!(port_id = self.port_id, "capturer already initialized");
            return Ok(());
        }
        let source_info = self.source_info();
        let state = match CapturerState::open(self.port_id, source_info.clone(), self.ctx.clone()) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(source = %source_info.source_name, error = %e, "capturer init failed");
                self.ctx.registry.notify_init_device(&source_info.source_name, false);
                return Err(e);
            }
        };
        let name = format!("capturer-{}", source_info.source_name);
        *worker = Some(Worker::spawn(&name, state, self.ctx.settings.queue_depth)?);
        tracing::info!(port_id = self.port_id, source = %source_info.source_name, "capturer initialized");
        self.ctx.registry.notify_init_device(&source_info.source_name, true);
        Ok(())
    }

    /// Stops the thread, drops every session and closes the source.
    pub fn deinit(&self) -> Result<()> {
        let worker = self.worker.lock().take().ok_or(HpaeError::NotInited)?;
        drop(worker.stop());
        tracing::info!(port_id = self.port_id, "capturer deinitialized");
        Ok(())
    }

    /// Replaces the source description and initializes again.
    pub fn reload(&self, source_info: SourceInfo) -> Result<()> {
        if self.is_init() {
            self.deinit()?;
        }
        *self.source_info.lock() = source_info;
        self.init()
    }

    /// Whether the processing thread is up.
    pub fn is_init(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Whether posted commands are still waiting to be handled.
    pub fn is_msg_processing(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(Worker::is_msg_processing)
    }

    fn send(&self, cmd: CapturerCommand) -> Result<()> {
        match self.worker.lock().as_ref() {
            Some(worker) => worker.send(cmd),
            None => {
                tracing::error!(port_id = self.port_id, "capturer not initialized");
                Err(HpaeError::InvalidOperation)
            }
        }
    }

    /// Creates a capture session in the `Prepared` state.
    pub fn create_stream(&self, stream: StreamInfo) -> Result<()> {
        if stream.channels == 0 || stream.sample_rate == 0 {
            return Err(HpaeError::invalid_param(format!(
                "session {}: {} channels at {} Hz",
                stream.session_id, stream.channels, stream.sample_rate
            )));
        }
        self.send(CapturerCommand::CreateStream(stream))
    }

    /// Removes a session; later lookups fail with `InvalidOperation`.
    pub fn destroy_stream(&self, session_id: u32) -> Result<()> {
        self.send(CapturerCommand::DestroyStream(session_id))
    }

    /// Connects a session, starting the source if it is the first.
    pub fn start(&self, session_id: u32) -> Result<()> {
        self.send(CapturerCommand::Start(session_id))
    }

    /// Disconnects a session and reports `Paused`.
    pub fn pause(&self, session_id: u32) -> Result<()> {
        self.send(CapturerCommand::Pause(session_id))
    }

    /// Disconnects a session and reports `Stopped`.
    pub fn stop(&self, session_id: u32) -> Result<()> {
        self.send(CapturerCommand::Stop(session_id))
    }

    /// Registers the client consumer of a session.
    pub fn register_read_callback(&self, session_id: u32, callback: Weak<dyn ReadCallback>) -> Result<()> {
        self.send(CapturerCommand::RegisterReadCallback(session_id, callback))
    }

    /// Mutes the capture device.
    pub fn set_mute(&self, mute: bool) -> Result<()> {
        self.send(CapturerCommand::SetMute(mute))
    }

    /// Snapshot of a session; `InvalidOperation` if it does not exist.
    pub fn get_source_output_info(&self, session_id: u32) -> Result<SourceOutputInfo> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(CapturerCommand::SourceOutputInfo(session_id, tx))?;
        rx.recv_timeout(REPLY_TIMEOUT).map_err(|_| HpaeError::IllegalState)?
    }
}
