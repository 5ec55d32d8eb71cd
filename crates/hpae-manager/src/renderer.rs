//! Renderer manager: every render session of one sink.
//!
//! ```text
//! SinkInput -> Gain -> Converter ─┐                    (per session)
//!                                 ├-> Mixer -> RenderEffect -> Converter ─┐   (per cluster)
//! SinkInput -> Gain -> Converter ─┘                                      ├-> Mixer -> SinkOutput
//!                                                                        │
//!                                           other clusters ──────────────┘
//! ```
//!
//! Sessions are grouped into clusters by render scene; sessions with effect
//! mode `None` share the `EffectNone` cluster. On a remote sink the clusters
//! are the split sub-streams instead and feed the remote output directly.
//! A session's own three nodes stay wired for its whole life; only the edge
//! into its cluster mixer comes and goes with start, pause and stop.
//!
//! The pipeline lives on the manager's worker thread. Every public method
//! posts a command and returns; [`RendererManager::get_sink_input_info`] and
//! [`RendererManager::move_out`] wait for the reply.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use hpae_core::{
    AudioNode, EffectMode, HpaeError, NodeId, NodeInfo, NodeStatusCallback, Operation, Pipeline,
    Result, SceneType, SessionState, SinkInfo, SplitStreamType, StreamClass, StreamInfo,
    StreamManagerState, StreamUsage,
};
use hpae_effects::BypassEffect;
use hpae_io::WriteCallback;
use hpae_node::{
    ConverterNode, GainNode, HpaeNode, MixerNode, OFFLOAD_CLASS, PRIMARY_CLASS, REMOTE_CLASS,
    RemoteSinkOutputNode, RenderEffectNode, SinkInputNode, SinkOutputNode,
};
use parking_lot::Mutex;

use crate::callback::{NodeEvent, StatusChannel};
use crate::context::ManagerContext;
use crate::session::SinkInputInfo;
use crate::worker::{Engine, Worker};

/// Rate of the scene mix.
const MIX_RATE: u32 = 48000;
/// Channel count of the scene mix.
const MIX_CHANNELS: u32 = 2;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ClusterKey {
    Scene(SceneType),
    Split(SplitStreamType),
}

fn split_for_usage(usage: StreamUsage) -> SplitStreamType {
    match usage {
        StreamUsage::Navigation => SplitStreamType::Navigation,
        StreamUsage::VoiceCommunication => SplitStreamType::Communication,
        _ => SplitStreamType::Media,
    }
}

/// A render session detached from its sink, ready to be attached to another.
pub struct MovedSinkInput {
    /// Stream as submitted on create.
    pub stream: StreamInfo,
    /// State to restore; `Running` sessions are reconnected on arrival.
    pub state: SessionState,
    /// The session's sink input, client callback and history included.
    pub node: SinkInputNode,
    /// Client volume.
    pub volume: f32,
}

enum RendererCommand {
    CreateStream(StreamInfo),
    DestroyStream(u32),
    Start(u32),
    Pause(u32),
    Flush(u32),
    Drain(u32),
    Stop(u32),
    RegisterWriteCallback(u32, Weak<dyn WriteCallback>),
    SetClientVolume(u32, f32),
    SetEffectMode(u32, EffectMode),
    SinkInputInfo(u32, Sender<Result<SinkInputInfo>>),
    MoveOut(u32, Sender<Result<MovedSinkInput>>),
    MoveIn(Box<MovedSinkInput>),
}

/// Device control shared by the local and remote output nodes.
trait SinkControl {
    fn acquire(&mut self, class: &str, net_id: &str) -> Result<()>;
    fn init(&mut self, attr: &SinkInfo) -> Result<()>;
    fn deinit(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn update_uids(&self, uids: &[i32]) -> Result<()>;
    fn state(&self) -> StreamManagerState;
}

macro_rules! sink_control {
    ($($ty:ty),*) => {
        $(
            impl SinkControl for $ty {
                fn acquire(&mut self, class: &str, net_id: &str) -> Result<()> {
                    self.get_render_sink_instance(class, net_id)
                }
                fn init(&mut self, attr: &SinkInfo) -> Result<()> {
                    self.render_sink_init(attr)
                }
                fn deinit(&mut self) -> Result<()> {
                    self.render_sink_deinit()
                }
                fn start(&mut self) -> Result<()> {
                    self.render_sink_start()
                }
                fn stop(&mut self) -> Result<()> {
                    self.render_sink_stop()
                }
                fn update_uids(&self, uids: &[i32]) -> Result<()> {
                    self.update_apps_uid(uids)
                }
                fn state(&self) -> StreamManagerState {
                    self.sink_state()
                }
            }
        )*
    };
}

sink_control!(SinkOutputNode, RemoteSinkOutputNode);

struct RenderSession {
    stream: StreamInfo,
    cluster: ClusterKey,
    sink_input: NodeId,
    gain: NodeId,
    converter: NodeId,
}

struct Cluster {
    mixer: NodeId,
    effect: NodeId,
    converter: NodeId,
    linked: bool,
}

/// Pipeline and sessions of one sink, owned by the worker thread.
struct RendererState {
    sink_info: SinkInfo,
    ctx: ManagerContext,
    pipeline: Pipeline<HpaeNode>,
    sink: NodeId,
    output_entry: NodeId,
    sessions: HashMap<u32, RenderSession>,
    clusters: HashMap<ClusterKey, Cluster>,
    status: Arc<StatusChannel>,
    events: Receiver<NodeEvent>,
    device_open: bool,
}

impl RendererState {
    /// Builds the output path and opens the device.
    fn open(sink_info: SinkInfo, ctx: ManagerContext) -> Result<Self> {
        let (status, events) = StatusChannel::new();
        let mut pipeline = Pipeline::new();
        let weak: Weak<dyn NodeStatusCallback> = Arc::<StatusChannel>::downgrade(&status);
        let info = NodeInfo::from_sink(&sink_info).with_callback(weak);

        let (sink, output_entry) = if sink_info.device_class == REMOTE_CLASS {
            let sink = pipeline.add_node(RemoteSinkOutputNode::new(info, Arc::clone(&ctx.device)).into());
            (sink, sink)
        } else {
            let mixer_info = NodeInfo {
                node_name: format!("{}_mixer", sink_info.device_name),
                ..info.clone()
            };
            let mixer = pipeline.add_node(MixerNode::new(mixer_info).into());
            if sink_info.device_class == PRIMARY_CLASS
                && let Some(Err(e)) = pipeline
                    .node_mut(mixer)
                    .and_then(HpaeNode::as_mixer_mut)
                    .map(MixerNode::setup_audio_limiter)
            {
                tracing::warn!(error = %e, "output limiter unavailable");
            }
            let policy = ctx.settings.pa_power_policy();
            let sink = pipeline
                .add_node(SinkOutputNode::with_policy(info, Arc::clone(&ctx.device), policy).into());
            pipeline.connect(mixer.into(), sink)?;
            (sink, mixer)
        };

        let mut state = Self {
            sink_info,
            ctx,
            pipeline,
            sink,
            output_entry,
            sessions: HashMap::new(),
            clusters: HashMap::new(),
            status,
            events,
            device_open: false,
        };
        state.open_device()?;
        Ok(state)
    }

    fn open_device(&mut self) -> Result<()> {
        let attr = self.sink_info.clone();
        let control = self.control_mut().ok_or(HpaeError::InvalidOperation)?;
        control.acquire(&attr.device_class, &attr.device_net_id)?;
        if let Err(e) = control.init(&attr) {
            let _ = control.deinit();
            return Err(e);
        }
        self.device_open = true;
        tracing::info!(sink = %attr.device_name, class = %attr.device_class, "render sink opened");
        Ok(())
    }

    fn close_device(&mut self) {
        if !std::mem::take(&mut self.device_open) {
            return;
        }
        let name = self.sink_info.device_name.clone();
        if let Some(control) = self.control_mut() {
            if control.state() == StreamManagerState::Running
                && let Err(e) = control.stop()
            {
                tracing::warn!(sink = %name, error = %e, "render sink stop failed");
            }
            if let Err(e) = control.deinit() {
                tracing::warn!(sink = %name, error = %e, "render sink deinit failed");
            }
        }
        tracing::info!(sink = %name, "render sink closed");
    }

    fn control_mut(&mut self) -> Option<&mut dyn SinkControl> {
        match self.pipeline.node_mut(self.sink)? {
            HpaeNode::SinkOutput(node) => Some(node),
            HpaeNode::RemoteSinkOutput(node) => Some(node),
            _ => None,
        }
    }

    fn sink_state(&self) -> StreamManagerState {
        match self.pipeline.node(self.sink) {
            Some(HpaeNode::SinkOutput(node)) => node.sink_state(),
            Some(HpaeNode::RemoteSinkOutput(node)) => node.sink_state(),
            _ => StreamManagerState::Released,
        }
    }

    fn is_remote(&self) -> bool {
        self.sink_info.device_class == REMOTE_CLASS
    }

    fn status_weak(&self) -> Weak<dyn NodeStatusCallback> {
        Arc::downgrade(&self.status) as Weak<dyn NodeStatusCallback>
    }

    fn mix_info(&self, base: NodeInfo) -> NodeInfo {
        base.with_geometry(MIX_CHANNELS, MIX_RATE, hpae_core::frame_len_for_rate(MIX_RATE))
    }

    fn cluster_key(&self, stream: &StreamInfo) -> ClusterKey {
        if self.is_remote() {
            ClusterKey::Split(split_for_usage(stream.stream_usage))
        } else if stream.effect_mode == EffectMode::None {
            ClusterKey::Scene(SceneType::EffectNone)
        } else {
            ClusterKey::Scene(SceneType::from_usage(stream.stream_usage))
        }
    }

    fn sink_input(&self, session_id: u32) -> Option<&SinkInputNode> {
        let session = self.sessions.get(&session_id)?;
        self.pipeline.node(session.sink_input)?.as_sink_input()
    }

    fn sink_input_mut(&mut self, session_id: u32) -> Option<&mut SinkInputNode> {
        let id = self.sessions.get(&session_id)?.sink_input;
        self.pipeline.node_mut(id)?.as_sink_input_mut()
    }

    fn gain_mut(&mut self, session_id: u32) -> Option<&mut GainNode> {
        let id = self.sessions.get(&session_id)?.gain;
        self.pipeline.node_mut(id)?.as_gain_mut()
    }

    fn session_state(&self, session_id: u32) -> Option<SessionState> {
        self.sink_input(session_id).map(SinkInputNode::state)
    }

    fn set_session_state(&mut self, session_id: u32, state: SessionState) {
        if let Some(node) = self.sink_input_mut(session_id) {
            node.set_state(state);
        }
    }

    fn notify(&self, session_id: u32, state: SessionState, operation: Operation) {
        self.ctx.registry.notify(StreamClass::Play, session_id, state, operation);
    }

    // --- clusters ---

    fn ensure_cluster(&mut self, key: ClusterKey) -> Result<NodeId> {
        if let Some(cluster) = self.clusters.get(&key) {
            return Ok(cluster.mixer);
        }
        let base = self.mix_info(NodeInfo::default()).with_callback(self.status_weak());
        let (name, scene, split) = match key {
            ClusterKey::Scene(scene) => (scene.as_str().to_owned(), scene, SplitStreamType::Default),
            ClusterKey::Split(split) => (format!("split_{}", split.code()), SceneType::EffectNone, split),
        };
        let mixer_info = NodeInfo {
            node_name: format!("{name}_mixer"),
            scene_type: scene,
            split_stream_type: split,
            ..base.clone()
        };
        let effect_info = NodeInfo {
            node_name: format!("{name}_effect"),
            ..mixer_info.clone()
        };
        let effect = if scene == SceneType::EffectNone {
            RenderEffectNode::with_effect(
                effect_info,
                Box::new(BypassEffect::new(scene, MIX_CHANNELS, base.channel_layout)),
            )
        } else {
            RenderEffectNode::new(effect_info, self.ctx.render_effects.as_ref())
        };
        let converter_info = NodeInfo {
            node_name: format!("{name}_converter"),
            ..NodeInfo::from_sink(&self.sink_info).with_callback(self.status_weak())
        };
        let converter = ConverterNode::new(&mixer_info, converter_info);

        let mixer = self.pipeline.add_node(MixerNode::new(mixer_info).into());
        let effect = self.pipeline.add_node(effect.into());
        let converter = self.pipeline.add_node(converter.into());
        self.pipeline.connect(mixer.into(), effect)?;
        self.pipeline.connect(effect.into(), converter)?;
        tracing::info!(sink = %self.sink_info.device_name, cluster = %name, "cluster created");
        self.clusters.insert(
            key,
            Cluster {
                mixer,
                effect,
                converter,
                linked: false,
            },
        );
        Ok(mixer)
    }

    fn link_cluster(&mut self, key: ClusterKey) -> Result<()> {
        let entry = self.output_entry;
        let Some(cluster) = self.clusters.get_mut(&key) else {
            return Err(HpaeError::InvalidOperation);
        };
        if !cluster.linked {
            self.pipeline.connect(cluster.converter.into(), entry)?;
            cluster.linked = true;
            tracing::debug!(?key, "cluster linked");
        }
        Ok(())
    }

    /// Unlinks an idle cluster and drops it once no session refers to it.
    fn tidy_cluster(&mut self, key: ClusterKey) {
        let in_use = self.sessions.values().any(|s| s.cluster == key);
        let Some(cluster) = self.clusters.get_mut(&key) else {
            return;
        };
        if cluster.linked && self.pipeline.pre_out_num(cluster.mixer) == 0 {
            self.pipeline.disconnect_nodes(cluster.converter, self.output_entry);
            cluster.linked = false;
            tracing::debug!(?key, "cluster unlinked");
        }
        if !in_use && let Some(cluster) = self.clusters.remove(&key) {
            for id in [cluster.converter, cluster.effect, cluster.mixer] {
                let _ = self.pipeline.remove_node(id);
            }
            tracing::info!(?key, "cluster released");
        }
    }

    // --- session wiring ---

    fn connect_session(&mut self, session_id: u32) -> Result<()> {
        let (key, converter) = {
            let session = self.sessions.get(&session_id).ok_or(HpaeError::InvalidOperation)?;
            (session.cluster, session.converter)
        };
        let mixer = self.ensure_cluster(key)?;
        if self.pipeline.find_edge(converter.into(), mixer).is_none() {
            self.pipeline.connect(converter.into(), mixer)?;
        }
        self.link_cluster(key)
    }

    fn disconnect_session(&mut self, session_id: u32) {
        let Some(session) = self.sessions.get(&session_id) else {
            return;
        };
        let key = session.cluster;
        let converter = session.converter;
        if let Some(cluster) = self.clusters.get(&key) {
            self.pipeline.disconnect_nodes(converter, cluster.mixer);
        }
        self.tidy_cluster(key);
    }

    fn ensure_sink_running(&mut self) {
        if self.sink_state() == StreamManagerState::Running {
            return;
        }
        let uids: Vec<i32> = self.sessions.values().map(|s| s.stream.uid).collect();
        let Some(control) = self.control_mut() else {
            return;
        };
        match control.start() {
            Ok(()) => {
                if let Err(e) = control.update_uids(&uids) {
                    tracing::debug!(error = %e, "update apps uid failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "render sink start failed"),
        }
    }

    fn any_connected(&self) -> bool {
        self.sessions
            .keys()
            .any(|&id| self.session_state(id).is_some_and(SessionState::is_connected))
    }

    /// Adds a session's nodes around an existing sink input.
    fn attach(&mut self, stream: StreamInfo, mut node: SinkInputNode, volume: f32) -> Result<u32> {
        let session_id = stream.session_id;
        {
            let info = node.node_info_mut();
            info.device_class = self.sink_info.device_class.clone();
            info.device_net_id = self.sink_info.device_net_id.clone();
            info.status_callback = Some(self.status_weak());
        }
        node.set_offload_enabled(self.sink_info.offload_enable);
        let stream_info = node.node_info().clone();
        let mut gain = GainNode::new(stream_info.clone());
        gain.set_client_volume(volume);
        let converter_info = NodeInfo {
            node_name: format!("session_{session_id}_converter"),
            ..self.mix_info(stream_info.clone())
        };
        let converter = ConverterNode::new(&stream_info, converter_info);

        let sink_input = self.pipeline.add_node(node.into());
        let gain = self.pipeline.add_node(gain.into());
        let converter = self.pipeline.add_node(converter.into());
        self.pipeline.connect(sink_input.into(), gain)?;
        self.pipeline.connect(gain.into(), converter)?;

        let cluster = self.cluster_key(&stream);
        self.sessions.insert(
            session_id,
            RenderSession {
                stream,
                cluster,
                sink_input,
                gain,
                converter,
            },
        );
        Ok(session_id)
    }

    fn detach(&mut self, session_id: u32) -> Option<(RenderSession, SinkInputNode, f32)> {
        self.disconnect_session(session_id);
        let session = self.sessions.remove(&session_id)?;
        let volume = self
            .pipeline
            .remove_node(session.gain)
            .ok()
            .and_then(|n| n.as_gain().map(GainNode::client_volume))
            .unwrap_or(1.0);
        let _ = self.pipeline.remove_node(session.converter);
        let node = match self.pipeline.remove_node(session.sink_input) {
            Ok(HpaeNode::SinkInput(node)) => node,
            _ => return None,
        };
        self.tidy_cluster(session.cluster);
        Some((session, node, volume))
    }

    // --- commands ---

    fn create_stream(&mut self, stream: StreamInfo) -> Result<()> {
        let session_id = stream.session_id;
        if self.sessions.contains_key(&session_id) {
            tracing::error!(session_id, "session already exists");
            return Err(HpaeError::InvalidOperation);
        }
        let mut info = NodeInfo::from_stream(&stream);
        info.history_frame_count = if self.sink_info.device_class == OFFLOAD_CLASS {
            self.ctx.settings.history_frames
        } else {
            0
        };
        let mut node = SinkInputNode::new(info, self.ctx.device.clock());
        node.set_app_uid(stream.uid);
        node.set_state(SessionState::Prepared);
        self.attach(stream, node, 1.0)?;
        tracing::info!(session_id, sink = %self.sink_info.device_name, "render session created");
        Ok(())
    }

    fn destroy_stream(&mut self, session_id: u32) -> Result<()> {
        let (_, mut node, _) = self.detach(session_id).ok_or(HpaeError::InvalidOperation)?;
        node.set_state(SessionState::Released);
        tracing::info!(session_id, "render session destroyed");
        self.notify(session_id, SessionState::Released, Operation::Released);
        Ok(())
    }

    fn start(&mut self, session_id: u32) -> Result<()> {
        let state = self.session_state(session_id).ok_or(HpaeError::InvalidOperation)?;
        if state == SessionState::Running {
            tracing::debug!(session_id, "already running");
            return Ok(());
        }
        self.connect_session(session_id)?;
        self.set_session_state(session_id, SessionState::Running);
        if let Some(gain) = self.gain_mut(session_id) {
            gain.fade_in();
        }
        self.ensure_sink_running();
        self.notify(session_id, SessionState::Running, Operation::Started);
        Ok(())
    }

    fn pause_or_stop(&mut self, session_id: u32, operation: Operation) -> Result<()> {
        let (fading, done) = match operation {
            Operation::Paused => (SessionState::Pausing, SessionState::Paused),
            _ => (SessionState::Stopping, SessionState::Stopped),
        };
        let state = self.session_state(session_id).ok_or(HpaeError::InvalidOperation)?;
        if state == SessionState::Running && self.sink_state() == StreamManagerState::Running {
            self.set_session_state(session_id, fading);
            if let Some(gain) = self.gain_mut(session_id) {
                gain.fade_out(operation);
            }
            return Ok(());
        }
        if state.is_connected() {
            self.disconnect_session(session_id);
        }
        self.set_session_state(session_id, done);
        self.notify(session_id, done, operation);
        Ok(())
    }

    fn on_fade_done(&mut self, session_id: u32, operation: Operation) {
        let done = match (self.session_state(session_id), operation) {
            (Some(SessionState::Pausing), Operation::Paused) => SessionState::Paused,
            (Some(SessionState::Stopping), Operation::Stopped) => SessionState::Stopped,
            (state, _) => {
                tracing::debug!(session_id, ?state, %operation, "stale fade done");
                return;
            }
        };
        self.disconnect_session(session_id);
        self.set_session_state(session_id, done);
        self.notify(session_id, done, operation);
    }

    fn flush(&mut self, session_id: u32) -> Result<()> {
        let node = self.sink_input_mut(session_id).ok_or(HpaeError::InvalidOperation)?;
        node.flush();
        let state = node.state();
        self.notify(session_id, state, Operation::Flushed);
        Ok(())
    }

    fn drain(&mut self, session_id: u32) -> Result<()> {
        let node = self.sink_input_mut(session_id).ok_or(HpaeError::InvalidOperation)?;
        let state = node.state();
        if state == SessionState::Running {
            node.drain();
        } else {
            self.notify(session_id, state, Operation::Drained);
        }
        Ok(())
    }

    fn set_effect_mode(&mut self, session_id: u32, mode: EffectMode) -> Result<()> {
        let session = self.sessions.get_mut(&session_id).ok_or(HpaeError::InvalidOperation)?;
        session.stream.effect_mode = mode;
        let old = session.cluster;
        let stream = session.stream.clone();
        let new = self.cluster_key(&stream);
        if old == new {
            return Ok(());
        }
        let connected = self.session_state(session_id).is_some_and(SessionState::is_connected);
        if connected {
            self.disconnect_session(session_id);
        }
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.cluster = new;
        }
        self.tidy_cluster(old);
        if connected {
            self.connect_session(session_id)?;
        }
        tracing::info!(session_id, ?mode, from = ?old, to = ?new, "effect mode changed");
        Ok(())
    }

    fn sink_input_info(&self, session_id: u32) -> Result<SinkInputInfo> {
        let session = self.sessions.get(&session_id).ok_or(HpaeError::InvalidOperation)?;
        let node = self.sink_input(session_id).ok_or(HpaeError::InvalidOperation)?;
        let client_volume = self
            .pipeline
            .node(session.gain)
            .and_then(HpaeNode::as_gain)
            .map_or(1.0, GainNode::client_volume);
        Ok(SinkInputInfo {
            node_info: node.node_info().clone(),
            stream: session.stream.clone(),
            state: node.state(),
            frames_written: node.frames_written(),
            client_volume,
        })
    }

    fn move_out(&mut self, session_id: u32) -> Result<MovedSinkInput> {
        let (session, node, volume) = self.detach(session_id).ok_or(HpaeError::InvalidOperation)?;
        let state = match node.state() {
            SessionState::Running => SessionState::Running,
            SessionState::Pausing => SessionState::Paused,
            SessionState::Stopping => SessionState::Stopped,
            other => other,
        };
        tracing::info!(session_id, ?state, sink = %self.sink_info.device_name, "session moved out");
        Ok(MovedSinkInput {
            stream: session.stream,
            state,
            node,
            volume,
        })
    }

    fn move_in(&mut self, moved: MovedSinkInput) -> Result<()> {
        let MovedSinkInput {
            stream,
            state,
            mut node,
            volume,
        } = moved;
        let session_id = stream.session_id;
        if self.sessions.contains_key(&session_id) {
            return Err(HpaeError::InvalidOperation);
        }
        let resume = state.is_connected();
        node.set_state(if resume { SessionState::Prepared } else { state });
        self.attach(stream, node, volume)?;
        tracing::info!(session_id, sink = %self.sink_info.device_name, "session moved in");
        if resume {
            self.connect_session(session_id)?;
            self.set_session_state(session_id, SessionState::Running);
            if let Some(gain) = self.gain_mut(session_id) {
                gain.fade_in();
            }
            self.ensure_sink_running();
        }
        Ok(())
    }

    fn park(&mut self) -> Vec<MovedSinkInput> {
        let ids: Vec<u32> = self.sessions.keys().copied().collect();
        let parked = ids.into_iter().filter_map(|id| self.move_out(id).ok()).collect();
        self.close_device();
        parked
    }

    fn dispatch_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                NodeEvent::FadeDone {
                    session_id,
                    operation,
                } => self.on_fade_done(session_id, operation),
                NodeEvent::Status {
                    session_id,
                    operation,
                } => {
                    let state = self.session_state(session_id).unwrap_or(SessionState::Released);
                    self.notify(session_id, state, operation);
                }
            }
        }
    }

    fn log_failure(&self, what: &str, session_id: u32, result: Result<()>) {
        if let Err(e) = result {
            tracing::error!(session_id, sink = %self.sink_info.device_name, error = %e, "{what} failed");
        }
    }
}

impl Engine for RendererState {
    type Command = RendererCommand;

    fn handle(&mut self, cmd: RendererCommand) {
        match cmd {
            RendererCommand::CreateStream(stream) => {
                let id = stream.session_id;
                let ret = self.create_stream(stream);
                self.log_failure("create stream", id, ret);
            }
            RendererCommand::DestroyStream(id) => {
                let ret = self.destroy_stream(id);
                self.log_failure("destroy stream", id, ret);
            }
            RendererCommand::Start(id) => {
                let ret = self.start(id);
                self.log_failure("start", id, ret);
            }
            RendererCommand::Pause(id) => {
                let ret = self.pause_or_stop(id, Operation::Paused);
                self.log_failure("pause", id, ret);
            }
            RendererCommand::Stop(id) => {
                let ret = self.pause_or_stop(id, Operation::Stopped);
                self.log_failure("stop", id, ret);
            }
            RendererCommand::Flush(id) => {
                let ret = self.flush(id);
                self.log_failure("flush", id, ret);
            }
            RendererCommand::Drain(id) => {
                let ret = self.drain(id);
                self.log_failure("drain", id, ret);
            }
            RendererCommand::RegisterWriteCallback(id, callback) => match self.sink_input_mut(id) {
                Some(node) => node.register_write_callback(callback),
                None => self.log_failure("register write callback", id, Err(HpaeError::InvalidOperation)),
            },
            RendererCommand::SetClientVolume(id, volume) => match self.gain_mut(id) {
                Some(gain) => gain.set_client_volume(volume),
                None => self.log_failure("set client volume", id, Err(HpaeError::InvalidOperation)),
            },
            RendererCommand::SetEffectMode(id, mode) => {
                let ret = self.set_effect_mode(id, mode);
                self.log_failure("set effect mode", id, ret);
            }
            RendererCommand::SinkInputInfo(id, reply) => {
                let _ = reply.send(self.sink_input_info(id));
            }
            RendererCommand::MoveOut(id, reply) => {
                let _ = reply.send(self.move_out(id));
            }
            RendererCommand::MoveIn(moved) => {
                let id = moved.stream.session_id;
                let ret = self.move_in(*moved);
                self.log_failure("move in", id, ret);
            }
        }
    }

    fn is_running(&self) -> bool {
        self.sink_state() == StreamManagerState::Running && self.any_connected()
    }

    fn process(&mut self) {
        self.pipeline.process();
        self.dispatch_events();
    }

    fn idle_timeout(&self) -> Option<Duration> {
        (self.sink_state() == StreamManagerState::Running)
            .then(|| self.ctx.settings.pa_power_policy().close_after)
    }

    fn on_idle_timeout(&mut self) {
        if self.any_connected() {
            return;
        }
        let name = self.sink_info.device_name.clone();
        if let Some(control) = self.control_mut() {
            match control.stop() {
                Ok(()) => tracing::info!(sink = %name, "idle render sink stopped"),
                Err(e) => tracing::warn!(sink = %name, error = %e, "idle render sink stop failed"),
            }
        }
    }
}

impl Drop for RendererState {
    fn drop(&mut self) {
        self.close_device();
    }
}

/// Handle to the render pipeline of one sink.
///
/// Cheap to share behind an `Arc`. Session operations fail with
/// `InvalidOperation` while the manager is not initialized.
pub struct RendererManager {
    port_id: u32,
    ctx: ManagerContext,
    sink_info: Mutex<SinkInfo>,
    worker: Mutex<Option<Worker<RendererState>>>,
    parked: Mutex<Vec<MovedSinkInput>>,
}

impl RendererManager {
    /// Manager for the sink described by `sink_info`. Nothing is opened
    /// until [`init`](Self::init).
    pub fn new(port_id: u32, sink_info: SinkInfo, ctx: ManagerContext) -> Self {
        Self {
            port_id,
            ctx,
            sink_info: Mutex::new(sink_info),
            worker: Mutex::new(None),
            parked: Mutex::new(Vec::new()),
        }
    }

    /// Port id assigned by the engine manager.
    pub fn port_id(&self) -> u32 {
        self.port_id
    }

    /// Current sink description.
    pub fn sink_info(&self) -> SinkInfo {
        self.sink_info.lock().clone()
    }

    /// Opens the sink and starts the processing thread.
    ///
    /// Sessions parked by [`deinit`](Self::deinit) are restored; the ones
    /// that were running are reconnected.
    pub fn init(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            tracing::warn!(port_id = self.port_id, "renderer already initialized");
            return Ok(());
        }
        let sink_info = self.sink_info();
        let mut state = match RendererState::open(sink_info.clone(), self.ctx.clone()) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(sink = %sink_info.device_name, error = %e, "renderer init failed");
                self.ctx.registry.notify_init_device(&sink_info.device_name, false);
                return Err(e);
            }
        };
        for moved in self.parked.lock().drain(..) {
            let id = moved.stream.session_id;
            let ret = state.move_in(moved);
            state.log_failure("restore", id, ret);
        }
        let name = format!("renderer-{}", sink_info.device_name);
        *worker = Some(Worker::spawn(&name, state, self.ctx.settings.queue_depth)?);
        tracing::info!(port_id = self.port_id, sink = %sink_info.device_name, "renderer initialized");
        self.ctx.registry.notify_init_device(&sink_info.device_name, true);
        Ok(())
    }

    /// Stops the thread and closes the sink, keeping the sessions for a
    /// later [`init`](Self::init).
    pub fn deinit(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Err(HpaeError::NotInited);
        };
        let mut state = worker.stop().ok_or(HpaeError::IllegalState)?;
        let parked = state.park();
        tracing::info!(port_id = self.port_id, sessions = parked.len(), "renderer deinitialized");
        self.parked.lock().extend(parked);
        Ok(())
    }

    /// Replaces the sink description and initializes again.
    pub fn reload(&self, sink_info: SinkInfo) -> Result<()> {
        if self.is_init() {
            self.deinit()?;
        }
        *self.sink_info.lock() = sink_info;
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

    fn send(&self, cmd: RendererCommand) -> Result<()> {
        match self.worker.lock().as_ref() {
            Some(worker) => worker.send(cmd),
            None => {
                tracing::error!(port_id = self.port_id, "renderer not initialized");
                Err(HpaeError::InvalidOperation)
            }
        }
    }

    /// Creates a render session in the `Prepared` state.
    pub fn create_stream(&self, stream: StreamInfo) -> Result<()> {
        if stream.channels == 0 || stream.sample_rate == 0 {
            return Err(HpaeError::invalid_param(format!(
                "session {}: {} channels at {} Hz",
                stream.session_id, stream.channels, stream.sample_rate
            )));
        }
        self.send(RendererCommand::CreateStream(stream))
    }

    /// Removes a session; later lookups fail with `InvalidOperation`.
    pub fn destroy_stream(&self, session_id: u32) -> Result<()> {
        self.send(RendererCommand::DestroyStream(session_id))
    }

    /// Connects a session and fades it in.
    pub fn start(&self, session_id: u32) -> Result<()> {
        self.send(RendererCommand::Start(session_id))
    }

    /// Fades a session out and disconnects it.
    pub fn pause(&self, session_id: u32) -> Result<()> {
        self.send(RendererCommand::Pause(session_id))
    }

    /// Drops a session's buffered history.
    pub fn flush(&self, session_id: u32) -> Result<()> {
        self.send(RendererCommand::Flush(session_id))
    }

    /// Reports `Drained` once the client runs dry.
    pub fn drain(&self, session_id: u32) -> Result<()> {
        self.send(RendererCommand::Drain(session_id))
    }

    /// Fades a session out, disconnects it and reports `Stopped`.
    pub fn stop(&self, session_id: u32) -> Result<()> {
        self.send(RendererCommand::Stop(session_id))
    }

    /// Destroys a session.
    pub fn release(&self, session_id: u32) -> Result<()> {
        self.destroy_stream(session_id)
    }

    /// Registers the client producer of a session.
    pub fn register_write_callback(&self, session_id: u32, callback: Weak<dyn WriteCallback>) -> Result<()> {
        self.send(RendererCommand::RegisterWriteCallback(session_id, callback))
    }

    /// Sets a session's client volume, clamped to `[0, 1]`.
    pub fn set_client_volume(&self, session_id: u32, volume: f32) -> Result<()> {
        self.send(RendererCommand::SetClientVolume(session_id, volume))
    }

    /// Moves a session between the scene cluster and the effect-less one.
    pub fn set_audio_effect_mode(&self, session_id: u32, mode: EffectMode) -> Result<()> {
        self.send(RendererCommand::SetEffectMode(session_id, mode))
    }

    /// Snapshot of a session; `InvalidOperation` if it does not exist.
    pub fn get_sink_input_info(&self, session_id: u32) -> Result<SinkInputInfo> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(RendererCommand::SinkInputInfo(session_id, tx))?;
        rx.recv_timeout(REPLY_TIMEOUT).map_err(|_| HpaeError::IllegalState)?
    }

    /// Detaches a session for a move to another sink.
    pub fn move_out(&self, session_id: u32) -> Result<MovedSinkInput> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(RendererCommand::MoveOut(session_id, tx))?;
        rx.recv_timeout(REPLY_TIMEOUT).map_err(|_| HpaeError::IllegalState)?
    }

    /// Attaches a session detached from another sink.
    pub fn move_in(&self, moved: MovedSinkInput) -> Result<()> {
        self.send(RendererCommand::MoveIn(Box::new(moved)))
    }
}
