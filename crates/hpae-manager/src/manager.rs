//! Service-facing engine facade.
//!
//! [`HpaeManager`] owns one [`RendererManager`] per open sink and one
//! [`CapturerManager`] per open source, assigns port ids, remembers which
//! port each session lives on and forwards session operations to it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use hpae_config::{EngineConfig, EngineSettings, ModuleInfo};
use hpae_core::{EffectMode, HpaeError, Operation, Result, StreamClass, StreamInfo};
use hpae_effects::{EnhanceChainFactory, RenderEffectFactory};
use hpae_io::{DeviceContext, ReadCallback, WriteCallback};
use parking_lot::Mutex;

use crate::callback::StreamStatusListener;
use crate::capturer::CapturerManager;
use crate::context::ManagerContext;
use crate::renderer::RendererManager;
use crate::session::{SinkInputInfo, SourceOutputInfo};
use crate::soft_link::SoftLink;

#[derive(Clone)]
enum Port {
    Sink(Arc<RendererManager>),
    Source(Arc<CapturerManager>),
}

impl Port {
    fn class(&self) -> StreamClass {
        match self {
            Self::Sink(_) => StreamClass::Play,
            Self::Source(_) => StreamClass::Record,
        }
    }

    fn is_init(&self) -> bool {
        match self {
            Self::Sink(r) => r.is_init(),
            Self::Source(c) => c.is_init(),
        }
    }

    fn is_msg_processing(&self) -> bool {
        match self {
            Self::Sink(r) => r.is_msg_processing(),
            Self::Source(c) => c.is_msg_processing(),
        }
    }
}

#[derive(Default)]
struct Routing {
    ports: BTreeMap<u32, Port>,
    names: HashMap<String, u32>,
    next_port_id: u32,
    default_sink: Option<u32>,
    default_source: Option<u32>,
    sessions: HashMap<u32, (StreamClass, u32)>,
}

impl Routing {
    fn port_by_name(&self, name: &str, class: StreamClass) -> Result<(u32, &Port)> {
        let found = match (name.is_empty(), class) {
            (true, StreamClass::Play) => self.default_sink,
            (true, StreamClass::Record) => self.default_source,
            (false, _) => self.names.get(name).copied(),
        };
        let id = found.ok_or_else(|| HpaeError::invalid_param(format!("no {class:?} port named '{name}'")))?;
        let port = self.ports.get(&id).ok_or(HpaeError::InvalidOperation)?;
        if port.class() != class {
            return Err(HpaeError::invalid_param(format!("port '{name}' is not a {class:?} port")));
        }
        Ok((id, port))
    }

    fn session_port(&self, class: StreamClass, session_id: u32) -> Result<&Port> {
        match self.sessions.get(&session_id) {
            Some(&(c, port_id)) if c == class => self.ports.get(&port_id).ok_or(HpaeError::InvalidOperation),
            _ => {
                tracing::error!(?class, session_id, "unknown session");
                Err(HpaeError::InvalidOperation)
            }
        }
    }

    fn first_of(&self, class: StreamClass) -> Option<u32> {
        self.ports.iter().find(|(_, p)| p.class() == class).map(|(&id, _)| id)
    }
}

/// The engine.
///
/// All methods take `&self`; the manager can be shared between threads
/// behind an `Arc`. Operations on a session go to the port it was created
/// on (or moved to) and complete asynchronously on that port's thread,
/// reporting through the registered [`StreamStatusListener`]s.
pub struct HpaeManager {
    ctx: ManagerContext,
    inner: Mutex<Routing>,
}

impl HpaeManager {
    /// Engine over `device` with bypass effects.
    pub fn new(device: Arc<DeviceContext>, settings: EngineSettings) -> Self {
        Self {
            ctx: ManagerContext::new(device, settings),
            inner: Mutex::new(Routing::default()),
        }
    }

    /// Replaces the render effect factory used by ports opened afterwards.
    #[must_use]
    pub fn with_render_effects(mut self, factory: Arc<dyn RenderEffectFactory>) -> Self {
        self.ctx.render_effects = factory;
        self
    }

    /// Replaces the enhance chain factory used by ports opened afterwards.
    #[must_use]
    pub fn with_enhance_chains(mut self, factory: Arc<dyn EnhanceChainFactory>) -> Self {
        self.ctx.enhance = factory;
        self
    }

    /// Shared context handed to every port.
    pub fn context(&self) -> &ManagerContext {
        &self.ctx
    }

    /// Adds a status listener. It is held weakly.
    pub fn register_listener(&self, listener: Weak<dyn StreamStatusListener>) {
        self.ctx.registry.add(listener);
    }

    /// Removes a status listener.
    pub fn unregister_listener(&self, listener: &Weak<dyn StreamStatusListener>) -> bool {
        self.ctx.registry.remove(listener)
    }

    // --- ports ---

    /// Opens the sink or source `module` describes and returns its port id.
    ///
    /// Reopening a name that is already open returns the same id; if that
    /// port was deinitialized it is reloaded from `module`.
    pub fn open_audio_port(&self, module: &ModuleInfo) -> Result<u32> {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.names.get(&module.name) {
            let port = inner.ports.get(&id).ok_or(HpaeError::InvalidOperation)?;
            if !port.is_init() {
                tracing::info!(port_id = id, name = %module.name, "reloading port");
                match port {
                    Port::Sink(r) => r.reload(module.to_sink_info().map_err(config_err)?)?,
                    Port::Source(c) => c.reload(module.to_source_info().map_err(config_err)?)?,
                }
            }
            return Ok(id);
        }

        let id = inner.next_port_id;
        let port = if module.is_source() {
            let info = module.to_source_info().map_err(config_err)?;
            let capturer = Arc::new(CapturerManager::new(id, info, self.ctx.clone()));
            capturer.init()?;
            Port::Source(capturer)
        } else {
            let info = module.to_sink_info().map_err(config_err)?;
            let renderer = Arc::new(RendererManager::new(id, info, self.ctx.clone()));
            renderer.init()?;
            Port::Sink(renderer)
        };

        let default = match port.class() {
            StreamClass::Play => &mut inner.default_sink,
            StreamClass::Record => &mut inner.default_source,
        };
        if default.is_none() {
            *default = Some(id);
        }
        tracing::info!(port_id = id, name = %module.name, class = %module.class_name, "port opened");
        inner.next_port_id += 1;
        inner.names.insert(module.name.clone(), id);
        inner.ports.insert(id, port);
        Ok(id)
    }

    /// Opens every sink and then every source in `config`.
    pub fn open_ports(&self, config: &EngineConfig) -> Result<Vec<u32>> {
        config.modules().map(|m| self.open_audio_port(m)).collect()
    }

    /// Closes a port. Its sessions are dropped; a closed default is replaced
    /// by the lowest remaining port of the same kind.
    pub fn close_audio_port(&self, port_id: u32) -> Result<()> {
        let port = {
            let mut inner = self.inner.lock();
            let port = inner.ports.remove(&port_id).ok_or_else(|| {
                HpaeError::invalid_param(format!("port {port_id} is not open"))
            })?;
            inner.names.retain(|_, &mut id| id != port_id);
            inner.sessions.retain(|_, &mut (_, id)| id != port_id);
            if inner.default_sink == Some(port_id) {
                inner.default_sink = inner.first_of(StreamClass::Play);
            }
            if inner.default_source == Some(port_id) {
                inner.default_source = inner.first_of(StreamClass::Record);
            }
            port
        };
        let ret = match &port {
            Port::Sink(r) if r.is_init() => r.deinit(),
            Port::Source(c) if c.is_init() => c.deinit(),
            _ => Ok(()),
        };
        tracing::info!(port_id, "port closed");
        ret
    }

    /// Closes every port.
    pub fn deinit(&self) {
        let ids: Vec<u32> = self.inner.lock().ports.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.close_audio_port(id) {
                tracing::warn!(port_id = id, error = %e, "close port failed");
            }
        }
    }

    /// Port id of an open sink or source.
    pub fn port_id(&self, name: &str) -> Option<u32> {
        self.inner.lock().names.get(name).copied()
    }

    /// Makes `name` the sink for streams that name no device.
    pub fn set_default_sink(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let (id, _) = inner.port_by_name(name, StreamClass::Play)?;
        inner.default_sink = Some(id);
        Ok(())
    }

    /// Makes `name` the source for streams that name no device.
    pub fn set_default_source(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let (id, _) = inner.port_by_name(name, StreamClass::Record)?;
        inner.default_source = Some(id);
        Ok(())
    }

    /// Renderer of the sink `name`, or of the default sink if empty.
    pub fn renderer(&self, name: &str) -> Option<Arc<RendererManager>> {
        match self.inner.lock().port_by_name(name, StreamClass::Play) {
            Ok((_, Port::Sink(r))) => Some(Arc::clone(r)),
            _ => None,
        }
    }

    /// Capturer of the source `name`, or of the default source if empty.
    pub fn capturer(&self, name: &str) -> Option<Arc<CapturerManager>> {
        match self.inner.lock().port_by_name(name, StreamClass::Record) {
            Ok((_, Port::Source(c))) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    fn renderer_of(&self, session_id: u32) -> Result<Arc<RendererManager>> {
        match self.inner.lock().session_port(StreamClass::Play, session_id)? {
            Port::Sink(r) => Ok(Arc::clone(r)),
            Port::Source(_) => Err(HpaeError::InvalidOperation),
        }
    }

    fn capturer_of(&self, session_id: u32) -> Result<Arc<CapturerManager>> {
        match self.inner.lock().session_port(StreamClass::Record, session_id)? {
            Port::Source(c) => Ok(Arc::clone(c)),
            Port::Sink(_) => Err(HpaeError::InvalidOperation),
        }
    }

    // --- sessions ---

    /// Creates a session on the port named by `stream.device_name`, or on
    /// the default port of the stream's class.
    pub fn create_stream(&self, stream: StreamInfo) -> Result<()> {
        let mut inner = self.inner.lock();
        let session_id = stream.session_id;
        if inner.sessions.contains_key(&session_id) {
            tracing::error!(session_id, "session id already in use");
            return Err(HpaeError::InvalidOperation);
        }
        let (port_id, port) = inner.port_by_name(&stream.device_name, stream.stream_class)?;
        match port {
            Port::Sink(r) => r.create_stream(stream.clone())?,
            Port::Source(c) => c.create_stream(stream.clone())?,
        }
        tracing::debug!(session_id, port_id, class = ?stream.stream_class, "session routed");
        inner.sessions.insert(session_id, (stream.stream_class, port_id));
        Ok(())
    }

    /// Destroys a session.
    pub fn destroy_stream(&self, class: StreamClass, session_id: u32) -> Result<()> {
        let ret = match class {
            StreamClass::Play => self.renderer_of(session_id)?.destroy_stream(session_id),
            StreamClass::Record => self.capturer_of(session_id)?.destroy_stream(session_id),
        };
        self.inner.lock().sessions.remove(&session_id);
        ret
    }

    /// Starts a session.
    pub fn start(&self, class: StreamClass, session_id: u32) -> Result<()> {
        match class {
            StreamClass::Play => self.renderer_of(session_id)?.start(session_id),
            StreamClass::Record => self.capturer_of(session_id)?.start(session_id),
        }
    }

    /// Pauses a session.
    pub fn pause(&self, class: StreamClass, session_id: u32) -> Result<()> {
        match class {
            StreamClass::Play => self.renderer_of(session_id)?.pause(session_id),
            StreamClass::Record => self.capturer_of(session_id)?.pause(session_id),
        }
    }

    /// Discards a play session's buffered data.
    pub fn flush(&self, class: StreamClass, session_id: u32) -> Result<()> {
        match class {
            StreamClass::Play => self.renderer_of(session_id)?.flush(session_id),
            StreamClass::Record => Err(HpaeError::NotSupported),
        }
    }

    /// Plays out a play session's remaining data.
    pub fn drain(&self, class: StreamClass, session_id: u32) -> Result<()> {
        match class {
            StreamClass::Play => self.renderer_of(session_id)?.drain(session_id),
            StreamClass::Record => Err(HpaeError::NotSupported),
        }
    }

    /// Stops a session.
    pub fn stop(&self, class: StreamClass, session_id: u32) -> Result<()> {
        match class {
            StreamClass::Play => self.renderer_of(session_id)?.stop(session_id),
            StreamClass::Record => self.capturer_of(session_id)?.stop(session_id),
        }
    }

    /// Releases a session.
    pub fn release(&self, class: StreamClass, session_id: u32) -> Result<()> {
        self.destroy_stream(class, session_id)
    }

    /// Registers the producer of a play session.
    pub fn register_write_callback(&self, session_id: u32, callback: Weak<dyn WriteCallback>) -> Result<()> {
        self.renderer_of(session_id)?.register_write_callback(session_id, callback)
    }

    /// Registers the consumer of a record session.
    pub fn register_read_callback(&self, session_id: u32, callback: Weak<dyn ReadCallback>) -> Result<()> {
        self.capturer_of(session_id)?.register_read_callback(session_id, callback)
    }

    /// Sets a play session's client volume.
    pub fn set_client_volume(&self, session_id: u32, volume: f32) -> Result<()> {
        self.renderer_of(session_id)?.set_client_volume(session_id, volume)
    }

    /// Sets a play session's render effect mode.
    pub fn set_audio_effect_mode(&self, session_id: u32, mode: EffectMode) -> Result<()> {
        self.renderer_of(session_id)?.set_audio_effect_mode(session_id, mode)
    }

    /// Snapshot of a play session.
    pub fn get_sink_input_info(&self, session_id: u32) -> Result<SinkInputInfo> {
        self.renderer_of(session_id)?.get_sink_input_info(session_id)
    }

    /// Snapshot of a record session.
    pub fn get_source_output_info(&self, session_id: u32) -> Result<SourceOutputInfo> {
        self.capturer_of(session_id)?.get_source_output_info(session_id)
    }

    /// Mutes or unmutes the capture device of a source.
    pub fn set_source_mute(&self, name: &str, mute: bool) -> Result<()> {
        self.capturer(name)
            .ok_or_else(|| HpaeError::invalid_param(format!("no source named '{name}'")))?
            .set_mute(mute)
    }

    /// Moves a play session to the sink `sink_name`, keeping its state.
    pub fn move_sink_input(&self, session_id: u32, sink_name: &str) -> Result<()> {
        let from = self.renderer_of(session_id)?;
        let (to_id, to) = {
            let inner = self.inner.lock();
            match inner.port_by_name(sink_name, StreamClass::Play)? {
                (id, Port::Sink(r)) => (id, Arc::clone(r)),
                (_, Port::Source(_)) => return Err(HpaeError::InvalidOperation),
            }
        };
        if from.port_id() == to_id {
            return Ok(());
        }
        let moved = from.move_out(session_id)?;
        let state = moved.state;
        to.move_in(moved)?;
        self.inner
            .lock()
            .sessions
            .insert(session_id, (StreamClass::Play, to_id));
        tracing::info!(session_id, from = from.port_id(), to = to_id, "sink input moved");
        self.ctx
            .registry
            .notify(StreamClass::Play, session_id, state, Operation::Moved);
        Ok(())
    }

    /// Links the source port `source_port_id` to the sink port
    /// `sink_port_id`. The link starts in the `New` state.
    pub fn create_soft_link(&self, sink_port_id: u32, source_port_id: u32) -> Result<Arc<SoftLink>> {
        let (renderer, capturer) = {
            let inner = self.inner.lock();
            match (inner.ports.get(&sink_port_id), inner.ports.get(&source_port_id)) {
                (Some(Port::Sink(r)), Some(Port::Source(c))) => (Arc::clone(r), Arc::clone(c)),
                _ => {
                    tracing::error!(sink_port_id, source_port_id, "soft link needs a sink and a source");
                    return Err(HpaeError::invalid_param(format!(
                        "ports {sink_port_id} and {source_port_id} are not a sink and a source"
                    )));
                }
            }
        };
        Ok(Arc::new(SoftLink::new(renderer, capturer)?))
    }

    /// Whether any port still has queued commands.
    pub fn is_msg_processing(&self) -> bool {
        self.inner.lock().ports.values().any(Port::is_msg_processing)
    }
}

impl Drop for HpaeManager {
    fn drop(&mut self) {
        self.deinit();
    }
}

fn config_err(e: hpae_config::ConfigError) -> HpaeError {
    HpaeError::invalid_param(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_falls_back_to_first_of_class() {
        let routing = Routing::default();
        assert_eq!(routing.first_of(StreamClass::Play), None);
        assert!(routing.session_port(StreamClass::Play, 1).is_err());
        assert!(routing.port_by_name("", StreamClass::Record).is_err());
    }
}
