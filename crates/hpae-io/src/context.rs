//! Device context: id allocation and device instances.
//!
//! One [`DeviceContext`] is created at startup and shared as an `Arc` by every
//! manager and node that talks to hardware. A device is identified by its
//! `(class, network id)` pair; asking for the same pair twice yields the same
//! id and the same instance, reference counted until the last
//! [`release_id`](DeviceContext::release_id).
//!
//! Instances come from factories registered per device class. The built-in
//! set covers `"file_io"` (WAV files) and `"null"`; any other class falls
//! back to the null devices unless a factory was registered for it.

use std::collections::HashMap;
use std::sync::Arc;

use hpae_core::{Clock, SystemClock};
use parking_lot::Mutex;

use crate::file::{FileCaptureSource, FileRenderSink};
use crate::null::{NullCaptureSource, NullRenderSink};
use crate::sink::RenderSink;
use crate::source::CaptureSource;

/// Network id of local devices.
pub const LOCAL_NETWORK_ID: &str = "LocalDevice";

/// Device class of WAV file devices.
pub const FILE_IO_CLASS: &str = "file_io";

/// Device class of null devices.
pub const NULL_CLASS: &str = "null";

/// Builds a render sink for a device class and network id.
pub type RenderFactory = Arc<dyn Fn(&str, &str) -> Arc<dyn RenderSink> + Send + Sync>;

/// Builds a capture source for a device class and network id.
pub type CaptureFactory = Arc<dyn Fn(&str, &str) -> Arc<dyn CaptureSource> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Direction {
    Render,
    Capture,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct DeviceKey {
    direction: Direction,
    class: String,
    net_id: String,
}

enum Device {
    Render(Arc<dyn RenderSink>),
    Capture(Arc<dyn CaptureSource>),
}

struct Entry {
    key: DeviceKey,
    refs: usize,
    device: Option<Device>,
}

#[derive(Default)]
struct Inner {
    render_factories: HashMap<String, RenderFactory>,
    capture_factories: HashMap<String, CaptureFactory>,
    fallback_render: Option<RenderFactory>,
    fallback_capture: Option<CaptureFactory>,
    entries: HashMap<u32, Entry>,
    next_id: u32,
}

/// Registry of device factories and live device instances.
pub struct DeviceContext {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl DeviceContext {
    /// Empty context on the system clock; no factories registered.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty context on `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
            clock,
        }
    }

    /// Context with the `"file_io"` and `"null"` factories, falling back to
    /// null devices for other classes.
    pub fn with_builtin(clock: Arc<dyn Clock>) -> Self {
        let ctx = Self::with_clock(clock);
        ctx.register_render_factory(FILE_IO_CLASS, render_factory::<FileRenderSink>());
        ctx.register_capture_factory(FILE_IO_CLASS, capture_factory::<FileCaptureSource>());
        ctx.register_render_factory(NULL_CLASS, render_factory::<NullRenderSink>());
        ctx.register_capture_factory(NULL_CLASS, capture_factory::<NullCaptureSource>());
        {
            let mut inner = ctx.inner.lock();
            inner.fallback_render = Some(render_factory::<NullRenderSink>());
            inner.fallback_capture = Some(capture_factory::<NullCaptureSource>());
        }
        ctx
    }

    /// Clock shared by the nodes built on this context.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Registers (or replaces) the render factory for `class`.
    pub fn register_render_factory(&self, class: &str, factory: RenderFactory) {
        self.inner
            .lock()
            .render_factories
            .insert(class.to_owned(), factory);
    }

    /// Registers (or replaces) the capture factory for `class`.
    pub fn register_capture_factory(&self, class: &str, factory: CaptureFactory) {
        self.inner
            .lock()
            .capture_factories
            .insert(class.to_owned(), factory);
    }

    /// Registers a fixed render sink for `class`; every id of that class
    /// resolves to this instance.
    pub fn register_render_sink(&self, class: &str, sink: Arc<dyn RenderSink>) {
        self.register_render_factory(
            class,
            Arc::new(move |_: &str, _: &str| Arc::clone(&sink)),
        );
    }

    /// Registers a fixed capture source for `class`.
    pub fn register_capture_source(&self, class: &str, source: Arc<dyn CaptureSource>) {
        self.register_capture_factory(
            class,
            Arc::new(move |_: &str, _: &str| Arc::clone(&source)),
        );
    }

    /// Id of the render device `(class, net_id)`, taking a reference.
    ///
    /// An empty `net_id` means the local device.
    pub fn get_render_id(&self, class: &str, net_id: &str) -> u32 {
        self.acquire(Direction::Render, class, net_id)
    }

    /// Id of the capture device `(class, net_id)`, taking a reference.
    pub fn get_capture_id(&self, class: &str, net_id: &str) -> u32 {
        self.acquire(Direction::Capture, class, net_id)
    }

    /// Render sink behind `id`, created on first use.
    ///
    /// `None` if the id is unknown, names a capture device, or no factory
    /// serves its class.
    pub fn render_sink(&self, id: u32) -> Option<Arc<dyn RenderSink>> {
        let mut inner = self.inner.lock();
        let (class, net_id) = match inner.entries.get(&id)? {
            Entry {
                device: Some(Device::Render(sink)),
                ..
            } => return Some(Arc::clone(sink)),
            Entry { device: Some(_), .. } => return None,
            Entry { key, .. } if key.direction == Direction::Render => {
                (key.class.clone(), key.net_id.clone())
            }
            _ => return None,
        };
        let factory = inner
            .render_factories
            .get(&class)
            .or(inner.fallback_render.as_ref())
            .cloned()?;
        let sink = factory(class.as_str(), net_id.as_str());
        if let Some(entry) = inner.entries.get_mut(&id) {
            entry.device = Some(Device::Render(Arc::clone(&sink)));
        }
        tracing::debug!(id, class = %class, net_id = %net_id, "render sink created");
        Some(sink)
    }

    /// Capture source behind `id`, created on first use.
    pub fn capture_source(&self, id: u32) -> Option<Arc<dyn CaptureSource>> {
        let mut inner = self.inner.lock();
        let (class, net_id) = match inner.entries.get(&id)? {
            Entry {
                device: Some(Device::Capture(source)),
                ..
            } => return Some(Arc::clone(source)),
            Entry { device: Some(_), .. } => return None,
            Entry { key, .. } if key.direction == Direction::Capture => {
                (key.class.clone(), key.net_id.clone())
            }
            _ => return None,
        };
        let factory = inner
            .capture_factories
            .get(&class)
            .or(inner.fallback_capture.as_ref())
            .cloned()?;
        let source = factory(class.as_str(), net_id.as_str());
        if let Some(entry) = inner.entries.get_mut(&id) {
            entry.device = Some(Device::Capture(Arc::clone(&source)));
        }
        tracing::debug!(id, class = %class, net_id = %net_id, "capture source created");
        Some(source)
    }

    /// Drops one reference to `id`; the device instance is released with
    /// the last one.
    pub fn release_id(&self, id: u32) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            tracing::warn!(id, "release of unknown device id");
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            inner.entries.remove(&id);
            tracing::debug!(id, "device id released");
        }
    }

    /// Number of live device ids.
    pub fn live_ids(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn acquire(&self, direction: Direction, class: &str, net_id: &str) -> u32 {
        let key = DeviceKey {
            direction,
            class: class.to_owned(),
            net_id: if net_id.is_empty() {
                LOCAL_NETWORK_ID.to_owned()
            } else {
                net_id.to_owned()
            },
        };
        let mut inner = self.inner.lock();
        if let Some((&id, entry)) = inner.entries.iter_mut().find(|(_, e)| e.key == key) {
            entry.refs += 1;
            return id;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                key,
                refs: 1,
                device: None,
            },
        );
        id
    }
}

fn render_factory<S: RenderSink + Default + 'static>() -> RenderFactory {
    Arc::new(|_: &str, _: &str| -> Arc<dyn RenderSink> { Arc::new(S::default()) })
}

fn capture_factory<S: CaptureSource + Default + 'static>() -> CaptureFactory {
    Arc::new(|_: &str, _: &str| -> Arc<dyn CaptureSource> { Arc::new(S::default()) })
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new()
    }
}
