//! Status fan-out: nodes to managers, managers to listeners.
//!
//! Nodes report through [`StatusChannel`], which forwards every report onto
//! a channel the owning manager drains after each tick. The manager attaches
//! the session state and publishes the result through a
//! [`CallbackRegistry`] to every registered [`StreamStatusListener`].

use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender};
use hpae_core::{NodeStatusCallback, Operation, SessionState, StreamClass};
use parking_lot::Mutex;

/// Receives session status changes from the engine.
pub trait StreamStatusListener: Send + Sync {
    /// A session of `class` changed state because of `operation`.
    fn on_status_update(&self, class: StreamClass, session_id: u32, state: SessionState, operation: Operation);

    /// A port finished opening; `ok` is `false` if its device failed to init.
    fn on_init_device(&self, _name: &str, _ok: bool) {}
}

/// Weakly held listeners.
///
/// Registration and removal may happen from any thread. Notification
/// iterates a snapshot taken under the lock, so listeners may register or
/// unregister from inside a callback. Dropped listeners are pruned.
#[derive(Default)]
pub struct CallbackRegistry {
    listeners: Mutex<Vec<Weak<dyn StreamStatusListener>>>,
}

impl CallbackRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn add(&self, listener: Weak<dyn StreamStatusListener>) {
        self.listeners.lock().push(listener);
    }

    /// Removes a listener; returns whether it was registered.
    pub fn remove(&self, listener: &Weak<dyn StreamStatusListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Weak::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().iter().filter(|l| l.strong_count() > 0).count()
    }

    /// Whether no live listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publishes a status change.
    pub fn notify(&self, class: StreamClass, session_id: u32, state: SessionState, operation: Operation) {
        tracing::debug!(?class, session_id, ?state, %operation, "status update");
        for listener in self.snapshot() {
            listener.on_status_update(class, session_id, state, operation);
        }
    }

    /// Publishes the outcome of a device init.
    pub fn notify_init_device(&self, name: &str, ok: bool) {
        for listener in self.snapshot() {
            listener.on_init_device(name, ok);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn StreamStatusListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

/// A report raised by a node during a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeEvent {
    /// `on_node_status_update`.
    Status { session_id: u32, operation: Operation },
    /// `on_fade_done`.
    FadeDone { session_id: u32, operation: Operation },
}

/// Node status callback that queues reports for the manager thread.
pub(crate) struct StatusChannel {
    tx: Sender<NodeEvent>,
}

impl StatusChannel {
    pub(crate) fn new() -> (Arc<Self>, Receiver<NodeEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(Self { tx }), rx)
    }

    fn push(&self, event: NodeEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!(?event, "status receiver dropped");
        }
    }
}

impl NodeStatusCallback for StatusChannel {
    fn on_node_status_update(&self, session_id: u32, operation: Operation) {
        self.push(NodeEvent::Status { session_id, operation });
    }

    fn on_fade_done(&self, session_id: u32, operation: Operation) {
        self.push(NodeEvent::FadeDone { session_id, operation });
    }
}
