//! Processing thread shared by the renderer and capturer managers.
//!
//! A [`Worker`] owns one [`Engine`] on a dedicated thread. Callers post
//! commands through a bounded channel; the thread drains them between
//! processing ticks and blocks on the channel while the engine is idle, so
//! node and session state only ever has one writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use hpae_core::{HpaeError, Result};

/// State machine driven by a [`Worker`] thread.
pub(crate) trait Engine: Send + 'static {
    /// Control message type.
    type Command: Send + 'static;

    /// Applies one command.
    fn handle(&mut self, cmd: Self::Command);

    /// Whether [`process`](Self::process) should be called this iteration.
    fn is_running(&self) -> bool;

    /// Runs one processing tick.
    fn process(&mut self);

    /// How long an idle engine waits for a command before
    /// [`on_idle_timeout`](Self::on_idle_timeout) fires.
    fn idle_timeout(&self) -> Option<Duration> {
        None
    }

    /// Called when an idle wait timed out.
    fn on_idle_timeout(&mut self) {}
}

enum Message<C> {
    Command(C),
    Quit,
}

/// Handle to an engine running on its own thread.
pub(crate) struct Worker<E: Engine> {
    tx: Sender<Message<E::Command>>,
    pending: Arc<AtomicUsize>,
    handle: Option<JoinHandle<E>>,
}

impl<E: Engine> Worker<E> {
    /// Moves `engine` onto a new thread named `name` with a command queue
    /// of `depth` entries.
    pub(crate) fn spawn(name: &str, engine: E, depth: usize) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(depth.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let thread_pending = Arc::clone(&pending);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run(engine, &rx, &thread_pending))?;
        tracing::debug!(thread = name, depth, "worker started");
        Ok(Self {
            tx,
            pending,
            handle: Some(handle),
        })
    }

    /// Posts a command. Fails with `IllegalState` once the thread is gone.
    pub(crate) fn send(&self, cmd: E::Command) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Message::Command(cmd)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("worker thread is gone");
            return Err(HpaeError::IllegalState);
        }
        Ok(())
    }

    /// Whether posted commands are still waiting to be handled.
    pub(crate) fn is_msg_processing(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Stops the thread after the commands already queued and returns the
    /// engine. `None` if the thread panicked.
    pub(crate) fn stop(mut self) -> Option<E> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<E> {
        let handle = self.handle.take()?;
        let _ = self.tx.send(Message::Quit);
        match handle.join() {
            Ok(engine) => Some(engine),
            Err(_) => {
                tracing::error!("worker thread panicked");
                None
            }
        }
    }
}

impl<E: Engine> Drop for Worker<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<E: Engine>(mut engine: E, rx: &Receiver<Message<E::Command>>, pending: &AtomicUsize) -> E {
    loop {
        if engine.is_running() {
            loop {
                match rx.try_recv() {
                    Ok(Message::Command(cmd)) => {
                        engine.handle(cmd);
                        pending.fetch_sub(1, Ordering::SeqCst);
                    }
                    Ok(Message::Quit) | Err(TryRecvError::Disconnected) => return engine,
                    Err(TryRecvError::Empty) => break,
                }
            }
            if engine.is_running() {
                engine.process();
            }
            continue;
        }

        let msg = match engine.idle_timeout() {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(msg) => msg,
                Err(RecvTimeoutError::Timeout) => {
                    engine.on_idle_timeout();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return engine,
            },
            None => match rx.recv() {
                Ok(msg) => msg,
                Err(_) => return engine,
            },
        };
        match msg {
            Message::Command(cmd) => {
                engine.handle(cmd);
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            Message::Quit => return engine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default)]
    struct Counter {
        total: i64,
        running: bool,
        ticks: u64,
        timeouts: u32,
    }

    enum Cmd {
        Add(i64),
        Run(bool),
        Slow,
    }

    impl Engine for Counter {
        type Command = Cmd;

        fn handle(&mut self, cmd: Cmd) {
            match cmd {
                Cmd::Add(n) => self.total += n,
                Cmd::Run(on) => self.running = on,
                Cmd::Slow => thread::sleep(Duration::from_millis(50)),
            }
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn process(&mut self) {
            self.ticks += 1;
            thread::sleep(Duration::from_millis(1));
        }

        fn idle_timeout(&self) -> Option<Duration> {
            (self.timeouts < 2).then_some(Duration::from_millis(5))
        }

        fn on_idle_timeout(&mut self) {
            self.timeouts += 1;
        }
    }

    fn wait_idle<E: Engine>(worker: &Worker<E>) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while worker.is_msg_processing() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn commands_apply_in_order() {
        let worker = Worker::spawn("test-worker", Counter::default(), 4).unwrap();
        for n in 1..=10 {
            worker.send(Cmd::Add(n)).unwrap();
        }
        let engine = worker.stop().unwrap();
        assert_eq!(engine.total, 55);
    }

    #[test]
    fn msg_processing_tracks_queue() {
        let worker = Worker::spawn("test-worker", Counter::default(), 4).unwrap();
        worker.send(Cmd::Slow).unwrap();
        assert!(worker.is_msg_processing());
        wait_idle(&worker);
        assert!(!worker.is_msg_processing());
    }

    #[test]
    fn processes_only_while_running() {
        let worker = Worker::spawn("test-worker", Counter::default(), 4).unwrap();
        worker.send(Cmd::Run(true)).unwrap();
        thread::sleep(Duration::from_millis(30));
        worker.send(Cmd::Run(false)).unwrap();
        wait_idle(&worker);
        let engine = worker.stop().unwrap();
        assert!(engine.ticks > 0);
        assert!(!engine.running);
    }

    #[test]
    fn idle_timeout_fires() {
        let worker = Worker::spawn("test-worker", Counter::default(), 4).unwrap();
        thread::sleep(Duration::from_millis(50));
        let engine = worker.stop().unwrap();
        assert_eq!(engine.timeouts, 2);
    }
}
