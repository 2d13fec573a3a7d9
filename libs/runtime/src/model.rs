//! Models
//!
//! A model is an addressable actor: an id, an inbox of signals, hook lists
//! for the arrival and dequeue paths, and a back-reference to the container
//! that schedules its loop. Host types embed a [`ModelCore`] and implement
//! [`Model`] by returning it; everything the framework needs flows through
//! the core.
//!
//! The inbox is a concurrent FIFO guarded by a read/write lock: senders
//! enqueue under the read side, and only the idle-time compaction sweep,
//! which drains, filters expired signals and re-inserts the rest, takes
//! the write side.

use crate::container::Container;
use crate::provider::{ModelError, Provider};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use spindle_codec::{Signal, SignalTarget};
use spindle_types::ModelId;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace};

/// Hook fired on the sender's thread as a signal arrives.
pub type ReceiveHook = Arc<dyn Fn(&ModelCore, &mut Signal) + Send + Sync>;

/// Hook fired on the model's loop thread as a signal is dequeued.
pub type ReadHook = Arc<dyn Fn(&ModelCore, &mut Signal) -> anyhow::Result<()> + Send + Sync>;

/// Hook ticked by the model's loop.
pub type LoopHook = Arc<dyn Fn(&ModelCore) + Send + Sync>;

/// An addressable actor hosted by the runtime.
///
/// Implementors embed a [`ModelCore`] and hand it back here; subscribing to
/// the core's hooks is how a model reacts to traffic.
pub trait Model: Send + Sync + 'static {
    fn core(&self) -> &ModelCore;
}

/// The framework-owned half of every model.
pub struct ModelCore {
    id: ModelId,
    provider: Weak<Provider>,
    inbox_tx: Sender<Signal>,
    inbox_rx: Receiver<Signal>,
    inbox_guard: RwLock<()>,
    closing: AtomicBool,
    container: RwLock<Option<Arc<dyn Container>>>,
    receive_hooks: RwLock<Vec<ReceiveHook>>,
    read_hooks: RwLock<Vec<ReadHook>>,
    loop_hooks: RwLock<Vec<LoopHook>>,
}

impl ModelCore {
    /// Core with a fresh auto-generated id.
    pub fn new(provider: &Arc<Provider>) -> ModelCore {
        Self::with_id(provider, ModelId::generate())
    }

    /// Core with an explicit name.
    pub fn named(provider: &Arc<Provider>, name: &str) -> ModelCore {
        Self::with_id(provider, ModelId::named(name))
    }

    fn with_id(provider: &Arc<Provider>, id: ModelId) -> ModelCore {
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        ModelCore {
            id,
            provider: Arc::downgrade(provider),
            inbox_tx,
            inbox_rx,
            inbox_guard: RwLock::new(()),
            closing: AtomicBool::new(false),
            container: RwLock::new(None),
            receive_hooks: RwLock::new(Vec::new()),
            read_hooks: RwLock::new(Vec::new()),
            loop_hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn provider(&self) -> Option<Arc<Provider>> {
        self.provider.upgrade()
    }

    pub fn container(&self) -> Option<Arc<dyn Container>> {
        self.container.read().clone()
    }

    pub(crate) fn set_container(&self, container: Arc<dyn Container>) {
        *self.container.write() = Some(container);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Signals currently queued.
    pub fn pending_len(&self) -> usize {
        self.inbox_rx.len()
    }

    /// Subscribe to the arrival path. Runs on sender threads; marking the
    /// signal handled consumes it before it reaches the inbox.
    pub fn on_receive<F>(&self, hook: F)
    where
        F: Fn(&ModelCore, &mut Signal) + Send + Sync + 'static,
    {
        self.receive_hooks.write().push(Arc::new(hook));
    }

    /// Subscribe to the dequeue path. Runs on the loop thread, in
    /// registration order, until some hook marks the signal handled.
    pub fn on_read<F>(&self, hook: F)
    where
        F: Fn(&ModelCore, &mut Signal) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.read_hooks.write().push(Arc::new(hook));
    }

    /// Subscribe to the dequeue path for payloads of type `T` only.
    /// Signals whose payload does not narrow to `T` skip this hook.
    pub fn on_read_typed<T, F>(&self, hook: F)
    where
        T: Any + Send + Sync,
        F: Fn(&ModelCore, &mut Signal, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_read(move |core, signal| {
            let Some(provider) = core.provider() else {
                return Ok(());
            };
            let payload = signal.resolve_payload(provider.router())?;
            match payload.as_deref().and_then(|p| p.downcast_ref::<T>()) {
                Some(value) => hook(core, signal, value),
                None => Ok(()),
            }
        });
    }

    /// Subscribe to loop ticks.
    pub fn on_loop<F>(&self, hook: F)
    where
        F: Fn(&ModelCore) + Send + Sync + 'static,
    {
        self.loop_hooks.write().push(Arc::new(hook));
    }

    /// Synchronous fast path, called on the sender's thread.
    ///
    /// Returns whether the signal was accepted. Refused while the container
    /// is paused or the model is closing; expired signals are dropped
    /// silently. An arrival hook that marks the signal handled consumes it
    /// without an enqueue.
    pub fn receive(&self, mut signal: Signal) -> bool {
        if self.is_closing() {
            trace!(model = %self.id, "signal refused: model closing");
            return false;
        }
        if let Some(container) = self.container() {
            if container.is_paused() {
                trace!(model = %self.id, "signal refused: container paused");
                return false;
            }
        }
        if signal.is_expired(Instant::now()) {
            trace!(model = %self.id, "signal dropped at enqueue: expired");
            return false;
        }

        let hooks = self.receive_hooks.read().clone();
        {
            let _guard = self.inbox_guard.read();
            for hook in &hooks {
                hook(self, &mut signal);
                if signal.handled() {
                    signal.finish();
                    return true;
                }
            }
            if self.inbox_tx.send(signal).is_err() {
                return false;
            }
        }
        if let Some(container) = self.container() {
            container.notify_work();
        }
        true
    }

    /// Drain the inbox on the loop thread. Per signal: expired signals are
    /// dropped; read hooks run in order until one marks it handled; then
    /// the router's handler; an unhandled signal is a soft error to the
    /// provider's model sink; finally the completer is fulfilled.
    pub(crate) fn process_pending(&self) {
        let Some(provider) = self.provider() else {
            return;
        };
        let router = provider.router().clone();
        let hooks = self.read_hooks.read().clone();

        for hook in self.loop_hooks.read().clone() {
            hook(self);
        }

        let _guard = self.inbox_guard.read();
        while let Ok(mut signal) = self.inbox_rx.try_recv() {
            if signal.is_expired(Instant::now()) {
                trace!(model = %self.id, "signal dropped at dequeue: expired");
                continue;
            }

            for hook in &hooks {
                if signal.handled() {
                    break;
                }
                if let Err(source) = hook(self, &mut signal) {
                    provider.notify_model_error(ModelError::Handler {
                        model: self.id,
                        signal: signal.name().unwrap_or_default(),
                        source,
                    });
                }
            }

            if !signal.handled() {
                if let Some(handler) = signal.content().and_then(|c| router.signal_processor(c)) {
                    if let Err(source) = router.invoke_processor(&handler, self, &mut signal) {
                        provider.notify_model_error(ModelError::Handler {
                            model: self.id,
                            signal: signal.name().unwrap_or_default(),
                            source,
                        });
                    }
                }
            }

            if !signal.handled() {
                provider.notify_model_error(ModelError::Unhandled {
                    model: self.id,
                    signal: signal.name().unwrap_or_default(),
                });
            }

            signal.finish();
        }
    }

    /// Strip expired signals from the inbox, preserving the order of the
    /// rest. Runs under the inbox's write lock; only invoked when the
    /// worker has been idle long enough to time out its gate.
    pub(crate) fn compact_inbox(&self) {
        let _guard = self.inbox_guard.write();
        let now = Instant::now();
        let mut live = Vec::with_capacity(self.inbox_rx.len());
        let mut dropped = 0usize;
        while let Ok(signal) = self.inbox_rx.try_recv() {
            if signal.is_expired(now) {
                dropped += 1;
            } else {
                live.push(signal);
            }
        }
        for signal in live {
            let _ = self.inbox_tx.send(signal);
        }
        if dropped > 0 {
            debug!(model = %self.id, dropped, "expired signals swept from inbox");
        }
    }

    /// Tear down: break the container link first, then deregister.
    /// Idempotent; the model refuses signals from here on.
    pub(crate) fn finalize(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.container.write() = None;
        if let Some(provider) = self.provider() {
            provider.registry().deregister(self.id);
        }
        debug!(model = %self.id, "model finalized");
    }
}

impl SignalTarget for ModelCore {
    fn id(&self) -> ModelId {
        self.id
    }

    fn halt(&self) {
        if let Some(container) = self.container() {
            container.kill();
        }
    }

    fn suspend(&self) {
        if let Some(container) = self.container() {
            container.pause();
        }
    }
}

impl Drop for ModelCore {
    fn drop(&mut self) {
        self.finalize();
    }
}
