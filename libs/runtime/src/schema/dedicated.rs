//! Dedicated-worker schema
//!
//! One long-running worker thread per model. The worker sleeps on the
//! container's gate; senders open the gate through `notify_work`. A
//! container with a minimum loop period leaves its gate open so the loop
//! keeps ticking at that rate, while zero-period containers reset the gate
//! each tick and park until the next notification. A worker idle for
//! [`GATE_TIMEOUT`] sweeps expired signals out of its model's inbox.

use crate::container::{Container, ContainerShared, HookFn, GATE_TIMEOUT};
use crate::model::Model;
use crate::provider::Provider;
use crate::schema::Schema;
use dashmap::DashMap;
use parking_lot::Mutex;
use spindle_types::ModelId;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// One dedicated worker thread per model.
pub struct DedicatedSchema {
    weak_self: Weak<DedicatedSchema>,
    containers: DashMap<u64, Arc<DedicatedContainer>>,
}

impl DedicatedSchema {
    pub fn new() -> Arc<DedicatedSchema> {
        Arc::new_cyclic(|weak_self| DedicatedSchema {
            weak_self: weak_self.clone(),
            containers: DashMap::new(),
        })
    }

    fn container_closed(&self, id: ModelId) {
        self.containers.remove(&id.value());
    }
}

impl Schema for DedicatedSchema {
    fn bind(&self, _provider: &Arc<Provider>) {}

    fn attach(&self, provider: &Arc<Provider>, model: Arc<dyn Model>) -> Arc<dyn Container> {
        let container = DedicatedContainer::create(provider, model, self.weak_self.clone());
        self.containers
            .insert(container.shared.model_id.value(), container.clone());
        container.start_host();
        container
    }

    fn containers(&self) -> Vec<Arc<dyn Container>> {
        self.containers
            .iter()
            .map(|entry| -> Arc<dyn Container> { entry.value().clone() })
            .collect()
    }

    fn begin_shutdown(&self) {
        // Dedicated workers die with their containers; nothing shared to
        // wind down.
    }
}

/// Container driven by its own worker thread.
pub struct DedicatedContainer {
    shared: ContainerShared,
    weak_self: Weak<DedicatedContainer>,
    provider: Weak<Provider>,
    schema: Weak<DedicatedSchema>,
    /// Model handle consumed by `start_host` when the worker spawns.
    pending_model: Mutex<Option<Arc<dyn Model>>>,
}

impl DedicatedContainer {
    fn create(
        provider: &Arc<Provider>,
        model: Arc<dyn Model>,
        schema: Weak<DedicatedSchema>,
    ) -> Arc<DedicatedContainer> {
        let container = Arc::new_cyclic(|weak_self| DedicatedContainer {
            shared: ContainerShared::new(model.core().id()),
            weak_self: weak_self.clone(),
            provider: Arc::downgrade(provider),
            schema,
            pending_model: Mutex::new(Some(model.clone())),
        });
        model.core().set_container(container.clone());
        // Anything queued before the container existed still needs a wake.
        if model.core().pending_len() > 0 {
            container.shared.gate.set();
        }
        container
    }
}

impl Container for DedicatedContainer {
    fn model_id(&self) -> ModelId {
        self.shared.model_id
    }

    fn start_host(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(model) = self.pending_model.lock().take() else {
            return;
        };
        let Some(provider) = self.provider.upgrade() else {
            return;
        };
        let Some(container) = self.weak_self.upgrade() else {
            return;
        };
        self.shared.running.store(true, Ordering::SeqCst);
        let schema = self.schema.clone();
        let spawned = thread::Builder::new()
            .name(format!("spindle-{}", self.shared.model_id).replace(' ', ""))
            .spawn({
                let provider = provider.clone();
                move || run_worker(provider, schema, container, model)
            });
        if let Err(source) = spawned {
            self.shared.running.store(false, Ordering::SeqCst);
            provider.notify_host_error(crate::provider::HostError::Worker {
                label: format!("dedicated worker {}", self.shared.model_id),
                source: source.into(),
            });
        }
    }

    fn notify_work(&self) {
        self.shared.gate.set();
    }

    fn pause(&self) {
        self.shared.pause();
    }

    fn resume(&self) {
        self.shared.resume();
    }

    fn kill(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!(model = %self.shared.model_id, "dedicated container kill");
        self.shared.gate.set();
        if let Some(provider) = self.provider.upgrade() {
            let _ = provider
                .registry()
                .send::<()>("exit", None, Some(self.shared.model_id), None);
        }
    }

    fn set_update_rate(&self, hz: f64) {
        self.shared.set_update_rate(hz);
        // Wake the loop so the new period takes effect immediately.
        self.shared.gate.set();
    }

    fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    fn approximate_loop_time(&self) -> Duration {
        self.shared.approximate_loop_time()
    }

    fn on_loop(&self, hook: HookFn) {
        self.shared.subscribe_loop(hook);
    }

    fn on_start(&self, hook: HookFn) {
        self.shared.subscribe_start(hook);
    }

    fn on_close(&self, hook: HookFn) {
        self.shared.subscribe_close(hook);
    }
}

/// Host a model outside any schema set. Used for the core model, which
/// always gets its own worker.
pub(crate) fn host_standalone(
    provider: &Arc<Provider>,
    model: Arc<dyn Model>,
) -> Arc<dyn Container> {
    let container = DedicatedContainer::create(provider, model, Weak::new());
    container.start_host();
    container
}

fn run_worker(
    provider: Arc<Provider>,
    schema: Weak<DedicatedSchema>,
    container: Arc<DedicatedContainer>,
    model: Arc<dyn Model>,
) {
    provider.notify_worker_start();
    container.shared.alive.store(true, Ordering::SeqCst);
    container.shared.fire_start();
    debug!(model = %container.shared.model_id, "dedicated worker started");

    while provider.is_running() && container.shared.running.load(Ordering::SeqCst) {
        if !container.shared.gate.wait_for(GATE_TIMEOUT) {
            // Idle timeout: sweep expired signals, keep waiting.
            model.core().compact_inbox();
            continue;
        }
        if container.shared.paused.load(Ordering::SeqCst) {
            container.shared.gate.reset();
            continue;
        }

        let min = container.shared.min_loop();
        if min.is_zero() {
            // Park until the next notification once this drain is done.
            container.shared.gate.reset();
        }

        let tick = Instant::now();
        container.shared.fire_loop();
        model.core().process_pending();

        let elapsed = tick.elapsed();
        if !min.is_zero() && elapsed < min {
            thread::sleep(min - elapsed);
        }
        container.shared.track_performance(tick.elapsed());
    }

    // Final drain so the exit signal sent by kill flows through normal
    // dispatch before the model closes.
    model.core().process_pending();
    container.shared.fire_close();
    model.core().finalize();
    container.shared.alive.store(false, Ordering::SeqCst);
    if let Some(schema) = schema.upgrade() {
        schema.container_closed(container.shared.model_id);
    }
    trace!(model = %container.shared.model_id, "dedicated worker stopped");
    provider.notify_worker_end();
}
