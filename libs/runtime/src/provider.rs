//! # Provider - Process Composition Root
//!
//! ## Purpose
//!
//! The provider ties router, model registry and parallelism schema together
//! and owns process lifecycle: `start` seals the router and spawns the core
//! model, `shutdown` asks the core to fan `exit` out to every model, and
//! `await_close` blocks until every hosted worker thread has drained.
//!
//! The core model is the privileged bootstrap actor. It always runs on its
//! own dedicated worker, even under the pooled schema, so the shutdown
//! fan-out can busy-wait for other containers without occupying a pool
//! slot.

use crate::config::RuntimeConfig;
use crate::container::Container;
use crate::model::{Model, ModelCore};
use crate::registry::ModelRegistry;
use crate::schema::{dedicated, Schema};
use parking_lot::{Mutex, RwLock};
use spindle_codec::{Router, RouterOptions};
use spindle_types::ModelId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors surfaced to the provider's model-error sink. These are logged
/// and forwarded to subscribers; they never alter control flow.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A read hook or router handler returned an error.
    #[error("handler for signal {signal:?} on model {model} failed: {source}")]
    Handler {
        model: ModelId,
        signal: String,
        #[source]
        source: anyhow::Error,
    },

    /// No hook or handler claimed the signal.
    #[error("signal {signal:?} to model {model} was not handled")]
    Unhandled { model: ModelId, signal: String },
}

/// Errors surfaced to the provider's host-error sink, from container
/// workers rather than model code.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("worker {label:?} failed: {source}")]
    Worker {
        label: String,
        #[source]
        source: anyhow::Error,
    },
}

type LifecycleHook = Arc<dyn Fn() + Send + Sync>;
type ModelErrorHook = Arc<dyn Fn(&ModelError) + Send + Sync>;
type HostErrorHook = Arc<dyn Fn(&HostError) + Send + Sync>;

/// Process-wide composition of router, registry, schema and core model.
pub struct Provider {
    router: Arc<Router>,
    registry: ModelRegistry,
    schema: Arc<dyn Schema>,
    core_id: RwLock<Option<ModelId>>,
    core_container: RwLock<Option<Arc<dyn Container>>>,
    started: AtomicBool,
    running: AtomicBool,
    shutting_down: AtomicBool,
    live_workers: AtomicUsize,
    worker_threads: Mutex<HashSet<ThreadId>>,
    post_init_hooks: RwLock<Vec<LifecycleHook>>,
    shutdown_hooks: RwLock<Vec<LifecycleHook>>,
    post_shutdown_hooks: RwLock<Vec<LifecycleHook>>,
    post_shutdown_fired: AtomicBool,
    model_error_hooks: RwLock<Vec<ModelErrorHook>>,
    host_error_hooks: RwLock<Vec<HostErrorHook>>,
}

impl Provider {
    /// Compose a provider from router options and a schema.
    pub fn new(options: RouterOptions, schema: Arc<dyn Schema>) -> Arc<Provider> {
        let provider = Arc::new(Provider {
            router: Arc::new(Router::new(options)),
            registry: ModelRegistry::new(),
            schema,
            core_id: RwLock::new(None),
            core_container: RwLock::new(None),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            live_workers: AtomicUsize::new(0),
            worker_threads: Mutex::new(HashSet::new()),
            post_init_hooks: RwLock::new(Vec::new()),
            shutdown_hooks: RwLock::new(Vec::new()),
            post_shutdown_hooks: RwLock::new(Vec::new()),
            post_shutdown_fired: AtomicBool::new(false),
            model_error_hooks: RwLock::new(Vec::new()),
            host_error_hooks: RwLock::new(Vec::new()),
        });
        provider.registry.bind(&provider);
        provider.schema.bind(&provider);
        provider
    }

    /// Compose a provider from a loaded [`RuntimeConfig`].
    pub fn from_config(config: &RuntimeConfig) -> Arc<Provider> {
        Provider::new(config.router, config.schema.build())
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn schema(&self) -> &Arc<dyn Schema> {
        &self.schema
    }

    /// Address of the core model, once started.
    pub fn core_id(&self) -> Option<ModelId> {
        *self.core_id.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Hosted worker threads currently alive.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// Seal the router, flip running, spawn the core model. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.router.build();
        self.running.store(true, Ordering::SeqCst);

        let core = Arc::new(CoreModel::new(self));
        let core_id = core.core().id();
        *self.core_id.write() = Some(core_id);
        self.registry.register(core.clone());
        let container = dedicated::host_standalone(self, core);
        *self.core_container.write() = Some(container);

        info!(core = %core_id, "provider started");
        for hook in self.post_init_hooks.read().clone() {
            hook();
        }
    }

    /// Register a model and hand it to the schema for hosting. Call after
    /// [`Provider::start`]; a container attached to a stopped provider
    /// never runs.
    pub fn spawn(self: &Arc<Self>, model: Arc<dyn Model>) -> Arc<dyn Container> {
        if !self.is_running() {
            warn!(model = %model.core().id(), "spawn on a provider that is not running");
        }
        self.registry.register(model.clone());
        self.schema.attach(self, model)
    }

    /// Begin shutdown: fire the shutdown event, tell the schema to wind
    /// down once its containers close, and send `exit` to the core, which
    /// fans it out to every other model. Returns immediately; pair with
    /// [`Provider::await_close`].
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("provider shutdown requested");
        for hook in self.shutdown_hooks.read().clone() {
            hook();
        }
        self.schema.begin_shutdown();
        if let Some(core) = self.core_id() {
            if let Err(err) = self.registry.send::<()>("exit", None, Some(core), None) {
                warn!(error = %err, "exit signal to core failed");
            }
        }
    }

    /// Block until every hosted worker has drained, then fire the
    /// post-shutdown event exactly once. A caller that is itself a hosted
    /// worker is excluded from the count so it cannot deadlock on itself.
    /// Returns whether the drain completed within the timeout.
    pub fn await_close(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let own = thread::current().id();
        loop {
            let floor = usize::from(self.worker_threads.lock().contains(&own));
            if self.live_workers.load(Ordering::SeqCst) <= floor {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    live = self.live_workers.load(Ordering::SeqCst),
                    "await_close timed out"
                );
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.running.store(false, Ordering::SeqCst);
        if !self.post_shutdown_fired.swap(true, Ordering::SeqCst) {
            for hook in self.post_shutdown_hooks.read().clone() {
                hook();
            }
        }
        true
    }

    /// A hosted worker thread came up. Only workers mutate the counter.
    pub(crate) fn notify_worker_start(&self) {
        self.live_workers.fetch_add(1, Ordering::SeqCst);
        self.worker_threads.lock().insert(thread::current().id());
    }

    /// A hosted worker thread is exiting. The counter reaching zero flips
    /// the provider out of running.
    pub(crate) fn notify_worker_end(&self) {
        self.worker_threads.lock().remove(&thread::current().id());
        if self.live_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.running.store(false, Ordering::SeqCst);
            debug!("last hosted worker exited");
        }
    }

    /// Sink for errors out of model code. Logged and forwarded; control
    /// flow is unaffected.
    pub fn notify_model_error(&self, err: ModelError) {
        error!(error = %err, "model error");
        for hook in self.model_error_hooks.read().clone() {
            hook(&err);
        }
    }

    /// Sink for errors out of container workers.
    pub fn notify_host_error(&self, err: HostError) {
        error!(error = %err, "host error");
        for hook in self.host_error_hooks.read().clone() {
            hook(&err);
        }
    }

    pub fn on_post_init<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        self.post_init_hooks.write().push(Arc::new(hook));
    }

    pub fn on_shutdown<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        self.shutdown_hooks.write().push(Arc::new(hook));
    }

    pub fn on_post_shutdown<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        self.post_shutdown_hooks.write().push(Arc::new(hook));
    }

    pub fn on_model_error<F: Fn(&ModelError) + Send + Sync + 'static>(&self, hook: F) {
        self.model_error_hooks.write().push(Arc::new(hook));
    }

    pub fn on_host_error<F: Fn(&HostError) + Send + Sync + 'static>(&self, hook: F) {
        self.host_error_hooks.write().push(Arc::new(hook));
    }
}

/// The privileged bootstrap model.
///
/// Receives the shutdown request and fans `exit` out to every other
/// registered model, then waits for their containers to die before its own
/// container follows through the router's default `exit` handler.
struct CoreModel {
    core: ModelCore,
}

impl CoreModel {
    fn new(provider: &Arc<Provider>) -> CoreModel {
        let core = ModelCore::named(provider, "_core");
        let exit_index = provider.router().index_of("exit");
        let provider_weak = Arc::downgrade(provider);

        core.on_read(move |model, signal| {
            let is_exit = match (exit_index, signal.content()) {
                (Some(index), Some(content)) => content.signal_index() == index,
                _ => false,
            };
            if !is_exit {
                return Ok(());
            }
            let Some(provider) = provider_weak.upgrade() else {
                return Ok(());
            };
            broadcast_exit(&provider, model.id());
            // Leave the signal unhandled: the router's default `exit`
            // handler still has to kill this container.
            Ok(())
        });

        CoreModel { core }
    }
}

impl Model for CoreModel {
    fn core(&self) -> &ModelCore {
        &self.core
    }
}

/// Send `exit` to every model but the core, then busy-wait until their
/// containers all report not-alive. Runs on the core's own worker.
fn broadcast_exit(provider: &Arc<Provider>, core_id: ModelId) {
    let targets: Vec<ModelId> = provider
        .registry()
        .ids()
        .into_iter()
        .filter(|&id| id != core_id)
        .collect();
    info!(models = targets.len(), "core fanning out exit");

    for id in targets {
        let delivered = provider
            .registry()
            .send::<()>("exit", None, Some(id), Some(core_id));
        match delivered {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                // Paused or refusing models never drain the exit signal;
                // fall back to killing the container directly.
                if let Some(model) = provider.registry().get(id) {
                    if let Some(container) = model.core().container() {
                        debug!(model = %id, "exit refused, killing container directly");
                        container.kill();
                    }
                }
            }
        }
    }

    loop {
        let busy = provider
            .schema()
            .containers()
            .iter()
            .any(|container| container.model_id() != core_id && container.is_alive());
        if !busy {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    debug!("all hosted containers drained");
}
