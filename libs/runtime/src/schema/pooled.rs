//! Supervised pool schema
//!
//! Shared workers pull container updates from a central queue. A singleton
//! supervisor (the first enqueue claims the role) recomputes the worker
//! goal `min(target_pools, max(1, containers / target_density))` and spawns
//! workers up to it; workers retire themselves when the goal shrinks, so
//! reconfiguration never leaks threads.
//!
//! A container enters the queue at most once: `notify_work` enqueues only
//! on its pending counter's 0→1 transition, and the consumer decrements the
//! counter (with a following fence) before executing the loop, reopening
//! the enqueue window. Containers with a minimum loop period of at least
//! one millisecond are re-queued by the timer after each tick, which is
//! what gives pooled models their periodic heartbeat.

use crate::container::{Container, ContainerShared, HookFn};
use crate::gate::Gate;
use crate::model::Model;
use crate::provider::Provider;
use crate::schema::Schema;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use spindle_types::ModelId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// How long a pool worker blocks on the update queue per take.
const POOL_TAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Supervisor re-check interval when nothing wakes it.
const SUPERVISOR_IDLE: Duration = Duration::from_secs(30);

/// Minimum loop period that earns a delayed re-queue.
const REQUEUE_FLOOR: Duration = Duration::from_millis(1);

enum Update {
    Run(Arc<PoolContainer>),
    Stop,
}

/// Supervised pool of shared workers.
pub struct PooledSchema {
    weak_self: Weak<PooledSchema>,
    target_pools: usize,
    target_density: usize,
    queue_tx: Sender<Update>,
    queue_rx: Receiver<Update>,
    containers: DashMap<u64, Arc<PoolContainer>>,
    provider: RwLock<Weak<Provider>>,
    supervisor_claimed: AtomicBool,
    supervisor_gate: Gate,
    worker_goal: AtomicUsize,
    live_workers: AtomicUsize,
    stopping: AtomicBool,
    shutdown_requested: AtomicBool,
    timer: RequeueTimer,
}

impl PooledSchema {
    /// `target_pools` defaults to the host's available parallelism;
    /// `target_density` is containers per pool slot.
    pub fn new(target_pools: Option<usize>, target_density: usize) -> Arc<PooledSchema> {
        let pools = target_pools.unwrap_or_else(|| {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        });
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        Arc::new_cyclic(|weak_self| PooledSchema {
            weak_self: weak_self.clone(),
            target_pools: pools.max(1),
            target_density: target_density.max(1),
            queue_tx,
            queue_rx,
            containers: DashMap::new(),
            provider: RwLock::new(Weak::new()),
            supervisor_claimed: AtomicBool::new(false),
            supervisor_gate: Gate::new(),
            worker_goal: AtomicUsize::new(0),
            live_workers: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            timer: RequeueTimer::new(),
        })
    }

    /// Current worker goal, for observability.
    pub fn worker_goal(&self) -> usize {
        self.worker_goal.load(Ordering::SeqCst)
    }

    /// Workers currently alive, for observability.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    fn queue(&self, container: Arc<PoolContainer>) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.queue_tx.send(Update::Run(container));
        self.supervisor_gate.set();
        self.ensure_supervisor();
    }

    /// The first caller becomes the supervisor; later entrants return
    /// immediately.
    fn ensure_supervisor(&self) {
        if self.supervisor_claimed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(schema) = self.weak_self.upgrade() else {
            return;
        };
        let Some(provider) = self.provider.read().upgrade() else {
            return;
        };
        let spawned = thread::Builder::new()
            .name("spindle-pool-supervisor".to_string())
            .spawn({
                let provider = provider.clone();
                move || run_supervisor(schema, provider)
            });
        if let Err(source) = spawned {
            self.supervisor_claimed.store(false, Ordering::SeqCst);
            provider.notify_host_error(crate::provider::HostError::Worker {
                label: "pool supervisor".to_string(),
                source: source.into(),
            });
        }
    }

    fn container_closed(&self, id: ModelId) {
        self.containers.remove(&id.value());
        self.supervisor_gate.set();
        if self.shutdown_requested.load(Ordering::SeqCst) && self.containers.is_empty() {
            self.stop_workers();
        }
    }

    fn stop_workers(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("pool schema stopping workers");
        for _ in 0..self.live_workers.load(Ordering::SeqCst) {
            let _ = self.queue_tx.send(Update::Stop);
        }
        self.supervisor_gate.set();
        self.timer.stop();
    }
}

impl Schema for PooledSchema {
    fn bind(&self, provider: &Arc<Provider>) {
        *self.provider.write() = Arc::downgrade(provider);
    }

    fn attach(&self, provider: &Arc<Provider>, model: Arc<dyn Model>) -> Arc<dyn Container> {
        let container = PoolContainer::create(provider, model, self.weak_self.clone());
        self.containers
            .insert(container.shared.model_id.value(), container.clone());
        self.supervisor_gate.set();
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
        self.shutdown_requested.store(true, Ordering::SeqCst);
        if self.containers.is_empty() {
            self.stop_workers();
        }
    }
}

fn run_supervisor(schema: Arc<PooledSchema>, provider: Arc<Provider>) {
    provider.notify_worker_start();
    info!(
        target_pools = schema.target_pools,
        target_density = schema.target_density,
        "pool supervisor started"
    );
    while provider.is_running() && !schema.stopping.load(Ordering::SeqCst) {
        let containers = schema.containers.len();
        let goal = schema
            .target_pools
            .min((containers / schema.target_density).max(1));
        schema.worker_goal.store(goal, Ordering::SeqCst);

        while schema.live_workers.load(Ordering::SeqCst) < goal {
            schema.live_workers.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name("spindle-pool-worker".to_string())
                .spawn({
                    let schema = schema.clone();
                    let provider = provider.clone();
                    move || run_worker(schema, provider)
                });
            if let Err(source) = spawned {
                schema.live_workers.fetch_sub(1, Ordering::SeqCst);
                provider.notify_host_error(crate::provider::HostError::Worker {
                    label: "pool worker".to_string(),
                    source: source.into(),
                });
                break;
            }
        }

        schema.supervisor_gate.wait_for(SUPERVISOR_IDLE);
        schema.supervisor_gate.reset();
    }
    debug!("pool supervisor stopped");
    provider.notify_worker_end();
}

fn run_worker(schema: Arc<PooledSchema>, provider: Arc<Provider>) {
    provider.notify_worker_start();
    trace!("pool worker started");
    let mut retired = false;
    loop {
        if schema.stopping.load(Ordering::SeqCst) || !provider.is_running() {
            break;
        }
        // Retire surplus workers when the goal shrank.
        let live = schema.live_workers.load(Ordering::SeqCst);
        let goal = schema.worker_goal.load(Ordering::SeqCst);
        if live > goal
            && schema
                .live_workers
                .compare_exchange(live, live - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            retired = true;
            trace!("pool worker retired: goal shrank");
            break;
        }

        match schema.queue_rx.recv_timeout(POOL_TAKE_TIMEOUT) {
            Ok(Update::Run(container)) => container.execute(&provider, &schema),
            Ok(Update::Stop) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if !retired {
        schema.live_workers.fetch_sub(1, Ordering::SeqCst);
    }
    trace!("pool worker stopped");
    provider.notify_worker_end();
}

/// Container scheduled through the shared pool.
pub struct PoolContainer {
    shared: ContainerShared,
    weak_self: Weak<PoolContainer>,
    provider: Weak<Provider>,
    schema: Weak<PooledSchema>,
    model: RwLock<Option<Arc<dyn Model>>>,
    /// Re-entry counter: the container sits in the update queue only while
    /// this is above zero.
    pending: AtomicU32,
    /// Serializes loop execution if two workers ever hold the same
    /// container.
    exec_lock: Mutex<()>,
    closed: AtomicBool,
}

impl PoolContainer {
    fn create(
        provider: &Arc<Provider>,
        model: Arc<dyn Model>,
        schema: Weak<PooledSchema>,
    ) -> Arc<PoolContainer> {
        let container = Arc::new_cyclic(|weak_self| PoolContainer {
            shared: ContainerShared::new(model.core().id()),
            weak_self: weak_self.clone(),
            provider: Arc::downgrade(provider),
            schema,
            model: RwLock::new(Some(model.clone())),
            pending: AtomicU32::new(0),
            exec_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        });
        model.core().set_container(container.clone());
        container
    }

    /// One pool tick. The pending counter is decremented before the loop
    /// runs, with a fence so the reopened enqueue window is visible,
    /// exactly mirroring the enqueue side's 0→1 transition.
    fn execute(&self, provider: &Arc<Provider>, schema: &Arc<PooledSchema>) {
        // Every queue entry corresponds to exactly one un-rolled-back
        // increment, so this cannot underflow.
        self.pending.fetch_sub(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let _exec = self.exec_lock.lock();
        let Some(model) = self.model.read().clone() else {
            return;
        };

        if !self.shared.running.load(Ordering::SeqCst) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                // Final drain so the exit signal flows through normal
                // dispatch before the model closes.
                model.core().process_pending();
                self.shared.fire_close();
                model.core().finalize();
                self.shared.alive.store(false, Ordering::SeqCst);
                *self.model.write() = None;
                if let Some(schema) = self.schema.upgrade() {
                    schema.container_closed(self.shared.model_id);
                }
            }
            return;
        }
        if self.shared.paused.load(Ordering::SeqCst) {
            return;
        }

        let tick = Instant::now();
        self.shared.fire_loop();
        model.core().process_pending();
        self.shared.track_performance(tick.elapsed());

        let min = self.shared.min_loop();
        if min >= REQUEUE_FLOOR {
            schema.timer.schedule(self.weak_self.clone(), min, provider, schema);
        }
    }
}

impl Container for PoolContainer {
    fn model_id(&self) -> ModelId {
        self.shared.model_id
    }

    fn start_host(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.alive.store(true, Ordering::SeqCst);
        self.shared.fire_start();
        debug!(model = %self.shared.model_id, "pool container hosted");
        // First tick, and a wake for anything queued before attach.
        self.notify_work();
    }

    fn notify_work(&self) {
        if self.pending.fetch_add(1, Ordering::SeqCst) == 0 {
            if let (Some(schema), Some(me)) = (self.schema.upgrade(), self.weak_self.upgrade()) {
                schema.queue(me);
            }
        } else {
            // Already queued; roll the increment back to avoid duplicate
            // scheduling.
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn pause(&self) {
        self.shared.pause();
    }

    fn resume(&self) {
        if self.shared.resume() {
            self.notify_work();
        }
    }

    fn kill(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!(model = %self.shared.model_id, "pool container kill");
        if let Some(provider) = self.provider.upgrade() {
            let _ = provider
                .registry()
                .send::<()>("exit", None, Some(self.shared.model_id), None);
        }
        // Guarantee a final pass even when the exit send was refused.
        self.notify_work();
    }

    fn set_update_rate(&self, hz: f64) {
        self.shared.set_update_rate(hz);
        self.notify_work();
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

struct TimerEntry {
    due: Reverse<Instant>,
    container: Weak<PoolContainer>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due)
    }
}

/// Delayed re-queue timer: one thread servicing a due-time heap.
struct RequeueTimer {
    entries: Mutex<BinaryHeap<TimerEntry>>,
    wake: Condvar,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl RequeueTimer {
    fn new() -> RequeueTimer {
        RequeueTimer {
            entries: Mutex::new(BinaryHeap::new()),
            wake: Condvar::new(),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    fn schedule(
        &self,
        container: Weak<PoolContainer>,
        delay: Duration,
        provider: &Arc<Provider>,
        schema: &Arc<PooledSchema>,
    ) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut entries = self.entries.lock();
            entries.push(TimerEntry {
                due: Reverse(Instant::now() + delay),
                container,
            });
        }
        self.wake.notify_one();
        self.ensure_thread(provider, schema);
    }

    fn ensure_thread(&self, provider: &Arc<Provider>, schema: &Arc<PooledSchema>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let spawned = thread::Builder::new()
            .name("spindle-pool-timer".to_string())
            .spawn({
                let provider = provider.clone();
                let schema = schema.clone();
                move || run_timer(schema, provider)
            });
        if let Err(source) = spawned {
            self.started.store(false, Ordering::SeqCst);
            provider.notify_host_error(crate::provider::HostError::Worker {
                label: "pool timer".to_string(),
                source: source.into(),
            });
        }
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }
}

fn run_timer(schema: Arc<PooledSchema>, provider: Arc<Provider>) {
    provider.notify_worker_start();
    trace!("pool timer started");
    let timer = &schema.timer;
    loop {
        if timer.stopping.load(Ordering::SeqCst) || !provider.is_running() {
            break;
        }
        let mut entries = timer.entries.lock();
        let now = Instant::now();
        let next_due = entries.peek().map(|entry| entry.due.0);
        match next_due {
            None => {
                timer.wake.wait_for(&mut entries, SUPERVISOR_IDLE);
            }
            Some(due) if due <= now => {
                let entry = entries.pop().expect("peeked entry");
                drop(entries);
                if let Some(container) = entry.container.upgrade() {
                    container.notify_work();
                }
            }
            Some(due) => {
                timer.wake.wait_for(&mut entries, due - now);
            }
        }
    }
    trace!("pool timer stopped");
    provider.notify_worker_end();
}
