//! Model containers
//!
//! A container is the lifecycle shell around one model: it owns the gate
//! that wakes the model's loop, the running/alive/paused flags, the minimum
//! loop period, and the rolling loop-time statistic. The concrete
//! scheduling (a dedicated worker thread or a slot in the shared pool)
//! lives in the schema implementations; everything they share is here in
//! [`ContainerShared`].

use crate::gate::Gate;
use parking_lot::{Mutex, RwLock};
use spindle_types::ModelId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long a worker sleeps on its gate before sweeping expired signals
/// out of the inbox.
pub const GATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Window over which the rolling loop-time average is estimated.
pub const PERFORMANCE_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle subscriber callback.
pub type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Scheduling shell around one model.
pub trait Container: Send + Sync {
    /// Address of the hosted model.
    fn model_id(&self) -> ModelId;

    /// Begin driving the model's loop. Idempotent.
    fn start_host(&self);

    /// Wake the loop promptly.
    fn notify_work(&self);

    /// Stop dequeuing; the fast path rejects senders while paused.
    fn pause(&self);

    /// Reopen the gate and continue dequeuing.
    fn resume(&self);

    /// Irreversible stop. Re-entry safe. Dispatches `exit` through the
    /// registry so the model observes closure via normal signal plumbing.
    fn kill(&self);

    /// Set the minimum loop period from a rate in Hz. Zero or negative
    /// rates clear the minimum (the loop parks between notifications).
    fn set_update_rate(&self, hz: f64);

    fn is_alive(&self) -> bool;
    fn is_running(&self) -> bool;
    fn is_paused(&self) -> bool;

    /// Rolling average of recent loop durations.
    fn approximate_loop_time(&self) -> Duration;

    /// Subscribe to every loop tick.
    fn on_loop(&self, hook: HookFn);

    /// Subscribe to the worker starting to drive this container.
    fn on_start(&self, hook: HookFn);

    /// Subscribe to the container closing down.
    fn on_close(&self, hook: HookFn);
}

/// State common to both schemas' containers.
pub(crate) struct ContainerShared {
    pub model_id: ModelId,
    pub gate: Gate,
    pub started: AtomicBool,
    pub running: AtomicBool,
    pub alive: AtomicBool,
    pub paused: AtomicBool,
    /// Serializes pause/resume transitions.
    pause_monitor: Mutex<()>,
    min_loop_nanos: AtomicU64,
    /// Rolling average loop time in milliseconds, stored as f64 bits.
    avg_loop_millis: AtomicU64,
    on_start: RwLock<Vec<HookFn>>,
    on_loop: RwLock<Vec<HookFn>>,
    on_close: RwLock<Vec<HookFn>>,
}

impl ContainerShared {
    pub fn new(model_id: ModelId) -> ContainerShared {
        ContainerShared {
            model_id,
            gate: Gate::new(),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            alive: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            pause_monitor: Mutex::new(()),
            min_loop_nanos: AtomicU64::new(0),
            avg_loop_millis: AtomicU64::new(0f64.to_bits()),
            on_start: RwLock::new(Vec::new()),
            on_loop: RwLock::new(Vec::new()),
            on_close: RwLock::new(Vec::new()),
        }
    }

    pub fn min_loop(&self) -> Duration {
        Duration::from_nanos(self.min_loop_nanos.load(Ordering::Relaxed))
    }

    pub fn set_update_rate(&self, hz: f64) {
        let nanos = if hz > 0.0 {
            (1_000_000_000.0 / hz) as u64
        } else {
            0
        };
        debug!(model = %self.model_id, hz, period_ns = nanos, "update rate changed");
        self.min_loop_nanos.store(nanos, Ordering::Relaxed);
    }

    /// Fold one loop duration into the rolling average. The window is
    /// approximated by estimating how many recent iterations fit into
    /// [`PERFORMANCE_INTERVAL`] at the current average.
    pub fn track_performance(&self, elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
        let mut current = self.avg_loop_millis.load(Ordering::Relaxed);
        loop {
            let avg = f64::from_bits(current);
            let est_iters = PERFORMANCE_INTERVAL.as_secs_f64() * 1_000.0 / avg.max(1.0);
            let next = (avg * est_iters + elapsed_ms) / (est_iters + 1.0);
            match self.avg_loop_millis.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn approximate_loop_time(&self) -> Duration {
        Duration::from_secs_f64(f64::from_bits(self.avg_loop_millis.load(Ordering::Relaxed)) / 1_000.0)
    }

    /// Pause under the monitor. Senders are refused at the fast path while
    /// the flag is up.
    pub fn pause(&self) {
        let _monitor = self.pause_monitor.lock();
        if !self.paused.swap(true, Ordering::SeqCst) {
            debug!(model = %self.model_id, "container paused");
        }
    }

    /// Resume under the monitor. Returns whether the state changed, so the
    /// caller can re-arm its scheduling.
    pub fn resume(&self) -> bool {
        let _monitor = self.pause_monitor.lock();
        let was_paused = self.paused.swap(false, Ordering::SeqCst);
        if was_paused {
            debug!(model = %self.model_id, "container resumed");
            self.gate.set();
        }
        was_paused
    }

    pub fn subscribe_start(&self, hook: HookFn) {
        self.on_start.write().push(hook);
    }

    pub fn subscribe_loop(&self, hook: HookFn) {
        self.on_loop.write().push(hook);
    }

    pub fn subscribe_close(&self, hook: HookFn) {
        self.on_close.write().push(hook);
    }

    pub fn fire_start(&self) {
        for hook in self.snapshot(&self.on_start) {
            hook();
        }
    }

    pub fn fire_loop(&self) {
        for hook in self.snapshot(&self.on_loop) {
            hook();
        }
    }

    pub fn fire_close(&self) {
        for hook in self.snapshot(&self.on_close) {
            hook();
        }
    }

    fn snapshot(&self, hooks: &RwLock<Vec<HookFn>>) -> Vec<HookFn> {
        hooks.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_rate_maps_to_period() {
        let shared = ContainerShared::new(ModelId::named("m"));
        assert!(shared.min_loop().is_zero());

        shared.set_update_rate(100.0);
        assert_eq!(shared.min_loop(), Duration::from_millis(10));

        shared.set_update_rate(0.0);
        assert!(shared.min_loop().is_zero());
    }

    #[test]
    fn rolling_average_converges_to_the_tick_time() {
        let shared = ContainerShared::new(ModelId::named("m"));
        // Simulate one second of 10 ms ticks.
        for _ in 0..100 {
            shared.track_performance(Duration::from_millis(10));
        }
        let avg = shared.approximate_loop_time();
        assert!(
            avg >= Duration::from_millis(8) && avg <= Duration::from_millis(12),
            "average drifted to {avg:?}"
        );
    }

    #[test]
    fn rolling_average_tracks_a_changed_tick_time() {
        let shared = ContainerShared::new(ModelId::named("m"));
        for _ in 0..100 {
            shared.track_performance(Duration::from_millis(2));
        }
        for _ in 0..200 {
            shared.track_performance(Duration::from_millis(20));
        }
        let avg = shared.approximate_loop_time();
        assert!(avg >= Duration::from_millis(15), "average lagged at {avg:?}");
    }

    #[test]
    fn pause_and_resume_toggle_under_the_monitor() {
        let shared = ContainerShared::new(ModelId::named("m"));
        assert!(!shared.paused.load(Ordering::SeqCst));
        shared.pause();
        assert!(shared.paused.load(Ordering::SeqCst));
        assert!(shared.resume());
        assert!(!shared.resume());
        // Resume opened the gate for the worker.
        assert!(shared.gate.is_set());
    }
}
