//! Shared fixtures for the runtime integration tests.

use parking_lot::Mutex;
use spindle_runtime::{Model, ModelCore, Provider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Bare model with no hooks; signals fall through to router handlers.
pub struct Shell {
    core: ModelCore,
}

impl Model for Shell {
    fn core(&self) -> &ModelCore {
        &self.core
    }
}

impl Shell {
    pub fn spawn(provider: &Arc<Provider>, name: &str) -> Arc<Shell> {
        let model = Arc::new(Shell {
            core: ModelCore::named(provider, name),
        });
        provider.spawn(model.clone());
        model
    }
}

/// Model that records every i32 payload it reads, in order.
pub struct Recorder {
    core: ModelCore,
    pub seen: Arc<Mutex<Vec<i32>>>,
    pub processed: Arc<AtomicUsize>,
}

impl Model for Recorder {
    fn core(&self) -> &ModelCore {
        &self.core
    }
}

impl Recorder {
    pub fn spawn(provider: &Arc<Provider>, name: &str) -> Arc<Recorder> {
        let core = ModelCore::named(provider, name);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processed = Arc::new(AtomicUsize::new(0));

        let seen_hook = seen.clone();
        let processed_hook = processed.clone();
        core.on_read_typed::<i32, _>(move |_, signal, value| {
            seen_hook.lock().push(*value);
            processed_hook.fetch_add(1, Ordering::SeqCst);
            signal.mark_handled();
            Ok(())
        });

        let model = Arc::new(Recorder {
            core,
            seen,
            processed,
        });
        provider.spawn(model.clone());
        model
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

/// Poll a condition until it holds or the deadline passes.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
