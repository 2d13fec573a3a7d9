//! Manual-reset gate
//!
//! The wake-up primitive between senders and container workers. `set`
//! opens the gate and leaves it open until someone calls `reset`; a worker
//! waiting on an open gate returns immediately. This is what lets a
//! container with a minimum loop period keep ticking after a single
//! notification, while zero-period containers reset and park.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    /// A new gate starts closed.
    pub fn new() -> Gate {
        Gate {
            open: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Open the gate and wake every waiter. Stays open until `reset`.
    pub fn set(&self) {
        let mut open = self.open.lock();
        if !*open {
            *open = true;
            self.cv.notify_all();
        }
    }

    /// Close the gate. Future waits block until the next `set`.
    pub fn reset(&self) {
        *self.open.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.open.lock()
    }

    /// Block until the gate is open.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }

    /// Block until the gate is open or the timeout elapses. Returns
    /// whether the gate was open.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut open = self.open.lock();
        while !*open {
            if self.cv.wait_for(&mut open, timeout).timed_out() {
                return *open;
            }
        }
        true
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn open_gate_passes_immediately() {
        let gate = Gate::new();
        gate.set();
        assert!(gate.wait_for(Duration::from_millis(1)));
        // Manual reset: still open after a wait.
        assert!(gate.is_set());
    }

    #[test]
    fn closed_gate_times_out() {
        let gate = Gate::new();
        assert!(!gate.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn set_wakes_a_blocked_waiter() {
        let gate = Arc::new(Gate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_for(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        gate.set();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn reset_closes_again() {
        let gate = Gate::new();
        gate.set();
        gate.reset();
        assert!(!gate.wait_for(Duration::from_millis(5)));
    }
}
