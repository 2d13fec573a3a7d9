//! Request/reply completers
//!
//! A [`Completer`]/[`Reply`] pair is a single-shot synchronisation
//! primitive: the destination's loop thread fulfils the completer after
//! every handler phase has run for the signal, and the requesting thread
//! blocks on the reply. The slot holds at most one response and delivers
//! it at most once.

use parking_lot::{Condvar, Mutex};
use spindle_types::Content;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplyError {
    /// The response did not arrive within the caller's deadline.
    #[error("reply not fulfilled within {timeout:?}")]
    TimedOut { timeout: Duration },
}

#[derive(Debug)]
enum SlotState {
    Pending,
    Done(Option<Content>),
    Taken,
}

#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    arrived: Condvar,
}

/// Fulfilment side, held by the signal. Consumed on completion.
pub struct Completer {
    slot: Arc<Slot>,
}

/// Waiting side, returned to the requester.
#[derive(Debug)]
pub struct Reply {
    slot: Arc<Slot>,
}

impl Completer {
    pub fn new_pair() -> (Completer, Reply) {
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState::Pending),
            arrived: Condvar::new(),
        });
        (
            Completer { slot: slot.clone() },
            Reply { slot },
        )
    }

    /// Deliver the response and wake the waiter. `None` means the signal
    /// ran (or was dropped) without a reply being stored.
    pub fn complete(self, response: Option<Content>) {
        let mut state = self.slot.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Done(response);
            self.slot.arrived.notify_all();
        }
    }
}

impl Reply {
    /// Block until the response arrives. `None` timeout waits forever.
    pub fn wait(self, timeout: Option<Duration>) -> Result<Option<Content>, ReplyError> {
        let deadline = timeout.map(|limit| std::time::Instant::now() + limit);
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(response) => return Ok(response),
                SlotState::Taken => return Ok(None),
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    match deadline {
                        Some(deadline) => {
                            if self.slot.arrived.wait_until(&mut state, deadline).timed_out() {
                                // Check once more: fulfilment may have raced
                                // the timeout.
                                if let SlotState::Done(response) =
                                    std::mem::replace(&mut *state, SlotState::Taken)
                                {
                                    return Ok(response);
                                }
                                return Err(ReplyError::TimedOut {
                                    timeout: timeout.unwrap_or_default(),
                                });
                            }
                        }
                        None => self.slot.arrived.wait(&mut state),
                    }
                }
            }
        }
    }

    /// Non-blocking probe; takes the response when it has arrived.
    pub fn try_take(&self) -> Option<Option<Content>> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Done(response) => Some(response),
            other => {
                *state = other;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn reply_receives_the_response() {
        let (completer, reply) = Completer::new_pair();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(None);
        });
        let response = reply.wait(Some(Duration::from_secs(1))).unwrap();
        assert!(response.is_none());
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out_without_fulfilment() {
        let (_completer, reply) = Completer::new_pair();
        let err = reply.wait(Some(Duration::from_millis(30))).unwrap_err();
        assert!(matches!(err, ReplyError::TimedOut { .. }));
    }

    #[test]
    fn try_take_probes_without_blocking() {
        let (completer, reply) = Completer::new_pair();
        assert!(reply.try_take().is_none());
        completer.complete(None);
        assert!(matches!(reply.try_take(), Some(None)));
    }
}
