//! In-flight signals
//!
//! A [`Signal`] is one message in flight: a router handle for name and
//! payload resolution, addressing, the content envelope, and the lifecycle
//! flags that the dispatch chain honours. Once a signal is marked handled no
//! later stage of the chain runs for it; once its expiration passes it is
//! silently dropped wherever it is next inspected.

use crate::completer::Completer;
use crate::error::PackError;
use crate::router::Router;
use spindle_types::content::PayloadHandle;
use spindle_types::{Content, ModelId};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The destination side of a dispatch: enough of a model for the router's
/// built-in signals to act on it without knowing the runtime's model type.
pub trait SignalTarget: Send + Sync {
    /// Address of the target model.
    fn id(&self) -> ModelId;

    /// Irreversibly stop the target's container.
    fn halt(&self);

    /// Pause the target's container.
    fn suspend(&self);
}

/// One message in flight between models.
pub struct Signal {
    router: Arc<Router>,
    sender: Option<ModelId>,
    destination: ModelId,
    content: Option<Content>,
    handled: bool,
    expires_at: Option<Instant>,
    response: Option<Content>,
    completer: Option<Completer>,
}

impl Signal {
    pub fn new(router: Arc<Router>, destination: ModelId, content: Option<Content>) -> Signal {
        Signal {
            router,
            sender: None,
            destination,
            content,
            handled: false,
            expires_at: None,
            response: None,
            completer: None,
        }
    }

    pub fn with_sender(mut self, sender: ModelId) -> Signal {
        self.sender = Some(sender);
        self
    }

    /// Expire the signal `ttl` from now. Expired signals are dropped at
    /// enqueue and dequeue without reaching any handler.
    pub fn expires_in(mut self, ttl: Duration) -> Signal {
        self.expires_at = Some(Instant::now() + ttl);
        self
    }

    pub fn with_completer(mut self, completer: Completer) -> Signal {
        self.completer = Some(completer);
        self
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn sender(&self) -> Option<ModelId> {
        self.sender
    }

    pub fn destination(&self) -> ModelId {
        self.destination
    }

    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    pub fn content_mut(&mut self) -> Option<&mut Content> {
        self.content.as_mut()
    }

    /// Resolved name of this signal, via the router's name table.
    pub fn name(&self) -> Option<String> {
        self.content
            .as_ref()
            .and_then(|c| self.router.header_name(c))
    }

    pub fn handled(&self) -> bool {
        self.handled
    }

    /// Mark the signal handled; later stages of the dispatch chain skip it.
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Direct narrowed read of the live payload.
    pub fn data_as<T: std::any::Any>(&self) -> Option<&T> {
        self.content.as_ref().and_then(|c| c.data_as::<T>())
    }

    /// Read the payload, unwrapping a packed payload through the router
    /// when necessary. A type mismatch yields `None`.
    pub fn unpack_data<T: std::any::Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let handle = self.resolve_payload(&self.router).ok()??;
        handle.downcast::<T>().ok()
    }

    /// The payload as a shared handle, unpacking through the router when
    /// the content has been packed.
    pub fn resolve_payload(&self, router: &Router) -> Result<Option<PayloadHandle>, PackError> {
        match self.content.as_ref() {
            None => Ok(None),
            Some(c) if c.is_packed() => router.unpack_content(c),
            Some(c) => Ok(c.payload_handle()),
        }
    }

    /// Store the reply the completer will deliver.
    pub fn respond(&mut self, content: Content) {
        self.response = Some(content);
    }

    pub fn response(&self) -> Option<&Content> {
        self.response.as_ref()
    }

    /// Fulfil the completer, if one is attached, with whatever response has
    /// been stored. Safe to call when no completer is present.
    pub fn finish(&mut self) {
        if let Some(completer) = self.completer.take() {
            completer.complete(self.response.take());
        }
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        // A dropped signal must not leave its requester waiting forever.
        self.finish();
    }
}
