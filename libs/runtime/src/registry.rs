//! Model registry
//!
//! The concurrent address → model map plus the send primitives that resolve
//! destinations. Registration and deregistration are idempotent; sends with
//! no explicit destination or sender default to the provider's core model.

use crate::model::Model;
use crate::provider::Provider;
use dashmap::DashMap;
use parking_lot::RwLock;
use spindle_codec::{Completer, Reply, RouterError, Signal};
use spindle_types::ModelId;
use std::any::Any;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors from the send primitives.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Router(#[from] RouterError),

    /// No model is registered under the destination address.
    #[error("destination model {id} is not registered")]
    UnknownDestination { id: ModelId },

    /// The destination refused the signal at the fast path.
    #[error("destination model {id} refused the signal (paused or closing)")]
    Rejected { id: ModelId },

    /// The provider is gone or was never started.
    #[error("provider unavailable (not started or already dropped)")]
    ProviderGone,
}

/// Concurrent ModelId → model map with send primitives.
pub struct ModelRegistry {
    models: DashMap<u64, Arc<dyn Model>>,
    provider: RwLock<Weak<Provider>>,
}

impl ModelRegistry {
    pub(crate) fn new() -> ModelRegistry {
        ModelRegistry {
            models: DashMap::new(),
            provider: RwLock::new(Weak::new()),
        }
    }

    pub(crate) fn bind(&self, provider: &Arc<Provider>) {
        *self.provider.write() = Arc::downgrade(provider);
    }

    fn provider(&self) -> Result<Arc<Provider>, SendError> {
        self.provider.read().upgrade().ok_or(SendError::ProviderGone)
    }

    /// Register a model under its core's id. Idempotent: re-registering
    /// the same address replaces the entry.
    pub fn register(&self, model: Arc<dyn Model>) {
        let id = model.core().id();
        self.models.insert(id.value(), model);
        debug!(model = %id, total = self.models.len(), "model registered");
    }

    /// Remove a model. Idempotent.
    pub fn deregister(&self, id: ModelId) {
        if self.models.remove(&id.value()).is_some() {
            debug!(model = %id, total = self.models.len(), "model deregistered");
        }
    }

    pub fn get(&self, id: ModelId) -> Option<Arc<dyn Model>> {
        self.models.get(&id.value()).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.models.contains_key(&id.value())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Snapshot of every registered address.
    pub fn ids(&self) -> Vec<ModelId> {
        self.models
            .iter()
            .map(|entry| entry.value().core().id())
            .collect()
    }

    /// Build and send a signal by name. Missing destination or sender
    /// defaults to the provider's core model. Returns whether the
    /// destination accepted the signal.
    pub fn send<T: Any + Send + Sync>(
        &self,
        name: &str,
        data: Option<T>,
        destination: Option<ModelId>,
        sender: Option<ModelId>,
    ) -> Result<bool, SendError> {
        let signal = self.build_signal(name, data, destination, sender)?;
        self.send_signal(signal)
    }

    /// Send a pre-built signal to its destination's fast path.
    pub fn send_signal(&self, signal: Signal) -> Result<bool, SendError> {
        let destination = signal.destination();
        let model = self
            .get(destination)
            .ok_or(SendError::UnknownDestination { id: destination })?;
        let accepted = model.core().receive(signal);
        trace!(model = %destination, accepted, "signal delivered to fast path");
        Ok(accepted)
    }

    /// Request/reply: like [`ModelRegistry::send`], with a one-shot
    /// completer attached. The returned [`Reply`] resolves once the
    /// destination's loop has run every handler phase for the signal.
    /// Refusal at the fast path surfaces immediately as an error.
    pub fn request<T: Any + Send + Sync>(
        &self,
        name: &str,
        data: Option<T>,
        destination: Option<ModelId>,
        sender: Option<ModelId>,
    ) -> Result<Reply, SendError> {
        let signal = self.build_signal(name, data, destination, sender)?;
        let destination = signal.destination();
        let (completer, reply) = Completer::new_pair();
        if !self.send_signal(signal.with_completer(completer))? {
            return Err(SendError::Rejected { id: destination });
        }
        Ok(reply)
    }

    fn build_signal<T: Any + Send + Sync>(
        &self,
        name: &str,
        data: Option<T>,
        destination: Option<ModelId>,
        sender: Option<ModelId>,
    ) -> Result<Signal, SendError> {
        let provider = self.provider()?;
        let core = provider.core_id();
        let destination = destination.or(core).ok_or(SendError::ProviderGone)?;
        let content = provider.router().build_content(name, data)?;
        let mut signal = Signal::new(provider.router().clone(), destination, Some(content));
        if let Some(sender) = sender.or(core) {
            signal = signal.with_sender(sender);
        }
        Ok(signal)
    }
}
