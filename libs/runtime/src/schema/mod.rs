//! Parallelism schemas
//!
//! A schema is the dependency-injected scheduling backend: it manufactures
//! a container for each model the provider hands it and decides what
//! drives that container's loop. Two strategies ship:
//!
//! - [`dedicated::DedicatedSchema`]: one long-running worker thread per
//!   model. Handlers may block; throughput scales with thread count.
//! - [`pooled::PooledSchema`]: a supervised pool of shared workers
//!   draining a central update queue. Handlers must stay short and
//!   cooperative so a bounded number of workers can serve many models.

pub mod dedicated;
pub mod pooled;

use crate::container::Container;
use crate::model::Model;
use crate::provider::Provider;
use std::sync::Arc;

pub use dedicated::DedicatedSchema;
pub use pooled::PooledSchema;

/// Factory and owner of the containers for one provider.
pub trait Schema: Send + Sync {
    /// Late-bind the provider; called once from [`Provider::new`].
    fn bind(&self, provider: &Arc<Provider>);

    /// Build a container for the model, wire it up and start hosting.
    fn attach(&self, provider: &Arc<Provider>, model: Arc<dyn Model>) -> Arc<dyn Container>;

    /// Snapshot of the containers this schema currently owns.
    fn containers(&self) -> Vec<Arc<dyn Container>>;

    /// Shutdown is underway: wind down shared machinery once the last
    /// container closes.
    fn begin_shutdown(&self);
}
