//! # Spindle Runtime - Models, Containers, Schemas, Provider
//!
//! ## Purpose
//!
//! The scheduling half of spindle. Models own inboxes and react to signals;
//! containers drive each model's processing loop with pause/resume/kill
//! lifecycle; a pluggable parallelism schema decides whether a model gets a
//! dedicated worker thread or a slot in a supervised pool; the provider
//! composes the whole process and owns startup and shutdown.
//!
//! ## Quick Start
//!
//! ```no_run
//! use spindle_codec::RouterOptions;
//! use spindle_runtime::{DedicatedSchema, Model, ModelCore, Provider};
//! use std::sync::Arc;
//!
//! struct Echo {
//!     core: ModelCore,
//! }
//!
//! impl Model for Echo {
//!     fn core(&self) -> &ModelCore {
//!         &self.core
//!     }
//! }
//!
//! let provider = Provider::new(RouterOptions::default(), DedicatedSchema::new());
//! provider
//!     .router()
//!     .register_signal_typed::<String, _>("echo", |_, _, _, text| {
//!         println!("{text}");
//!         Ok(())
//!     })
//!     .unwrap();
//! provider.start();
//!
//! let echo = Arc::new(Echo { core: ModelCore::new(&provider) });
//! provider.spawn(echo.clone());
//! provider
//!     .registry()
//!     .send("echo", Some("hello".to_string()), Some(echo.core().id()), None)
//!     .unwrap();
//! ```
//!
//! ## Concurrency Model
//!
//! Delivery is FIFO per sender→destination pair; concurrent senders
//! interleave arbitrarily. Handlers run to completion on whichever thread
//! the container provides. Under the dedicated schema handlers may block;
//! under the pooled schema they must stay short and cooperative.

pub mod config;
pub mod container;
pub mod gate;
pub mod model;
pub mod provider;
pub mod registry;
pub mod schema;

pub use config::{load_config, RuntimeConfig, SchemaKind, SchemaSettings};
pub use container::{Container, GATE_TIMEOUT, PERFORMANCE_INTERVAL};
pub use gate::Gate;
pub use model::{Model, ModelCore};
pub use provider::{HostError, ModelError, Provider};
pub use registry::{ModelRegistry, SendError};
pub use schema::{DedicatedSchema, PooledSchema, Schema};
