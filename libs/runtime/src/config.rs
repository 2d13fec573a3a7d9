//! Runtime configuration
//!
//! Serde-deserializable settings for composing a provider from a TOML file
//! with `SPINDLE_`-prefixed environment overrides. Everything has a
//! default, so hosts that configure in code never touch this module.

use crate::schema::{DedicatedSchema, PooledSchema, Schema};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use spindle_codec::RouterOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Top-level runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Router construction options.
    pub router: RouterOptions,
    /// Parallelism strategy settings.
    pub schema: SchemaSettings,
}

/// Which scheduling backend hosts the models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// One dedicated worker thread per model.
    #[default]
    Dedicated,
    /// Supervised shared worker pool.
    Pooled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSettings {
    pub kind: SchemaKind,
    /// Pool slots; defaults to the host's available parallelism.
    pub target_pools: Option<usize>,
    /// Containers per pool slot.
    pub target_density: usize,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            kind: SchemaKind::Dedicated,
            target_pools: None,
            target_density: 1,
        }
    }
}

impl SchemaSettings {
    /// Instantiate the configured schema.
    pub fn build(&self) -> Arc<dyn Schema> {
        match self.kind {
            SchemaKind::Dedicated => DedicatedSchema::new(),
            SchemaKind::Pooled => PooledSchema::new(self.target_pools, self.target_density),
        }
    }
}

/// Load configuration from an optional TOML file with environment
/// overrides (`SPINDLE_` prefix). A missing file falls back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        info!(path = %path.display(), "loading runtime config");
        builder = builder.add_source(File::from(path.to_path_buf()).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix("SPINDLE")
            .separator("_")
            .try_parsing(true),
    );

    let config = builder.build().context("failed to build configuration")?;
    config
        .try_deserialize()
        .context("failed to deserialize runtime configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pick_the_dedicated_schema() {
        let config = RuntimeConfig::default();
        assert_eq!(config.schema.kind, SchemaKind::Dedicated);
        assert_eq!(config.schema.target_density, 1);
        assert!(config.router.default_signals);
        assert!(config.router.default_codecs);
    }

    #[test]
    fn kind_deserializes_snake_case() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{"schema": {"kind": "pooled", "target_pools": 2, "target_density": 4}}"#,
        )
        .unwrap();
        assert_eq!(config.schema.kind, SchemaKind::Pooled);
        assert_eq!(config.schema.target_pools, Some(2));
        assert_eq!(config.schema.target_density, 4);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.schema.kind, SchemaKind::Dedicated);
    }
}
