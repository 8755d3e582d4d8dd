//! Figment-based configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;

use crate::domain::models::Config;

/// Configuration loader.
///
/// Precedence (lowest to highest):
/// 1. Programmatic defaults
/// 2. `argus.yaml` in the working directory
/// 3. Environment variables with the `ARGUS_` prefix (`__` separates levels,
///    e.g. `ARGUS_PIPELINE__BATCH_SIZE=500`)
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("argus.yaml"))
            .merge(Env::prefixed("ARGUS_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from an explicit file, still honoring environment overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("ARGUS_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {:?}", path.as_ref()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<()> {
        anyhow::ensure!(
            config.pipeline.ring_buffer_size > 0,
            "pipeline.ring_buffer_size must be positive"
        );
        anyhow::ensure!(
            config.pipeline.batch_size > 0,
            "pipeline.batch_size must be positive"
        );
        anyhow::ensure!(
            config.pipeline.writer_threads == 1,
            "pipeline.writer_threads: only a single writer is supported"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&config.slo.default_availability),
            "slo.default_availability must be within 0.0..=1.0"
        );
        anyhow::ensure!(
            config.mcp.reconnection.multiplier >= 1.0,
            "mcp.reconnection.multiplier must be at least 1.0"
        );
        anyhow::ensure!(
            !config.database.path.is_empty(),
            "database.path must not be empty"
        );
        Ok(())
    }
}
