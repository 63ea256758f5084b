//! CLI command handlers.

use std::path::PathBuf;

use anyhow::Result;
use tankard_cache::{CacheConfig, CacheManager};
use tankard_config::{CacheSection, LoadedConfig, TankardConfig};

pub mod cache;
pub mod config;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Discovered config files, before command-line overrides.
    pub loaded: LoadedConfig,
    /// Effective configuration with command-line overrides applied.
    pub config: TankardConfig,
    /// User config directory, if one could be determined.
    pub config_dir: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn new(
        loaded: LoadedConfig,
        config_dir: Option<PathBuf>,
        overrides: CacheSection,
        json_output: bool,
        verbose: bool,
    ) -> Self {
        let mut config = loaded.config.clone();
        config.merge(TankardConfig {
            cache: Some(overrides),
            session: None,
        });
        Self {
            loaded,
            config,
            config_dir,
            json_output,
            verbose,
        }
    }

    /// The effective cache configuration.
    ///
    /// Fails only when a command actually needs a cache, so `config show`
    /// still works on a broken config.
    pub fn cache_config(&self) -> Result<CacheConfig> {
        Ok(self.config.to_cache_config()?)
    }

    /// A registry built from the effective cache configuration.
    pub fn manager(&self) -> Result<CacheManager> {
        Ok(CacheManager::new(self.cache_config()?))
    }
}
