//! Configuration for tankard.
//!
//! Provides TOML-based configuration with:
//! - A `[cache]` section describing the default backend and expiration policy
//! - A `[session]` section for the session store
//! - Config file layering (XDG user config + project-local overrides)
//!
//! Parsed sections convert into [`tankard_cache::CacheConfig`] and
//! [`tankard_cache::SessionConfig`].

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_DIR_ENV, ConfigSource, LoadedConfig, load_config, load_config_file,
    load_config_with_options, save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
