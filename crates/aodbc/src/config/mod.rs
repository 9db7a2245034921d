//! Configuration management
//!
//! Options are plain structs with builder-style setters. Pool settings can
//! also be loaded with precedence: env > file > defaults.

mod env;
mod file;
mod options;

pub use options::{ConnectOptions, DEFAULT_MAXSIZE, DEFAULT_MINSIZE, PoolConfig};

use crate::error::Result;

/// Load pool configuration with precedence: env > file > defaults
pub fn load_config() -> Result<PoolConfig> {
    let mut config = PoolConfig::default();

    if let Some(path) = file::find_config_file() {
        tracing::info!("Loading configuration from {}", path.display());
        config = file::load_from_file(&path, config)?;
    }

    env::load_from_env(config)
}

/// Load pool configuration from a specific file path, then apply env overrides
pub fn load_config_from_path(path: &std::path::Path) -> Result<PoolConfig> {
    let config = file::load_from_file(path, PoolConfig::default())?;
    env::load_from_env(config)
}
