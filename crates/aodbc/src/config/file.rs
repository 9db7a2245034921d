//! TOML configuration file loading

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::options::PoolConfig;
use crate::error::{Error, Result};

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./aodbc.toml",
    "~/.config/aodbc/config.toml",
    "/etc/aodbc/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    for path_str in CONFIG_PATHS {
        let path = if path_str.starts_with('~') {
            if let Ok(home) = std::env::var("HOME") {
                PathBuf::from(path_str.replacen('~', &home, 1))
            } else {
                continue;
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, config: PoolConfig) -> Result<PoolConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(apply_file_config(config, file_config))
}

/// Negative or absent recycle seconds disable recycling.
pub(super) fn recycle_from_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs).ok().map(Duration::from_secs)
}

fn apply_file_config(mut config: PoolConfig, file: FileConfig) -> PoolConfig {
    if let Some(conn) = file.connection {
        if let Some(dsn) = conn.dsn {
            config.dsn = dsn;
        }
        if let Some(autocommit) = conn.autocommit {
            config.connect.autocommit = autocommit;
        }
        if let Some(ansi) = conn.ansi {
            config.connect.ansi = ansi;
        }
        if let Some(timeout) = conn.timeout {
            config.connect.timeout = timeout;
        }
        if let Some(echo) = conn.echo {
            config.connect.echo = echo;
        }
        if let Some(options) = conn.options {
            config.connect.extra.extend(options);
        }
    }

    if let Some(pool) = file.pool {
        if let Some(minsize) = pool.minsize {
            config.minsize = minsize;
        }
        if let Some(maxsize) = pool.maxsize {
            config.maxsize = maxsize;
        }
        if let Some(echo) = pool.echo {
            config.echo = echo;
        }
        if let Some(secs) = pool.pool_recycle {
            config.pool_recycle = recycle_from_secs(secs);
        }
    }

    config
}

/// Root configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    connection: Option<ConnectionConfig>,
    pool: Option<PoolFileConfig>,
}

#[derive(Debug, Deserialize)]
struct ConnectionConfig {
    dsn: Option<String>,
    autocommit: Option<bool>,
    ansi: Option<bool>,
    timeout: Option<u32>,
    echo: Option<bool>,
    options: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct PoolFileConfig {
    minsize: Option<usize>,
    maxsize: Option<usize>,
    echo: Option<bool>,
    pool_recycle: Option<i64>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[connection]
dsn = "Database=/var/lib/app.db"
autocommit = true
timeout = 5
echo = true

[connection.options]
Mode = "rw"

[pool]
minsize = 2
maxsize = 8
pool_recycle = 3600
"#;
        let file_config: FileConfig = toml::from_str(toml_content).unwrap();
        let config = apply_file_config(PoolConfig::default(), file_config);

        assert_eq!(config.dsn, "Database=/var/lib/app.db");
        assert!(config.connect.autocommit);
        assert!(!config.connect.ansi);
        assert_eq!(config.connect.timeout, 5);
        assert!(config.connect.echo);
        assert!(!config.echo);
        assert_eq!(config.connect.extra.get("Mode").map(String::as_str), Some("rw"));
        assert_eq!(config.minsize, 2);
        assert_eq!(config.maxsize, 8);
        assert_eq!(config.pool_recycle, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let file_config: FileConfig = toml::from_str("[pool]\nmaxsize = 20\n").unwrap();
        let config = apply_file_config(PoolConfig::new("dsn"), file_config);

        assert_eq!(config.dsn, "dsn");
        assert_eq!(config.minsize, 10);
        assert_eq!(config.maxsize, 20);
    }

    #[test]
    fn test_negative_recycle_disables() {
        assert_eq!(recycle_from_secs(-1), None);
        assert_eq!(recycle_from_secs(0), Some(Duration::ZERO));

        let file_config: FileConfig = toml::from_str("[pool]\npool_recycle = -1\n").unwrap();
        let config = apply_file_config(
            PoolConfig::default().pool_recycle(Some(Duration::from_secs(1))),
            file_config,
        );
        assert!(config.pool_recycle.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_file = create_temp_config("[connection]\ndsn = \"Database=:memory:\"\n");
        let config = load_from_file(temp_file.path(), PoolConfig::default()).unwrap();
        assert_eq!(config.dsn, "Database=:memory:");
    }

    #[test]
    fn test_load_from_file_not_found() {
        let result = load_from_file(
            Path::new("/nonexistent/path/config.toml"),
            PoolConfig::default(),
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_from_file_invalid_toml() {
        let temp_file = create_temp_config("this is not valid toml {{{{");

        let err = load_from_file(temp_file.path(), PoolConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
