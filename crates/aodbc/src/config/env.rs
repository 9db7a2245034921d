//! Environment variable loading for configuration

use std::env;

use super::file::recycle_from_secs;
use super::options::PoolConfig;
use crate::error::{Error, Result};

/// Environment variable names
mod vars {
    pub const DSN: &str = "AODBC_DSN";
    pub const AUTOCOMMIT: &str = "AODBC_AUTOCOMMIT";
    pub const ANSI: &str = "AODBC_ANSI";
    pub const TIMEOUT: &str = "AODBC_TIMEOUT";
    pub const ECHO: &str = "AODBC_ECHO";
    pub const POOL_MINSIZE: &str = "AODBC_POOL_MINSIZE";
    pub const POOL_MAXSIZE: &str = "AODBC_POOL_MAXSIZE";
    pub const POOL_RECYCLE: &str = "AODBC_POOL_RECYCLE";
}

/// Apply environment overrides.
pub fn load_from_env(mut config: PoolConfig) -> Result<PoolConfig> {
    if let Ok(dsn) = env::var(vars::DSN) {
        config.dsn = dsn;
    }

    if let Ok(val) = env::var(vars::AUTOCOMMIT) {
        config.connect.autocommit = parse_bool(&val);
    }

    if let Ok(val) = env::var(vars::ANSI) {
        config.connect.ansi = parse_bool(&val);
    }

    if let Ok(val) = env::var(vars::TIMEOUT) {
        config.connect.timeout = parse_number(vars::TIMEOUT, &val)?;
    }

    // Echo applies to direct connections and pooled ones alike.
    if let Ok(val) = env::var(vars::ECHO) {
        let echo = parse_bool(&val);
        config.connect.echo = echo;
        config.echo = echo;
    }

    if let Ok(val) = env::var(vars::POOL_MINSIZE) {
        config.minsize = parse_number(vars::POOL_MINSIZE, &val)?;
    }

    if let Ok(val) = env::var(vars::POOL_MAXSIZE) {
        config.maxsize = parse_number(vars::POOL_MAXSIZE, &val)?;
    }

    if let Ok(val) = env::var(vars::POOL_RECYCLE) {
        config.pool_recycle = recycle_from_secs(parse_number(vars::POOL_RECYCLE, &val)?);
    }

    Ok(config)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        vars::DSN,
        vars::AUTOCOMMIT,
        vars::ANSI,
        vars::TIMEOUT,
        vars::ECHO,
        vars::POOL_MINSIZE,
        vars::POOL_MAXSIZE,
        vars::POOL_RECYCLE,
    ];

    fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_MUTEX.lock().unwrap();

        let old_values: Vec<_> = ALL_VARS.iter().map(|k| (*k, env::var(k).ok())).collect();

        for key in ALL_VARS {
            // SAFETY: We hold a mutex lock to ensure no concurrent modifications
            unsafe { env::remove_var(key) };
        }
        for (key, value) in vars {
            // SAFETY: We hold a mutex lock to ensure no concurrent modifications
            unsafe { env::set_var(key, value) };
        }

        let result = f();

        for (key, old_value) in old_values {
            match old_value {
                // SAFETY: We hold a mutex lock to ensure no concurrent modifications
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("maybe"));
    }

    #[test]
    fn test_no_env_keeps_config() {
        let config = with_env_vars(&[], || {
            load_from_env(PoolConfig::new("Database=a.db")).unwrap()
        });
        assert_eq!(config.dsn, "Database=a.db");
        assert_eq!(config.minsize, 10);
    }

    #[test]
    fn test_env_overrides() {
        let config = with_env_vars(
            &[
                (vars::DSN, "Database=b.db"),
                (vars::AUTOCOMMIT, "yes"),
                (vars::TIMEOUT, "30"),
                (vars::ECHO, "1"),
                (vars::POOL_MINSIZE, "1"),
                (vars::POOL_MAXSIZE, "4"),
                (vars::POOL_RECYCLE, "60"),
            ],
            || load_from_env(PoolConfig::default()).unwrap(),
        );
        assert_eq!(config.dsn, "Database=b.db");
        assert!(config.connect.autocommit);
        assert!(!config.connect.ansi);
        assert_eq!(config.connect.timeout, 30);
        assert!(config.connect.echo);
        assert!(config.echo);
        assert_eq!(config.minsize, 1);
        assert_eq!(config.maxsize, 4);
        assert_eq!(config.pool_recycle, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_env_recycle_negative_disables() {
        let config = with_env_vars(&[(vars::POOL_RECYCLE, "-1")], || {
            load_from_env(PoolConfig::default().pool_recycle(Some(Duration::from_secs(5)))).unwrap()
        });
        assert!(config.pool_recycle.is_none());
    }

    #[test]
    fn test_env_invalid_number() {
        let err = with_env_vars(&[(vars::POOL_MAXSIZE, "many")], || {
            load_from_env(PoolConfig::default()).unwrap_err()
        });
        assert!(err.to_string().contains("Invalid AODBC_POOL_MAXSIZE"));
    }
}
