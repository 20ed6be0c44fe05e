use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Fixed administrator credentials (I5: never stored as a User, never
/// environment-configurable — see SPEC_FULL.md §9).
pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin123";

/// Process-wide settings, read once at startup and never reloaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub control_port: u16,
    pub data_port: u16,
    pub store_dir: PathBuf,
    pub inactivity_limit: Duration,
    pub idle_conn_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let control_port = parse_env("HONEYTRAP_CONTROL_PORT", 5000)?;
        let data_port = parse_env("HONEYTRAP_DATA_PORT", 5001)?;
        let store_dir = env::var("HONEYTRAP_STORE_DIR").unwrap_or_else(|_| "./data".to_string());
        let inactivity_limit_secs = parse_env("HONEYTRAP_INACTIVITY_LIMIT_SECS", 300)?;
        let idle_conn_timeout_secs = parse_env("HONEYTRAP_IDLE_CONN_TIMEOUT_SECS", 300)?;

        Ok(Config {
            control_port,
            data_port,
            store_dir: PathBuf::from(store_dir),
            inactivity_limit: Duration::from_secs(inactivity_limit_secs),
            idle_conn_timeout: Duration::from_secs(idle_conn_timeout_secs),
        })
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| Error::Config(format!("invalid {name}"))),
        Err(_) => Ok(default),
    }
}
