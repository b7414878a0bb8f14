//! Process settings from the environment (a `.env` file is loaded first when present).

use crate::error::BootError;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SERVICE_NAME: &str = "scaffold";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// One optional diagnostics HTTP listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerConfig {
    pub enabled: bool,
    pub listen: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    pub process_inspect: ListenerConfig,
    pub stats: ListenerConfig,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        DiagnosticsConfig {
            process_inspect: ListenerConfig {
                enabled: false,
                listen: "127.0.0.1".into(),
                port: 6060,
            },
            stats: ListenerConfig {
                enabled: false,
                listen: "127.0.0.1".into(),
                port: 6061,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub service_name: String,
    pub listen_addr: String,
    /// Postgres storage is used when set; in-memory storage otherwise.
    pub database_url: Option<String>,
    pub database_schema: String,
    pub body_limit_bytes: usize,
    pub temp_dir: PathBuf,
    pub diagnostics: DiagnosticsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            service_name: DEFAULT_SERVICE_NAME.into(),
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            database_url: None,
            database_schema: DEFAULT_SCHEMA.into(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            temp_dir: default_temp_dir(DEFAULT_SERVICE_NAME),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

fn default_temp_dir(service: &str) -> PathBuf {
    PathBuf::from("/tmp").join(service)
}

impl Settings {
    pub fn from_env() -> Result<Self, BootError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BootError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();
        let service_name = get("SERVICE_NAME").unwrap_or(defaults.service_name);
        let temp_dir = get("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_temp_dir(&service_name));
        let d = defaults.diagnostics;
        Ok(Settings {
            listen_addr: get("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: get("DATABASE_URL"),
            database_schema: get("DATABASE_SCHEMA").unwrap_or(defaults.database_schema),
            body_limit_bytes: parse(&get, "BODY_LIMIT_BYTES", defaults.body_limit_bytes)?,
            temp_dir,
            diagnostics: DiagnosticsConfig {
                process_inspect: ListenerConfig {
                    enabled: parse_bool(&get, "DIAGNOSTICS_PROCESS_INSPECT_ENABLE", d.process_inspect.enabled)?,
                    listen: get("DIAGNOSTICS_PROCESS_INSPECT_LISTEN").unwrap_or(d.process_inspect.listen),
                    port: parse(&get, "DIAGNOSTICS_PROCESS_INSPECT_PORT", d.process_inspect.port)?,
                },
                stats: ListenerConfig {
                    enabled: parse_bool(&get, "DIAGNOSTICS_STATS_ENABLE", d.stats.enabled)?,
                    listen: get("DIAGNOSTICS_STATS_LISTEN").unwrap_or(d.stats.listen),
                    port: parse(&get, "DIAGNOSTICS_STATS_PORT", d.stats.port)?,
                },
            },
            service_name,
        })
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, BootError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|e| BootError::Settings(format!("{}={:?}: {}", key, v, e))),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool, BootError> {
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(BootError::Settings(format!("{}={:?}: expected a boolean", key, v))),
        },
    }
}
