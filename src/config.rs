//! Application-level configuration loading, including the session timing knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LUCKY_DRAW_CONFIG_PATH";
/// Environment variable selecting the storage backend.
const STORE_BACKEND_ENV: &str = "STORE_BACKEND";

const DEFAULT_SESSION_DURATION_SECS: u64 = 30;
const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_END_GRACE_MS: u64 = 250;

/// Which [`SessionStore`](crate::dao::session_store::SessionStore) implementation backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local store, lost on restart.
    Memory,
    /// MongoDB replica set.
    Mongo,
}

impl StoreBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "mongo" | "mongodb" => Some(Self::Mongo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Length of each guessing window.
    pub session_duration: Duration,
    /// Idle period between a session ending and the next one opening.
    pub cooldown: Duration,
    /// Period of the scheduler tick.
    pub tick_interval: Duration,
    /// Delay past a session deadline before its dedicated end timer fires.
    pub end_grace: Duration,
    /// Selected storage backend.
    pub store: StoreBackend,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        session_duration_secs = config.session_duration.as_secs(),
                        cooldown_secs = config.cooldown.as_secs(),
                        "loaded session timings from config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        if let Ok(value) = env::var(STORE_BACKEND_ENV) {
            match StoreBackend::parse(&value) {
                Some(store) => config.store = store,
                None => warn!(value, "unknown STORE_BACKEND; keeping configured backend"),
            }
        }

        config
    }

    /// Parse a JSON document, rejecting zero-length timings.
    pub fn from_json(contents: &str) -> Result<Self, String> {
        let raw = serde_json::from_str::<RawConfig>(contents).map_err(|err| err.to_string())?;
        raw.try_into()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_duration: Duration::from_secs(DEFAULT_SESSION_DURATION_SECS),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            end_grace: Duration::from_millis(DEFAULT_END_GRACE_MS),
            store: StoreBackend::Memory,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    session_duration_secs: u64,
    cooldown_secs: u64,
    tick_interval_ms: u64,
    end_grace_ms: u64,
    store: StoreBackend,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            end_grace_ms: DEFAULT_END_GRACE_MS,
            store: StoreBackend::Memory,
        }
    }
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = String;

    fn try_from(value: RawConfig) -> Result<Self, Self::Error> {
        if value.session_duration_secs == 0 {
            return Err("session_duration_secs must be strictly positive".into());
        }
        if value.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be strictly positive".into());
        }

        Ok(Self {
            session_duration: Duration::from_secs(value.session_duration_secs),
            cooldown: Duration::from_secs(value.cooldown_secs),
            tick_interval: Duration::from_millis(value.tick_interval_ms),
            end_grace: Duration::from_millis(value.end_grace_ms),
            store: value.store,
        })
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
