//! Runtime configuration, read from `BACKBONE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const API_URL_ENV: &str = "BACKBONE_API_URL";
pub const API_TOKEN_ENV: &str = "BACKBONE_API_TOKEN";
pub const DATA_DIR_ENV: &str = "BACKBONE_DATA_DIR";
pub const STORE_ENV: &str = "BACKBONE_STORE";
pub const SYNC_INTERVAL_ENV: &str = "BACKBONE_SYNC_INTERVAL_SECS";
pub const PROBE_TIMEOUT_ENV: &str = "BACKBONE_PROBE_TIMEOUT_SECS";
pub const REQUEST_TIMEOUT_ENV: &str = "BACKBONE_REQUEST_TIMEOUT_SECS";
pub const MONITOR_INTERVAL_ENV: &str = "BACKBONE_MONITOR_INTERVAL_SECS";
pub const MAX_ATTEMPTS_ENV: &str = "BACKBONE_MAX_SYNC_ATTEMPTS";

const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
    #[error("BACKBONE_STORE must be one of auto, file; got '{0}'")]
    InvalidStoreBackend(String),
    #[error("could not resolve a data directory; set BACKBONE_DATA_DIR")]
    NoDataDir,
}

/// Which local store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePreference {
    /// Embedded database, falling back to the flat file store.
    Auto,
    /// Flat file store, skipping the embedded database.
    File,
}

impl StorePreference {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(StorePreference::Auto),
            "file" | "json" => Ok(StorePreference::File),
            _ => Err(ConfigError::InvalidStoreBackend(value.to_string())),
        }
    }
}

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub data_dir: PathBuf,
    pub store: StorePreference,
    /// Period of the background pass while online.
    pub sync_interval: Duration,
    /// Budget for the pre-pass reachability request.
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
    /// How often the daemon re-checks reachability to feed the probe.
    pub monitor_interval: Duration,
    /// `None` retries failing queue items forever.
    pub max_attempts: Option<u32>,
}

impl SyncConfig {
    /// Configuration with defaults, storing data under `data_dir`.
    pub fn new(api_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_url: api_url.into(),
            api_token: None,
            data_dir: data_dir.into(),
            store: StorePreference::Auto,
            sync_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(15),
            max_attempts: None,
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup(API_URL_ENV)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let data_dir = match lookup(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir().ok_or(ConfigError::NoDataDir)?,
        };

        let mut config = Self::new(api_url, data_dir);
        config.api_token = lookup(API_TOKEN_ENV).filter(|v| !v.is_empty());

        if let Some(store) = lookup(STORE_ENV) {
            config.store = StorePreference::parse(&store)?;
        }
        if let Some(secs) = parse_secs(&lookup, SYNC_INTERVAL_ENV)? {
            config.sync_interval = secs;
        }
        if let Some(secs) = parse_secs(&lookup, PROBE_TIMEOUT_ENV)? {
            config.probe_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, REQUEST_TIMEOUT_ENV)? {
            config.request_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, MONITOR_INTERVAL_ENV)? {
            config.monitor_interval = secs;
        }
        config.max_attempts = parse_positive(&lookup, MAX_ATTEMPTS_ENV)?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));

        Ok(config)
    }

    /// Origin-like scope used to keep stores of different servers apart.
    ///
    /// `https://api.example.com:8443/v1` becomes `api.example.com_8443`.
    pub fn store_scope(&self) -> String {
        let without_scheme = self
            .api_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.api_url);
        let authority = without_scheme.split('/').next().unwrap_or_default();
        let scope: String = authority
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        if scope.is_empty() { "default".to_string() } else { scope }
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(format!("offline-{}.db", self.store_scope()))
    }

    pub fn file_store_path(&self) -> PathBuf {
        self.data_dir.join(format!("offline-{}.json", self.store_scope()))
    }
}

/// `{app_data_dir}/backbone`, or `~/.local/share/backbone` when the OS has
/// no data directory.
fn default_data_dir() -> Option<PathBuf> {
    let base = dirs::data_dir().or_else(|| {
        dirs::home_dir().map(|mut h| {
            h.push(".local");
            h.push("share");
            h
        })
    })?;
    Some(base.join("backbone"))
}

fn parse_positive<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { var, value: raw }),
    }
}

fn parse_secs<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_positive(lookup, var)?.map(Duration::from_secs))
}
