//! Application configuration.
//!
//! Loaded once at startup from a JSON file, then overridden by environment
//! variables. The resulting value is passed to every component that needs it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use crate::utils::http_client::header_map;
use crate::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The file did not exist.
    Defaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Headers sent upstream and handed to the fetch engine.
    pub headers: BTreeMap<String, String>,
    pub aria2_rpc_url: String,
    pub aria2_secret: Option<String>,
    pub bind_address: String,
    pub proxy_port: u16,
    pub cache_dir: PathBuf,
    /// Defaults to `sqlite:{cache_dir}/tasks.db?mode=rwc`.
    pub database_url: Option<String>,
    pub log_dir: PathBuf,
    pub web_dir: PathBuf,
    /// Proxy base for tasks added through the API, e.g. `http://host:8084/proxy`.
    pub public_base_url: Option<String>,
    pub incomplete_marker_suffix: String,
    pub playlist_timeout_secs: u64,
    pub engine_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());

        Self {
            headers,
            aria2_rpc_url: "http://localhost:6800/jsonrpc".to_string(),
            aria2_secret: None,
            bind_address: "0.0.0.0".to_string(),
            proxy_port: 8084,
            cache_dir: PathBuf::from("./cache"),
            database_url: None,
            log_dir: PathBuf::from("./logs"),
            web_dir: PathBuf::from("./web"),
            public_base_url: None,
            incomplete_marker_suffix: ".aria2".to_string(),
            playlist_timeout_secs: 30,
            engine_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    /// Environment overrides are applied afterwards.
    ///
    /// Runs before logging is initialized, so the caller reports the source.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, ConfigSource)> {
        let path = path.as_ref();
        let (mut config, source) = match std::fs::read_to_string(path) {
            Ok(raw) => {
                let config: Self = serde_json::from_str(&raw).map_err(|e| {
                    Error::config(format!("Invalid config file {}: {e}", path.display()))
                })?;
                (config, ConfigSource::File(path.to_path_buf()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (Self::default(), ConfigSource::Defaults)
            }
            Err(e) => return Err(Error::io_path("reading config file", path, e)),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok((config, source))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HLS_ACCEL_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = get("HLS_ACCEL_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.proxy_port = port;
        }
        if let Some(v) = get("HLS_ACCEL_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("HLS_ACCEL_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = get("HLS_ACCEL_PUBLIC_BASE_URL") {
            self.public_base_url = Some(v);
        }
        if let Some(v) = get("ARIA2_RPC_URL") {
            self.aria2_rpc_url = v;
        }
        if let Some(v) = get("ARIA2_SECRET") {
            self.aria2_secret = Some(v);
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database_url = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.aria2_rpc_url.trim().is_empty() {
            return Err(Error::config("aria2_rpc_url must not be empty"));
        }
        url::Url::parse(&self.aria2_rpc_url)
            .map_err(|e| Error::config(format!("Invalid aria2_rpc_url: {e}")))?;
        if self.proxy_port == 0 {
            return Err(Error::config("proxy_port must not be 0"));
        }
        if self.incomplete_marker_suffix.is_empty() {
            return Err(Error::config("incomplete_marker_suffix must not be empty"));
        }
        header_map(&self.headers)?;
        Ok(())
    }

    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!(
                "sqlite:{}?mode=rwc",
                self.cache_dir.join("tasks.db").display()
            )
        })
    }

    /// Proxy base used when no request host is available.
    pub fn default_proxy_base(&self) -> String {
        match &self.public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}/proxy", self.proxy_port),
        }
    }

    pub fn playlist_timeout(&self) -> Duration {
        Duration::from_secs(self.playlist_timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}
