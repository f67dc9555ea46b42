//! Client configuration and optional TOML config file loading.
//!
//! Search order when no explicit path is given: `./wechat.toml`, then
//! `$XDG_CONFIG_HOME/wechat-rust/config.toml` (or the platform equivalent).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "wechat.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cannot render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Configuration used by the WeChat client.
///
/// Every field has a default; a config file only needs the keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WechatConfig {
    /// Directory holding the cached session artifacts.
    pub cache_dir: PathBuf,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Application identifier sent when requesting a login ticket.
    pub app_id: String,
    pub lang: String,
    /// Host serving the ticket and scan-status endpoints.
    pub login_host: String,
    /// Per-request timeout; must exceed the server's long-poll hold time.
    pub http_timeout_secs: u64,
    /// Backoff unit between failed logins.
    pub retry_unit_secs: u64,
    /// Upper bound on the backoff multiplier.
    pub max_backoff_steps: u32,
    /// Capacity of the channel carrying server events into the bus.
    pub server_event_buffer: usize,
}

impl Default for WechatConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".into(),
            app_id: "wx782c26e4c19acffb".into(),
            lang: "zh_CN".into(),
            login_host: "https://login.weixin.qq.com".into(),
            http_timeout_secs: 40,
            retry_unit_secs: 60,
            max_backoff_steps: 60,
            server_event_buffer: 10,
        }
    }
}

impl WechatConfig {
    /// Override the session cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Override the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Override the login host.
    pub fn with_login_host(mut self, host: impl Into<String>) -> Self {
        self.login_host = host.into();
        self
    }

    /// Override the per-request timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout_secs = timeout.as_secs();
        self
    }

    /// Override the backoff unit.
    pub fn with_retry_unit(mut self, unit: Duration) -> Self {
        self.retry_unit_secs = unit.as_secs();
        self
    }

    /// Override the backoff cap.
    pub fn with_max_backoff_steps(mut self, steps: u32) -> Self {
        self.max_backoff_steps = steps;
        self
    }

    /// Override the server event buffer size.
    pub fn with_server_event_buffer(mut self, buffer: usize) -> Self {
        self.server_event_buffer = buffer;
        self
    }

    pub fn retry_unit(&self) -> Duration {
        Duration::from_secs(self.retry_unit_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Parse a TOML document.
    pub fn from_toml(source: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source, path)
    }

    /// Load the effective configuration.
    ///
    /// An explicit path must exist. Otherwise the first existing file in the
    /// search order is used, and defaults apply when there is none. Returns
    /// the path that was read, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }
        for path in search_paths() {
            if path.exists() {
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Config files consulted when no explicit path is given, in order.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("wechat-rust").join("config.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = WechatConfig::default()
            .with_cache_dir("/tmp/wx")
            .with_user_agent("bot/1.0")
            .with_retry_unit(Duration::from_secs(5))
            .with_max_backoff_steps(3)
            .with_http_timeout(Duration::from_secs(30));

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/wx"));
        assert_eq!(config.user_agent, "bot/1.0");
        assert_eq!(config.retry_unit(), Duration::from_secs(5));
        assert_eq!(config.max_backoff_steps, 3);
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.app_id, "wx782c26e4c19acffb");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let path = Path::new("wechat.toml");
        let config = WechatConfig::from_toml("retry_unit_secs = 1\ncache_dir = \"state\"", path).unwrap();
        assert_eq!(config.retry_unit_secs, 1);
        assert_eq!(config.cache_dir, PathBuf::from("state"));
        assert_eq!(config.http_timeout_secs, 40);
        assert_eq!(config.server_event_buffer, 10);

        let empty = WechatConfig::from_toml("", path).unwrap();
        assert_eq!(empty, WechatConfig::default());
    }

    #[test]
    fn test_invalid_toml_errors() {
        let err = WechatConfig::from_toml("retry_unit_secs = [", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = std::env::temp_dir().join(format!("wechat-config-{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "max_backoff_steps = 7\n").unwrap();

        let (config, used) = WechatConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_backoff_steps, 7);
        assert_eq!(used.as_deref(), Some(path.as_path()));

        let missing = dir.join("missing.toml");
        assert!(matches!(
            WechatConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_render_round_trips() {
        let config = WechatConfig::default().with_max_backoff_steps(9);
        let rendered = config.to_toml().unwrap();
        assert_eq!(WechatConfig::from_toml(&rendered, Path::new("x")).unwrap(), config);
    }
}
