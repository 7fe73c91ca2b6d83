// src/config.rs
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::provider::rfd::RfdSource;
use crate::refresh::RefreshSettings;

pub const ENV_CONFIG_PATH: &str = "TOPICS_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/topics.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOPICS_CONFIG_PATH points to non-existent path {}", .0.display())]
    MissingFile(PathBuf),
    #[error("reading config from {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse {name}={value:?} as a number")]
    ParseNumber { name: String, value: String },
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// Service configuration. Every field has a default; a TOML file and then
/// environment variables may override them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http_host: String,
    pub http_port: u16,
    pub refresh_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub max_backoff_secs: u64,
    pub rfd_base_url: String,
    pub rfd_forum_id: u32,
    pub rfd_pages: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            refresh_interval_secs: 60,
            fetch_timeout_secs: 15,
            backoff_base_secs: 2,
            max_backoff_secs: 60,
            rfd_base_url: "https://forums.redflagdeals.com".to_string(),
            rfd_forum_id: 9,
            rfd_pages: 1,
        }
    }
}

impl Config {
    /// Resolve the full configuration:
    /// 1) `$TOPICS_CONFIG_PATH`, else `config/topics.toml` if present, else defaults
    /// 2) environment overrides
    /// 3) validation
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) if !p.trim().is_empty() => {
                let path = PathBuf::from(p);
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path));
                }
                Self::from_file(&path)?
            }
            _ => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Self::from_file(fallback)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults plus environment overrides, no file lookup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_str("HTTP_HOST") {
            self.http_host = v;
        }
        if let Some(v) = env_num("HTTP_PORT")? {
            self.http_port = v;
        }
        if let Some(v) = env_num("REFRESH_INTERVAL_SECS")? {
            self.refresh_interval_secs = v;
        }
        if let Some(v) = env_num("FETCH_TIMEOUT_SECS")? {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = env_num("BACKOFF_BASE_SECS")? {
            self.backoff_base_secs = v;
        }
        if let Some(v) = env_num("MAX_BACKOFF_SECS")? {
            self.max_backoff_secs = v;
        }
        if let Some(v) = env_str("RFD_BASE_URL") {
            self.rfd_base_url = v;
        }
        if let Some(v) = env_num("RFD_FORUM_ID")? {
            self.rfd_forum_id = v;
        }
        if let Some(v) = env_num("RFD_PAGES")? {
            self.rfd_pages = v;
        }
        Ok(())
    }

    /// Reject anything that would leave the scheduler or listener undefined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(invalid("REFRESH_INTERVAL_SECS", "must be at least 1"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(invalid("FETCH_TIMEOUT_SECS", "must be at least 1"));
        }
        if self.backoff_base_secs == 0 {
            return Err(invalid("BACKOFF_BASE_SECS", "must be at least 1"));
        }
        if self.max_backoff_secs < self.backoff_base_secs {
            return Err(invalid(
                "MAX_BACKOFF_SECS",
                "must not be smaller than BACKOFF_BASE_SECS",
            ));
        }
        if self.http_port == 0 {
            return Err(invalid("HTTP_PORT", "must be between 1 and 65535"));
        }
        if self.http_host.trim().is_empty() {
            return Err(invalid("HTTP_HOST", "cannot be empty"));
        }
        if !(1..=10).contains(&self.rfd_pages) {
            return Err(invalid("RFD_PAGES", "must be between 1 and 10"));
        }
        let url = self.rfd_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("RFD_BASE_URL", "must be an http(s) URL"));
        }
        Ok(())
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            interval: Duration::from_secs(self.refresh_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }

    pub fn rfd_source(&self) -> RfdSource {
        RfdSource {
            base_url: self.rfd_base_url.clone(),
            forum_id: self.rfd_forum_id,
            pages: self.rfd_pages,
            request_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.http_host.trim(), self.http_port)
            .parse()
            .map_err(|_| invalid("HTTP_HOST", "must be an IP address"))
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_num<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_str(name) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ParseNumber {
                name: name.to_string(),
                value: v,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const VARS: &[&str] = &[
        ENV_CONFIG_PATH,
        "HTTP_HOST",
        "HTTP_PORT",
        "REFRESH_INTERVAL_SECS",
        "FETCH_TIMEOUT_SECS",
        "BACKOFF_BASE_SECS",
        "MAX_BACKOFF_SECS",
        "RFD_BASE_URL",
        "RFD_FORUM_ID",
        "RFD_PAGES",
    ];

    fn clear_env() {
        for v in VARS {
            env::remove_var(v);
        }
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        let s = cfg.refresh_settings();
        assert_eq!(s.interval, Duration::from_secs(60));
        assert_eq!(s.max_backoff, Duration::from_secs(60));
        assert_eq!(cfg.listen_addr().unwrap().port(), 8080);
    }

    #[test]
    fn validation_rejects_zero_interval_and_port() {
        let cfg = Config {
            refresh_interval_secs: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue { name, .. }) if name == "REFRESH_INTERVAL_SECS"));

        let cfg = Config {
            http_port: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            backoff_base_secs: 30,
            max_backoff_secs: 10,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str("http_port = 9000\nrfd_pages = 3\n").unwrap();
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.rfd_pages, 3);
        assert_eq!(cfg.refresh_interval_secs, 60);
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_and_rejects_garbage() {
        clear_env();
        env::set_var("HTTP_PORT", "9191");
        env::set_var("REFRESH_INTERVAL_SECS", " 30 ");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.http_port, 9191);
        assert_eq!(cfg.refresh_interval_secs, 30);

        env::set_var("FETCH_TIMEOUT_SECS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::ParseNumber { .. })
        ));
        env::set_var("FETCH_TIMEOUT_SECS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));
        clear_env();
    }

    #[serial_test::serial]
    #[test]
    fn load_uses_env_path_then_fallback() {
        clear_env();
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        // no file anywhere -> defaults
        assert_eq!(Config::load().unwrap(), Config::default());

        // fallback file in ./config/
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(tmp.path().join(DEFAULT_CONFIG_PATH), "rfd_forum_id = 12\n").unwrap();
        assert_eq!(Config::load().unwrap().rfd_forum_id, 12);

        // explicit path wins; env still overrides the file
        let explicit = tmp.path().join("other.toml");
        fs::write(&explicit, "rfd_forum_id = 20\nhttp_port = 7000\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, explicit.display().to_string());
        env::set_var("HTTP_PORT", "7001");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.rfd_forum_id, 20);
        assert_eq!(cfg.http_port, 7001);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(matches!(Config::load(), Err(ConfigError::MissingFile(_))));

        clear_env();
        env::set_current_dir(&old).unwrap();
    }
}
