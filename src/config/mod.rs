//! Service configuration.
//!
//! Loaded from TOML. Lookup order: explicit `--config` path, then
//! `$SSO_CONFIG`, then `<config dir>/sso/config.toml`. A missing default file
//! is not an error; every field has a default. A few `SSO_*` environment
//! variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::password::DEFAULT_ROUNDS;
use crate::auth::service::{DEFAULT_MIN_PASSWORD_LEN, DEFAULT_TOKEN_TTL_SECS};
use crate::auth::sweep::DEFAULT_SWEEP_INTERVAL;

/// Longest accepted token lifetime: one year.
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Token and credential policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Lifetime of issued tokens, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// PBKDF2 rounds for new password hashes.
    #[serde(default = "default_password_rounds")]
    pub password_rounds: u32,

    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
            password_rounds: default_password_rounds(),
            min_password_len: default_min_password_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// SQLite database file. `~` and `$VARS` are expanded.
    #[serde(default = "default_store_path")]
    pub path: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.path)
            .with_context(|| format!("expanding store path {:?}", self.path))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline applied to every request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Fallback filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS as u64
}
fn default_password_rounds() -> u32 {
    DEFAULT_ROUNDS
}
fn default_min_password_len() -> usize {
    DEFAULT_MIN_PASSWORD_LEN
}
fn default_store_path() -> String {
    "sso.db".into()
}
fn default_pool_size() -> u32 {
    8
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    44044
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Resolve the config file location and load it.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit {
            Self::from_file(path)?
        } else if let Ok(path) = std::env::var("SSO_CONFIG") {
            Self::from_file(Path::new(&path))?
        } else {
            match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SSO_STORE_PATH") {
            self.store.path = path;
        }
        if let Ok(ttl) = std::env::var("SSO_TOKEN_TTL_SECS") {
            self.auth.token_ttl_secs = ttl.parse().context("SSO_TOKEN_TTL_SECS")?;
        }
        if let Ok(port) = std::env::var("SSO_PORT") {
            self.gateway.port = port.parse().context("SSO_PORT")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.token_ttl_secs == 0 {
            bail!("auth.token_ttl_secs must be greater than zero");
        }
        if self.auth.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            bail!("auth.token_ttl_secs must be at most {MAX_TOKEN_TTL_SECS} (one year)");
        }
        if self.auth.password_rounds == 0 {
            bail!("auth.password_rounds must be greater than zero");
        }
        if self.store.pool_size == 0 {
            bail!("store.pool_size must be greater than zero");
        }
        if self.sweep.interval_secs == 0 {
            bail!("sweep.interval_secs must be greater than zero");
        }
        if self.gateway.request_timeout_secs == 0 {
            bail!("gateway.request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Token lifetime. Falls back to the default when the configured value
    /// has not passed [`validate`](Self::validate).
    pub fn token_ttl(&self) -> chrono::Duration {
        i64::try_from(self.auth.token_ttl_secs)
            .ok()
            .filter(|secs| *secs <= MAX_TOKEN_TTL_SECS as i64)
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_TOKEN_TTL_SECS))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.request_timeout_secs)
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sso").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.auth.token_ttl_secs, 3600);
        assert_eq!(config.sweep.interval_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config = Config::from_toml(
            r#"
            [auth]
            token_ttl_secs = 900

            [gateway]
            port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(config.auth.token_ttl_secs, 900);
        assert_eq!(config.auth.password_rounds, DEFAULT_ROUNDS);
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.token_ttl(), chrono::Duration::seconds(900));
    }

    #[test]
    fn zero_values_rejected() {
        let mut config = Config::default();
        config.auth.token_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sweep.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_token_ttl_rejected_without_panicking() {
        let mut config = Config::default();
        config.auth.token_ttl_secs = i64::MAX as u64;
        assert!(config.validate().is_err());
        assert_eq!(config.token_ttl(), chrono::Duration::seconds(DEFAULT_TOKEN_TTL_SECS));

        config.auth.token_ttl_secs = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.token_ttl(), chrono::Duration::seconds(DEFAULT_TOKEN_TTL_SECS));

        config.auth.token_ttl_secs = MAX_TOKEN_TTL_SECS;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.token_ttl(),
            chrono::Duration::seconds(MAX_TOKEN_TTL_SECS as i64)
        );
    }

    #[test]
    fn unknown_types_fail_to_parse() {
        assert!(Config::from_toml("[auth]\ntoken_ttl_secs = \"soon\"").is_err());
    }

    #[test]
    fn store_path_expands_home() {
        let store = StoreConfig {
            path: "~/sso/sso.db".into(),
            ..StoreConfig::default()
        };
        let resolved = store.resolved_path().unwrap();
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.ends_with("sso/sso.db"));
    }
}
