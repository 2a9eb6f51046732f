//! Suite configuration
//!
//! Configuration is read from the YAML file named by `TOWERQA_CONFIG` (when
//! set) and then overridden field by field from `TOWERQA_*` environment
//! variables. A configuration without a base URL means "no controller
//! available": [`QaConfig::from_env`] returns `Ok(None)` and live suites skip.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const ENV_CONFIG_PATH: &str = "TOWERQA_CONFIG";
pub const ENV_BASE_URL: &str = "TOWERQA_BASE_URL";
pub const ENV_ADMIN_USERNAME: &str = "TOWERQA_ADMIN_USERNAME";
pub const ENV_ADMIN_PASSWORD: &str = "TOWERQA_ADMIN_PASSWORD";
pub const ENV_DEFAULT_USERNAME: &str = "TOWERQA_DEFAULT_USERNAME";
pub const ENV_DEFAULT_PASSWORD: &str = "TOWERQA_DEFAULT_PASSWORD";
pub const ENV_CLI_BINARY: &str = "TOWERQA_CLI_BINARY";
pub const ENV_VERIFY_TLS: &str = "TOWERQA_VERIFY_TLS";
pub const ENV_WINDOW_SIZES: &str = "TOWERQA_WINDOW_SIZES";
pub const ENV_TIMEOUT_SECS: &str = "TOWERQA_TIMEOUT_SECS";

/// Top-level suite configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Controller base URL, e.g. `https://tower.example.com`
    pub base_url: String,

    /// Verify the controller's TLS certificate
    pub verify_tls: bool,

    pub credentials: Credentials,

    pub cli: CliConfig,

    pub ui: UiConfig,

    pub timeouts: TimeoutConfig,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            verify_tls: false,
            credentials: Credentials::default(),
            cli: CliConfig::default(),
            ui: UiConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Named user credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Superuser used for setup, settings changes and teardown
    pub admin: UserCredentials,

    /// Ordinary user the CLI and UI suites log in as
    pub default: UserCredentials,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            admin: UserCredentials::new("admin", "password"),
            default: UserCredentials::new("admin", "password"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

impl UserCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// CLI under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Path or name (resolved through `PATH`) of the CLI binary
    pub binary: PathBuf,

    /// Upper bound on a single CLI invocation
    pub timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("awx"),
            timeout_secs: 60,
        }
    }
}

/// Browser settings for UI suites
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub browser: String,
    pub headless: bool,

    /// Comma-separated window sizes, `WIDTHxHEIGHT` or `maximized`
    pub window_sizes: String,

    /// Where screenshots, baselines and reports are written
    pub output_dir: PathBuf,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            browser: "chromium".to_string(),
            headless: true,
            window_sizes: "800x600".to_string(),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

impl UiConfig {
    /// Distinct window sizes in first-seen order
    pub fn window_size_list(&self) -> Vec<String> {
        let mut sizes: Vec<String> = Vec::new();
        for raw in self.window_sizes.split(',') {
            let size = raw.trim();
            if !size.is_empty() && !sizes.iter().any(|s| s == size) {
                sizes.push(size.to_string());
            }
        }
        sizes
    }
}

/// Timeouts used by the harness
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub request_secs: u64,
    pub job_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            job_secs: 600,
            poll_interval_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        resolve_timeout(Duration::from_secs(self.request_secs))
    }

    pub fn job(&self) -> Duration {
        resolve_timeout(Duration::from_secs(self.job_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl QaConfig {
    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load from `TOWERQA_CONFIG` plus environment overrides.
    ///
    /// Returns `Ok(None)` when no controller base URL is configured.
    pub fn from_env() -> Result<Option<Self>> {
        let mut config = match std::env::var_os(ENV_CONFIG_PATH) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;

        if config.base_url.is_empty() {
            tracing::debug!("No controller base URL configured");
            return Ok(None);
        }
        config.validate()?;
        Ok(Some(config))
    }

    /// Apply overrides from a variable lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_BASE_URL) {
            self.base_url = v;
        }
        if let Some(v) = lookup(ENV_ADMIN_USERNAME) {
            self.credentials.admin.username = v;
        }
        if let Some(v) = lookup(ENV_ADMIN_PASSWORD) {
            self.credentials.admin.password = v;
        }
        if let Some(v) = lookup(ENV_DEFAULT_USERNAME) {
            self.credentials.default.username = v;
        }
        if let Some(v) = lookup(ENV_DEFAULT_PASSWORD) {
            self.credentials.default.password = v;
        }
        if let Some(v) = lookup(ENV_CLI_BINARY) {
            self.cli.binary = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_VERIFY_TLS) {
            self.verify_tls = parse_bool(ENV_VERIFY_TLS, &v)?;
        }
        if let Some(v) = lookup(ENV_WINDOW_SIZES) {
            self.ui.window_sizes = v;
        }
        Ok(())
    }

    /// Check the configuration is usable against a live controller
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.credentials.admin.username.is_empty() {
            return Err(Error::InvalidConfig("admin username is empty".to_string()));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "timeouts.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidEnv {
            name: name.to_string(),
            reason: format!("expected a boolean, got '{}'", other),
        }),
    }
}

/// Returns the effective timeout, honoring `TOWERQA_TIMEOUT_SECS` when set.
///
/// The override is a floor: it never shortens a longer requested timeout.
/// Malformed values are ignored with a warning.
pub fn resolve_timeout(requested: Duration) -> Duration {
    match std::env::var(ENV_TIMEOUT_SECS) {
        Ok(raw) => match parse_timeout_secs(&raw) {
            Ok(floor) => requested.max(floor),
            Err(reason) => {
                tracing::warn!("Ignoring {}: {}", ENV_TIMEOUT_SECS, reason);
                requested
            }
        },
        Err(_) => requested,
    }
}

fn parse_timeout_secs(raw: &str) -> std::result::Result<Duration, String> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| "must be a positive integer number of seconds".to_string())?;
    if secs == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
base_url: https://tower.example.com/
verify_tls: false
credentials:
  admin:
    username: root
    password: s3cret
cli:
  binary: /usr/local/bin/awx
ui:
  window_sizes: 800x600,maximized,800x600
"#;
        let config = QaConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.base_url(), "https://tower.example.com");
        assert_eq!(config.credentials.admin.username, "root");
        // missing sections fall back to defaults
        assert_eq!(config.credentials.default.username, "admin");
        assert_eq!(config.cli.timeout_secs, 60);
        assert_eq!(config.ui.window_size_list(), vec!["800x600", "maximized"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = QaConfig::default();
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://127.0.0.1:8013"),
            (ENV_ADMIN_PASSWORD, "override"),
            (ENV_VERIFY_TLS, "yes"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.base_url, "http://127.0.0.1:8013");
        assert_eq!(config.credentials.admin.password, "override");
        assert!(config.verify_tls);
    }

    #[test]
    fn test_invalid_bool_override() {
        let mut config = QaConfig::default();
        let err = config
            .apply_overrides(|name| (name == ENV_VERIFY_TLS).then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let config = QaConfig {
            base_url: "tower.example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_timeout_secs() {
        assert_eq!(parse_timeout_secs(" 12 ").unwrap(), Duration::from_secs(12));
        assert!(parse_timeout_secs("0").is_err());
        assert!(parse_timeout_secs("soon").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("towerqa.yml");
        std::fs::write(&path, "base_url: http://localhost:8043\n").unwrap();
        let config = QaConfig::from_file(&path).unwrap();
        assert_eq!(config.base_url, "http://localhost:8043");
    }
}
