//! Invoking the controller's command line client
//!
//! The CLI is run with a scrubbed environment: only `PATH` survives from the
//! invoking process, so credentials exported in a developer shell can never
//! leak into a test that expects to be unauthenticated. Authentication is
//! opted into per call through [`CliEnv`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use towerqa_common::{QaConfig, UserCredentials};

use crate::error::{E2eError, E2eResult};

pub const ENV_HOST: &str = "TOWER_HOST";
pub const ENV_USERNAME: &str = "TOWER_USERNAME";
pub const ENV_PASSWORD: &str = "TOWER_PASSWORD";
pub const ENV_TOKEN: &str = "TOWER_TOKEN";
pub const ENV_VERIFY_SSL: &str = "TOWER_VERIFY_SSL";

/// Environment overlay for one CLI invocation
#[derive(Debug, Clone, Default)]
pub struct CliEnv {
    /// Pass the configured host and default user's credentials
    pub auth: bool,
    pub vars: Vec<(String, String)>,
}

impl CliEnv {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self {
            auth: true,
            vars: Vec::new(),
        }
    }

    pub fn var(mut self, name: &str, value: &str) -> Self {
        self.vars.push((name.to_string(), value.to_string()));
        self
    }
}

/// Captured result of a CLI run
#[derive(Debug, Clone)]
pub struct CliOutput {
    /// stdout followed by stderr
    pub stdout: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.stdout.contains(needle)
    }

    pub fn json<T: DeserializeOwned>(&self) -> E2eResult<T> {
        Ok(serde_json::from_str(self.stdout.trim())?)
    }

    /// Every token exported by an `export TOWER_TOKEN=...` line, in order
    pub fn exported_tokens(&self) -> Vec<String> {
        static EXPORT: OnceLock<Regex> = OnceLock::new();
        let re = EXPORT.get_or_init(|| {
            Regex::new(r#"(?m)^\s*export\s+TOWER_TOKEN=["']?([^"'\s]+)["']?\s*$"#)
                .unwrap_or_else(|e| panic!("token regex is invalid: {e}"))
        });
        re.captures_iter(&self.stdout).map(|c| c[1].to_string()).collect()
    }

    /// The token `login` exported, when it exported exactly one
    pub fn exported_token(&self) -> Option<String> {
        let mut tokens = self.exported_tokens();
        match tokens.len() {
            1 => tokens.pop(),
            _ => None,
        }
    }
}

/// Runs the CLI binary under test
#[derive(Debug, Clone)]
pub struct CliRunner {
    binary: PathBuf,
    timeout: Duration,
    host: String,
    credentials: UserCredentials,
    verify_tls: bool,
}

impl CliRunner {
    pub fn new(binary: impl Into<PathBuf>, host: &str, credentials: UserCredentials) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(60),
            host: host.to_string(),
            credentials,
            verify_tls: false,
        }
    }

    pub fn from_config(config: &QaConfig) -> Self {
        Self {
            binary: config.cli.binary.clone(),
            timeout: towerqa_common::config::resolve_timeout(Duration::from_secs(config.cli.timeout_secs)),
            host: config.base_url().to_string(),
            credentials: config.credentials.default.clone(),
            verify_tls: config.verify_tls,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn credentials(&self) -> &UserCredentials {
        &self.credentials
    }

    /// Environment the child will see, in insertion order
    pub fn environment(&self, env: &CliEnv) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        if let Some(path) = std::env::var_os("PATH") {
            vars.push(("PATH".to_string(), path.to_string_lossy().into_owned()));
        }
        if env.auth {
            vars.push((ENV_HOST.to_string(), self.host.clone()));
            vars.push((ENV_USERNAME.to_string(), self.credentials.username.clone()));
            vars.push((ENV_PASSWORD.to_string(), self.credentials.password.clone()));
            vars.push((ENV_VERIFY_SSL.to_string(), self.verify_tls.to_string()));
        }
        for (name, value) in &env.vars {
            vars.retain(|(n, _)| n != name);
            vars.push((name.clone(), value.clone()));
        }
        vars
    }

    /// Run with `args` (program name excluded) and capture the output
    pub async fn run(&self, args: &[&str], env: CliEnv) -> E2eResult<CliOutput> {
        info!("Running {} {}", self.binary.display(), args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env_clear()
            .envs(self.environment(&env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            E2eError::Cli(format!("failed to spawn {}: {}", self.binary.display(), e))
        })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                E2eError::Cli(format!(
                    "{} {} did not exit within {:?}",
                    self.binary.display(),
                    args.join(" "),
                    self.timeout
                ))
            })??;

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        stdout.push_str(&String::from_utf8_lossy(&output.stderr));

        let exit_code = output.status.code();
        debug!("CLI exited with {:?}", exit_code);

        Ok(CliOutput { stdout, exit_code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str) -> CliOutput {
        CliOutput {
            stdout: stdout.to_string(),
            exit_code: Some(0),
        }
    }

    #[test]
    fn test_exported_token_variants() {
        assert_eq!(output("export TOWER_TOKEN=abc123\n").exported_token().as_deref(), Some("abc123"));
        assert_eq!(
            output("some banner\nexport TOWER_TOKEN=\"q1w2e3\"\n").exported_token().as_deref(),
            Some("q1w2e3")
        );
        assert_eq!(output("Error retrieving token\n").exported_token(), None);
    }

    #[test]
    fn test_repeated_export_is_not_a_token() {
        let out = output("export TOWER_TOKEN=first\nexport TOWER_TOKEN=second\n");
        assert_eq!(out.exported_tokens(), vec!["first", "second"]);
        assert_eq!(out.exported_token(), None);
    }

    #[test]
    fn test_anonymous_environment_has_only_path() {
        let runner = CliRunner::new("awx", "https://tower", UserCredentials::new("u", "p"));
        let vars = runner.environment(&CliEnv::anonymous());
        assert!(vars.iter().all(|(name, _)| name == "PATH"));
    }

    #[test]
    fn test_authenticated_environment_and_overrides() {
        let runner = CliRunner::new("awx", "https://tower", UserCredentials::new("u", "p"));
        let vars = runner.environment(&CliEnv::authenticated().var(ENV_HOST, "https://other"));
        let get = |name: &str| vars.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str());

        assert_eq!(get(ENV_USERNAME), Some("u"));
        assert_eq!(get(ENV_PASSWORD), Some("p"));
        assert_eq!(get(ENV_HOST), Some("https://other"));
        assert_eq!(vars.iter().filter(|(n, _)| n == ENV_HOST).count(), 1);
    }

    #[test]
    fn test_json_output() {
        let out = output(r#"{"count": 1, "results": [{"username": "admin"}]}"#);
        let value: serde_json::Value = out.json().unwrap();
        assert_eq!(value["count"], 1);
    }
}
