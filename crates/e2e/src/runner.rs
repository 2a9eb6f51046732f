//! Runs YAML UI scenarios against a live controller

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use towerqa_common::QaConfig;

use crate::api::Connection;
use crate::browser::{BrowserConfig, BrowserSession, StepResult};
use crate::error::{E2eError, E2eResult};
use crate::factories::gen_alphanumeric;
use crate::spec::{Scenario, TEST_ID_VAR};
use crate::visual::{VisualConfig, VisualTester};

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub visual_diffs: Vec<VisualDiffResult>,
    pub error: Option<String>,
}

impl ScenarioResult {
    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            duration_ms: 0,
            steps: vec![],
            visual_diffs: vec![],
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDiffResult {
    pub name: String,
    pub matches: bool,
    pub diff_percent: f64,
    pub diff_image_path: Option<String>,
}

/// Aggregate over a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub test_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn from_results(test_id: &str, results: Vec<ScenarioResult>, duration_ms: u64) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            test_id: test_id.to_string(),
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            results,
        }
    }
}

/// Configuration for the scenario runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub browser: BrowserConfig,
    pub visual: VisualConfig,
    pub scenarios_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Substituted for `{{test_id}}`; unique per run unless pinned
    pub test_id: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            visual: VisualConfig::default(),
            scenarios_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios")),
            output_dir: PathBuf::from("test-results"),
            test_id: gen_alphanumeric(8).to_lowercase(),
        }
    }
}

impl RunnerConfig {
    pub fn from_config(config: &QaConfig) -> E2eResult<Self> {
        let window = config
            .ui
            .window_size_list()
            .first()
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            browser: BrowserConfig::from_config(config, window)?,
            visual: VisualConfig::under(&config.ui.output_dir),
            output_dir: config.ui.output_dir.clone(),
            ..Default::default()
        })
    }
}

/// Loads scenarios, runs them in a browser sharing one API session, and
/// checks screenshots against baselines
pub struct ScenarioRunner {
    config: RunnerConfig,
    session: Option<BrowserSession>,
}

impl ScenarioRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Variables available to scenario placeholders
    pub fn variables(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(TEST_ID_VAR.to_string(), self.config.test_id.clone())])
    }

    /// Log in through the API and hand the session to the browser
    pub async fn login(&mut self, conn: &Connection, username: &str, password: &str) -> E2eResult<()> {
        conn.login(username, password, "/api/").await?;
        let session = BrowserSession::new(self.config.browser.clone())
            .await?
            .with_connection(conn)?;
        info!("Browser session ready for {} on {}", username, conn.server());
        self.session = Some(session);
        Ok(())
    }

    /// Use an already prepared browser session
    pub fn with_session(mut self, session: BrowserSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn load_scenarios(&self) -> E2eResult<Vec<Scenario>> {
        Scenario::load_all(&self.config.scenarios_dir, &self.variables())
    }

    pub async fn run_all(&self) -> E2eResult<SuiteResult> {
        let scenarios = self.load_scenarios()?;
        Ok(self.run_scenarios(&scenarios).await)
    }

    pub async fn run_tagged(&self, tag: &str) -> E2eResult<SuiteResult> {
        let scenarios: Vec<Scenario> = self
            .load_scenarios()?
            .into_iter()
            .filter(|s| s.has_tag(tag))
            .collect();
        Ok(self.run_scenarios(&scenarios).await)
    }

    pub async fn run_named(&self, name: &str) -> E2eResult<SuiteResult> {
        let scenario = self
            .load_scenarios()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Scenario not found: {}", name)))?;
        Ok(self.run_scenarios(std::slice::from_ref(&scenario)).await)
    }

    /// Run scenarios in order; one failing never stops the rest
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::new();

        info!("Running {} scenario(s), test id {}", scenarios.len(), self.config.test_id);

        for scenario in scenarios {
            let result = match self.run_scenario(scenario).await {
                Ok(result) => result,
                Err(e) => ScenarioResult::failed(&scenario.name, e.to_string()),
            };
            if result.success {
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let suite = SuiteResult::from_results(
            &self.config.test_id,
            results,
            start.elapsed().as_millis() as u64,
        );
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            suite.passed, suite.failed, suite.duration_ms
        );
        suite
    }

    fn session_for(&self, scenario: &Scenario) -> E2eResult<BrowserSession> {
        let session = match (&self.session, scenario.requires_login) {
            (Some(session), true) => session.clone(),
            (Some(session), false) => session.anonymous(),
            (None, false) => BrowserSession::unchecked(self.config.browser.clone()),
            (None, true) => {
                return Err(E2eError::Session(format!(
                    "scenario '{}' requires a logged-in browser session",
                    scenario.name
                )))
            }
        };
        Ok(match scenario.window {
            Some(window) => session.with_window(window),
            None => session,
        })
    }

    pub async fn run_scenario(&self, scenario: &Scenario) -> E2eResult<ScenarioResult> {
        let start = Instant::now();
        let session = self.session_for(scenario)?;
        debug!(
            "Running scenario {} at {}",
            scenario.name,
            scenario.window.unwrap_or(session.config().window)
        );

        let steps = session.run_steps(&scenario.steps).await?;
        let mut error = steps.iter().find(|s| !s.success).map(|s| {
            format!(
                "step {} failed: {}",
                s.step_name,
                s.error.as_deref().unwrap_or("unknown error")
            )
        });
        if error.is_none() && steps.len() < scenario.steps.len() {
            error = Some(format!(
                "only {} of {} steps reported",
                steps.len(),
                scenario.steps.len()
            ));
        }

        let mut visual_diffs = Vec::new();
        if scenario.visual_snapshot && error.is_none() {
            let tester = VisualTester::new(self.config.visual.clone())?;
            for path in steps.iter().filter_map(|s| s.screenshot_path.as_ref()) {
                let Some(name) = path.file_stem().map(|n| n.to_string_lossy().into_owned()) else {
                    continue;
                };
                match tester.compare(&name, Some(scenario.visual_threshold)) {
                    Ok(diff) => {
                        if !diff.matches {
                            error = Some(format!(
                                "Visual regression in '{}': {:.2}% pixels differ",
                                name, diff.diff_percent
                            ));
                        }
                        visual_diffs.push(VisualDiffResult {
                            name,
                            matches: diff.matches,
                            diff_percent: diff.diff_percent,
                            diff_image_path: diff
                                .diff_image_path
                                .map(|p| p.to_string_lossy().into_owned()),
                        });
                    }
                    Err(E2eError::BaselineNotFound(_)) => {
                        info!("No baseline for '{}'; record one with --update-baselines", name);
                    }
                    Err(e) => error = Some(format!("Visual comparison error: {}", e)),
                }
            }
        }

        Ok(ScenarioResult {
            name: scenario.name.clone(),
            success: error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
            visual_diffs,
            error,
        })
    }

    /// Promote every captured screenshot to a baseline
    pub fn update_baselines(&self) -> E2eResult<usize> {
        let tester = VisualTester::new(self.config.visual.clone())?;
        let mut updated = 0;
        for name in tester.list_actual()? {
            tester.update_baseline(&name)?;
            updated += 1;
        }
        Ok(updated)
    }

    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("scenario-results.json");
        std::fs::write(&path, serde_json::to_string_pretty(results)?)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::WindowSize;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(RunnerConfig {
            test_id: "fixed01".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_variables_carry_test_id() {
        assert_eq!(runner().variables().get(TEST_ID_VAR).map(String::as_str), Some("fixed01"));
        assert_eq!(RunnerConfig::default().test_id.len(), 8);
    }

    #[test]
    fn test_bundled_scenarios_parse() {
        let scenarios = runner().load_scenarios().unwrap();
        assert!(scenarios.len() >= 4);
        let org = scenarios
            .iter()
            .find(|s| s.name == "organization-crud")
            .unwrap();
        assert!(org.has_tag("organizations"));
        let yaml = serde_yaml::to_string(&org.steps).unwrap();
        assert!(yaml.contains("create-org-fixed01"));
        assert!(!yaml.contains("{{"));
    }

    #[test]
    fn test_login_required_without_session() {
        let scenario = Scenario::from_yaml("name: x\nsteps:\n  - action: sleep\n    ms: 1\n").unwrap();
        assert!(matches!(runner().session_for(&scenario), Err(E2eError::Session(_))));

        let anonymous =
            Scenario::from_yaml("name: y\nrequires_login: false\nwindow: maximized\nsteps:\n  - action: sleep\n    ms: 1\n")
                .unwrap();
        let session = runner().session_for(&anonymous).unwrap();
        assert!(session.cookies().is_empty());
        assert_eq!(session.config().window, WindowSize::Maximized);
    }

    #[test]
    fn test_suite_counts() {
        let suite = SuiteResult::from_results(
            "t",
            vec![
                ScenarioResult::failed("a", "boom".to_string()),
                ScenarioResult {
                    success: true,
                    error: None,
                    ..ScenarioResult::failed("b", String::new())
                },
            ],
            5,
        );
        assert_eq!((suite.total, suite.passed, suite.failed), (2, 1, 1));
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScenarioRunner::new(RunnerConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let path = runner
            .write_results(&SuiteResult::from_results("t", vec![], 0))
            .unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["total"], 0);
    }
}
