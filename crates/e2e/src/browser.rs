//! Playwright browser automation
//!
//! Every interaction is compiled into a standalone Node script that launches
//! a browser, injects the API session cookies, runs its body and prints one
//! marker-prefixed JSON line with the outcome. All values spliced into the
//! script go through [`js`], so selectors and text never need quoting rules.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};

use towerqa_common::QaConfig;

use crate::api::{Connection, CSRF_COOKIE, SESSION_COOKIE};
use crate::error::{E2eError, E2eResult};
use crate::spec::Step;

/// Prefix of the single line a script reports its outcome on
pub const RESULT_MARKER: &str = "__TOWERQA_RESULT__";

/// Encode a value as a JavaScript literal
pub fn js<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(E2eError::Playwright(format!("unknown browser '{}'", other))),
        }
    }
}

/// Browser window geometry: `WIDTHxHEIGHT` or `maximized`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WindowSize {
    Fixed { width: u32, height: u32 },
    Maximized,
}

impl Default for WindowSize {
    fn default() -> Self {
        WindowSize::Fixed {
            width: 800,
            height: 600,
        }
    }
}

impl FromStr for WindowSize {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("maximized") {
            return Ok(WindowSize::Maximized);
        }
        let invalid = || E2eError::Page(format!("invalid window size '{}'", s));
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(WindowSize::Fixed { width, height })
    }
}

impl TryFrom<String> for WindowSize {
    type Error = E2eError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WindowSize> for String {
    fn from(size: WindowSize) -> Self {
        size.to_string()
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSize::Fixed { width, height } => write!(f, "{}x{}", width, height),
            WindowSize::Maximized => write!(f, "maximized"),
        }
    }
}

/// Parse every configured window size
pub fn supported_window_sizes(config: &QaConfig) -> E2eResult<Vec<WindowSize>> {
    config
        .ui
        .window_size_list()
        .iter()
        .map(|s| s.parse())
        .collect()
}

/// Result of executing a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub screenshot_path: Option<PathBuf>,
}

/// What a script printed after its marker
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptOutcome {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Value,
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub base_url: String,
    pub browser: Browser,
    pub headless: bool,
    pub window: WindowSize,
    pub screenshot_dir: PathBuf,
    pub verify_tls: bool,
    /// Default timeout for each Playwright action
    pub action_timeout: Duration,
    /// Upper bound for a whole script run
    pub script_timeout: Duration,
    pub node: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_url: "https://127.0.0.1:8043".to_string(),
            browser: Browser::Chromium,
            headless: true,
            window: WindowSize::default(),
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            verify_tls: false,
            action_timeout: Duration::from_secs(10),
            script_timeout: Duration::from_secs(300),
            node: PathBuf::from("node"),
        }
    }
}

impl BrowserConfig {
    pub fn from_config(config: &QaConfig, window: WindowSize) -> E2eResult<Self> {
        Ok(Self {
            base_url: config.base_url().to_string(),
            browser: config.ui.browser.parse()?,
            headless: config.ui.headless,
            window,
            screenshot_dir: config.ui.output_dir.join("screenshots"),
            verify_tls: config.verify_tls,
            action_timeout: towerqa_common::config::resolve_timeout(Duration::from_secs(10)),
            script_timeout: towerqa_common::config::resolve_timeout(Duration::from_secs(300)),
            ..Default::default()
        })
    }
}

/// Cookie placed into the browser context before the first navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub url: String,
}

/// A browser bound to one controller and, optionally, one API session
#[derive(Debug, Clone)]
pub struct BrowserSession {
    config: BrowserConfig,
    cookies: Vec<BrowserCookie>,
}

impl BrowserSession {
    /// Verify Playwright is resolvable and prepare the screenshot directory
    pub async fn new(config: BrowserConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(&config).await?;
        std::fs::create_dir_all(&config.screenshot_dir)?;
        Ok(Self::unchecked(config))
    }

    /// Build without probing for Node or Playwright
    pub fn unchecked(config: BrowserConfig) -> Self {
        Self {
            config,
            cookies: Vec::new(),
        }
    }

    async fn check_playwright_installed(config: &BrowserConfig) -> E2eResult<()> {
        let status = Command::new(&config.node)
            .args(["-e", "require.resolve('playwright')"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn cookies(&self) -> &[BrowserCookie] {
        &self.cookies
    }

    /// Same session, different window geometry
    pub fn with_window(mut self, window: WindowSize) -> Self {
        self.config.window = window;
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.retain(|c| c.name != name);
        self.cookies.push(BrowserCookie {
            name: name.to_string(),
            value: value.to_string(),
            url: self.config.base_url.clone(),
        });
        self
    }

    /// Same browser settings without any injected cookies
    pub fn anonymous(&self) -> Self {
        Self::unchecked(self.config.clone())
    }

    /// Reuse the session and CSRF cookies of a logged-in connection
    pub fn with_connection(self, conn: &Connection) -> E2eResult<Self> {
        let session_id = conn
            .session_id()
            .ok_or_else(|| E2eError::Session("connection has no session cookie".to_string()))?;
        let mut session = self.with_cookie(SESSION_COOKIE, &session_id);
        if let Some(csrf) = conn.csrf_token() {
            session = session.with_cookie(CSRF_COOKIE, &csrf);
        }
        Ok(session)
    }

    fn launch_js(&self) -> String {
        let (launch_args, viewport) = match self.config.window {
            WindowSize::Fixed { width, height } => (
                json!([format!("--window-size={},{}", width, height)]),
                json!({ "width": width, "height": height }).to_string(),
            ),
            WindowSize::Maximized => (json!(["--start-maximized"]), "null".to_string()),
        };
        // Only Chromium understands the window flags
        let args = if self.config.browser == Browser::Chromium {
            launch_args
        } else {
            json!([])
        };
        format!(
            "  const browser = await pw[{browser}].launch({{ headless: {headless}, args: {args} }});\n\
             \x20 const context = await browser.newContext({{ viewport: {viewport}, ignoreHTTPSErrors: {insecure} }});\n\
             \x20 await context.addCookies({cookies});\n\
             \x20 const page = await context.newPage();\n\
             \x20 page.setDefaultTimeout({timeout});\n\
             \x20 const baseUrl = {base_url};\n",
            browser = js(self.config.browser.as_str()),
            headless = self.config.headless,
            args = args,
            viewport = viewport,
            insecure = !self.config.verify_tls,
            cookies = js(&self.cookies),
            timeout = self.config.action_timeout.as_millis(),
            base_url = js(self.config.base_url.trim_end_matches('/')),
        )
    }

    /// Wrap `body` in a complete script; the body assigns to `result`
    pub fn build_script(&self, body: &str) -> String {
        let mut script = String::new();
        script.push_str("const pw = require('playwright');\n\n");
        script.push_str(&format!(
            "const expectEventually = async (page, describe, check, timeout) => {{\n\
             \x20 const deadline = Date.now() + timeout;\n\
             \x20 let last = {{ ok: false, actual: null }};\n\
             \x20 while (true) {{\n\
             \x20   try {{ last = await check(); }} catch (e) {{ last = {{ ok: false, actual: e.message }}; }}\n\
             \x20   if (last.ok) return;\n\
             \x20   if (Date.now() > deadline) throw new Error(describe + ', got ' + JSON.stringify(last.actual));\n\
             \x20   await page.waitForTimeout(100);\n\
             \x20 }}\n\
             }};\n\n\
             (async () => {{\n{launch}\
             \x20 let result = null;\n\
             \x20 try {{\n{body}\n\
             \x20   console.log({marker} + JSON.stringify({{ ok: true, result }}));\n\
             \x20 }} catch (error) {{\n\
             \x20   console.log({marker} + JSON.stringify({{ ok: false, error: error.message, result }}));\n\
             \x20 }} finally {{\n\
             \x20   await browser.close();\n\
             \x20 }}\n\
             }})();\n",
            launch = self.launch_js(),
            body = body,
            marker = js(RESULT_MARKER),
        ));
        script
    }

    /// Run a script produced by [`build_script`](Self::build_script)
    pub async fn run_script(&self, script: &str) -> E2eResult<ScriptOutcome> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("towerqa.js");
        std::fs::write(&script_path, script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let child = Command::new(&self.config.node)
            .arg(&script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("failed to start node: {}", e)))?;

        let output = tokio::time::timeout(self.config.script_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                E2eError::Timeout(format!("Playwright script after {:?}", self.config.script_timeout))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_outcome(&stdout).ok_or_else(|| {
            E2eError::Playwright(format!(
                "script produced no result (exit {:?}):\nstdout: {}\nstderr: {}",
                output.status.code(),
                stdout,
                String::from_utf8_lossy(&output.stderr)
            ))
        })
    }

    /// Load `path`, optionally wait for `ready`, then run `actions`; the
    /// value the actions assign to `result` is returned.
    pub async fn perform(&self, path: &str, ready: Option<&str>, actions: &str) -> E2eResult<Value> {
        let mut body = format!("    await page.goto(baseUrl + {});\n", js(path));
        if let Some(selector) = ready {
            body.push_str(&format!("    await page.waitForSelector({});\n", js(selector)));
        }
        body.push_str(actions);

        let outcome = self.run_script(&self.build_script(&body)).await?;
        if outcome.ok {
            Ok(outcome.result)
        } else {
            Err(E2eError::Page(format!(
                "{}: {}",
                path,
                outcome.error.unwrap_or_default()
            )))
        }
    }

    /// Evaluate `expression` in the page at `path` and return its JSON value
    pub async fn query(&self, path: &str, ready: Option<&str>, expression: &str) -> E2eResult<Value> {
        debug!("Querying {}: {}", path, expression);
        self.perform(
            path,
            ready,
            &format!("    result = await page.evaluate({});\n", js(expression)),
        )
        .await
    }

    /// Run declarative steps in one browser; stops at the first failure
    pub async fn run_steps(&self, steps: &[Step]) -> E2eResult<Vec<StepResult>> {
        let started = Instant::now();
        let mut body = String::from(
            "    result = [];\n\
             \x20   const step = async (name, fn) => {\n\
             \x20     const started = Date.now();\n\
             \x20     try {\n\
             \x20       await fn();\n\
             \x20       result.push({ success: true, step_name: name, duration_ms: Date.now() - started });\n\
             \x20     } catch (e) {\n\
             \x20       result.push({ success: false, step_name: name, duration_ms: Date.now() - started, error: e.message });\n\
             \x20       throw e;\n\
             \x20     }\n\
             \x20   };\n",
        );
        for step in steps {
            body.push_str(&format!(
                "    await step({}, async () => {{\n{}\n    }});\n",
                js(&step.label()),
                self.step_to_js(step)
            ));
        }

        let outcome = self.run_script(&self.build_script(&body)).await?;
        let mut results: Vec<StepResult> = serde_json::from_value(outcome.result).unwrap_or_default();

        for (result, step) in results.iter_mut().zip(steps) {
            if let (true, Step::Screenshot { name, .. }) = (result.success, step) {
                result.screenshot_path = Some(self.screenshot_path(name));
            }
            if let Step::Log { message } = step {
                info!("[SCENARIO] {}", message);
            }
        }

        if !outcome.ok && results.iter().all(|r| r.success) {
            // failed outside any step, e.g. during browser launch
            warn!("Playwright failed before a step reported: {:?}", outcome.error);
            results.push(StepResult {
                success: false,
                step_name: "launch".to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                error: outcome.error,
                screenshot_path: None,
            });
        }
        Ok(results)
    }

    pub fn screenshot_path(&self, name: &str) -> PathBuf {
        self.config.screenshot_dir.join(format!("{}.png", name))
    }

    /// JavaScript for one step, run inside an async function with `page`
    pub fn step_to_js(&self, step: &Step) -> String {
        let timeout = self.config.action_timeout.as_millis() as u64;
        match step {
            Step::Navigate {
                url,
                wait_for_selector,
            } => {
                let mut code = format!("      await page.goto(baseUrl + {});", js(url));
                if let Some(selector) = wait_for_selector {
                    code.push_str(&format!("\n      await page.waitForSelector({});", js(selector)));
                }
                code
            }
            Step::Click {
                selector,
                timeout_ms,
            } => format!(
                "      await page.click({}, {{ timeout: {} }});",
                js(selector),
                timeout_ms.unwrap_or(timeout)
            ),
            Step::Fill {
                selector,
                value,
                clear_first,
            } => {
                if *clear_first {
                    format!(
                        "      await page.fill({sel}, '');\n      await page.fill({sel}, {val});",
                        sel = js(selector),
                        val = js(value)
                    )
                } else {
                    format!("      await page.fill({}, {});", js(selector), js(value))
                }
            }
            Step::Type {
                selector,
                text,
                delay_ms,
            } => format!(
                "      await page.locator({}).pressSequentially({}, {{ delay: {} }});",
                js(selector),
                js(text),
                delay_ms.unwrap_or(50)
            ),
            Step::Press { selector, key } => match selector {
                Some(sel) => format!("      await page.locator({}).press({});", js(sel), js(key)),
                None => format!("      await page.keyboard.press({});", js(key)),
            },
            Step::Wait {
                selector,
                timeout_ms,
                state,
            } => format!(
                "      await page.waitForSelector({}, {{ state: {}, timeout: {} }});",
                js(selector),
                js(state.as_str()),
                timeout_ms
            ),
            Step::Sleep { ms } => format!("      await page.waitForTimeout({});", ms),
            Step::Assert {
                selector,
                visible,
                text,
                text_contains,
                attribute,
                count,
            } => {
                let sel = js(selector);
                let mut checks = Vec::new();
                if let Some(visible) = visible {
                    let state = if *visible { "visible" } else { "hidden" };
                    checks.push(format!(
                        "      await page.locator({}).first().waitFor({{ state: {} }});",
                        sel,
                        js(state)
                    ));
                }
                if let Some(expected) = text {
                    checks.push(expect_js(
                        &format!("text of {} == {}", selector, js(expected)),
                        &format!(
                            "const actual = ((await page.locator({}).first().textContent()) || '').trim(); \
                             return {{ ok: actual === {}, actual }};",
                            sel,
                            js(expected)
                        ),
                        timeout,
                    ));
                }
                if let Some(expected) = text_contains {
                    checks.push(expect_js(
                        &format!("text of {} contains {}", selector, js(expected)),
                        &format!(
                            "const actual = (await page.locator({}).first().textContent()) || ''; \
                             return {{ ok: actual.includes({}), actual }};",
                            sel,
                            js(expected)
                        ),
                        timeout,
                    ));
                }
                if let Some(attr) = attribute {
                    let cond = match (&attr.value, &attr.contains) {
                        (Some(v), _) => format!("actual === {}", js(v)),
                        (None, Some(c)) => format!("actual !== null && actual.includes({})", js(c)),
                        (None, None) => "actual !== null".to_string(),
                    };
                    checks.push(expect_js(
                        &format!("attribute {} of {}", attr.name, selector),
                        &format!(
                            "const actual = await page.locator({}).first().getAttribute({}); \
                             return {{ ok: {}, actual }};",
                            sel,
                            js(&attr.name),
                            cond
                        ),
                        timeout,
                    ));
                }
                if let Some(expected) = count {
                    checks.push(expect_js(
                        &format!("count of {} == {}", selector, expected),
                        &format!(
                            "const actual = await page.locator({}).count(); return {{ ok: actual === {}, actual }};",
                            sel, expected
                        ),
                        timeout,
                    ));
                }
                checks.join("\n")
            }
            Step::Screenshot {
                name,
                selector,
                full_page,
            } => {
                let path = js(&self.screenshot_path(name).to_string_lossy());
                match selector {
                    Some(sel) => format!(
                        "      await page.locator({}).first().screenshot({{ path: {} }});",
                        js(sel),
                        path
                    ),
                    None => format!(
                        "      await page.screenshot({{ path: {}, fullPage: {} }});",
                        path, full_page
                    ),
                }
            }
            Step::Hover { selector } => format!("      await page.hover({});", js(selector)),
            Step::Select { selector, value } => {
                format!("      await page.selectOption({}, {});", js(selector), js(value))
            }
            Step::Check { selector } => format!("      await page.check({});", js(selector)),
            Step::Evaluate { script, expected } => {
                let mut code = format!("      const value = await page.evaluate(() => {{ {} }});", script);
                if let Some(expected) = expected {
                    code.push_str(&format!(
                        "\n      if (JSON.stringify(value) !== JSON.stringify({exp})) \
                         throw new Error('evaluate returned ' + JSON.stringify(value) + ', expected ' + JSON.stringify({exp}));",
                        exp = expected
                    ));
                }
                code
            }
            Step::Log { message } => format!("      console.error({});", js(message)),
        }
    }
}

fn expect_js(describe: &str, check_body: &str, timeout_ms: u64) -> String {
    format!(
        "      await expectEventually(page, {}, async () => {{ {} }}, {});",
        js(describe),
        check_body,
        timeout_ms
    )
}

/// Find the outcome line in a script's stdout
pub fn parse_outcome(stdout: &str) -> Option<ScriptOutcome> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(RESULT_MARKER))
        .and_then(|json| serde_json::from_str(json).ok())
}
