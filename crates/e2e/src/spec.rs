//! Declarative YAML UI scenarios
//!
//! Scenario text may reference `{{test_id}}` and any variable passed to
//! [`Scenario::render`]; substitution happens before the YAML is parsed so
//! placeholders work in every string field.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::browser::WindowSize;
use crate::error::{E2eError, E2eResult};

/// Placeholder replaced by the per-run identifier
pub const TEST_ID_VAR: &str = "test_id";

/// A UI scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Inject the API session into the browser before the first step
    #[serde(default = "default_true")]
    pub requires_login: bool,

    /// Overrides the configured window size
    #[serde(default)]
    pub window: Option<WindowSize>,

    pub steps: Vec<Step>,

    /// Compare every screenshot against its stored baseline
    #[serde(default)]
    pub visual_snapshot: bool,

    /// Allowed pixel difference in percent
    #[serde(default = "default_threshold")]
    pub visual_threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f64 {
    0.5
}

fn default_wait_timeout() -> u64 {
    10_000
}

/// A single browser action or assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a path relative to the controller URL
    Navigate {
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Fill {
        selector: String,
        value: String,
        #[serde(default)]
        clear_first: bool,
    },

    /// Type with per-key delay
    Type {
        selector: String,
        text: String,
        #[serde(default)]
        delay_ms: Option<u64>,
    },

    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
    },

    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    Sleep {
        ms: u64,
    },

    Assert {
        selector: String,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        attribute: Option<AttributeAssertion>,
        #[serde(default)]
        count: Option<usize>,
    },

    Screenshot {
        name: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        full_page: bool,
    },

    Hover {
        selector: String,
    },

    Select {
        selector: String,
        value: String,
    },

    Check {
        selector: String,
    },

    /// Evaluate a function body in the page; compared when `expected` is set
    Evaluate {
        script: String,
        #[serde(default)]
        expected: Option<serde_json::Value>,
    },

    Log {
        message: String,
    },
}

impl Step {
    /// Short label used in reports
    pub fn label(&self) -> String {
        match self {
            Step::Navigate { url, .. } => format!("navigate:{}", url),
            Step::Click { selector, .. } => format!("click:{}", selector),
            Step::Fill { selector, .. } => format!("fill:{}", selector),
            Step::Type { selector, .. } => format!("type:{}", selector),
            Step::Press { key, .. } => format!("press:{}", key),
            Step::Wait { selector, .. } => format!("wait:{}", selector),
            Step::Sleep { ms } => format!("sleep:{}ms", ms),
            Step::Assert { selector, .. } => format!("assert:{}", selector),
            Step::Screenshot { name, .. } => format!("screenshot:{}", name),
            Step::Hover { selector } => format!("hover:{}", selector),
            Step::Select { selector, .. } => format!("select:{}", selector),
            Step::Check { selector } => format!("check:{}", selector),
            Step::Evaluate { .. } => "evaluate".to_string(),
            Step::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeAssertion {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub contains: Option<String>,
}

/// Replace `{{name}}` placeholders; unknown names are an error
pub fn substitute(text: &str, vars: &BTreeMap<String, String>) -> E2eResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| E2eError::SpecParse(format!("unterminated placeholder in: {}", rest)))?;
        let name = after[..end].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| E2eError::SpecParse(format!("unknown placeholder '{{{{{}}}}}'", name)))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

impl Scenario {
    /// Parse YAML with no placeholder substitution
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Substitute placeholders, then parse
    pub fn render(yaml: &str, vars: &BTreeMap<String, String>) -> E2eResult<Self> {
        Self::from_yaml(&substitute(yaml, vars)?)
    }

    pub fn from_file(path: &Path, vars: &BTreeMap<String, String>) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::render(&content, vars)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load every `.yaml`/`.yml` file below `dir`, sorted by path
    pub fn load_all(dir: &Path, vars: &BTreeMap<String, String>) -> E2eResult<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p, vars)).collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("scenario name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(E2eError::SpecParse(format!("scenario '{}' has no steps", self.name)));
        }
        if !(0.0..=100.0).contains(&self.visual_threshold) {
            return Err(E2eError::SpecParse(format!(
                "scenario '{}' visual_threshold {} is outside 0..=100",
                self.name, self.visual_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: org-create
tags: [organizations, smoke]
steps:
  - action: navigate
    url: /#/organizations
    wait_for_selector: 'a[aria-label=Add]'
  - action: fill
    selector: '#org-name'
    value: org
  - action: screenshot
    name: org-form
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.name, "org-create");
        assert_eq!(scenario.steps.len(), 3);
        assert!(scenario.requires_login);
        assert!(scenario.has_tag("smoke"));
        assert_eq!(scenario.window, None);
        assert_eq!(scenario.steps[1].label(), "fill:#org-name");
    }

    #[test]
    fn test_render_substitutes_test_id() {
        let yaml = r#"
name: "team-{{test_id}}"
window: 1024x768
steps:
  - action: assert
    selector: 'dd[data-cy*="name"]'
    text: "create-team-{{ test_id }}"
"#;
        let scenario = Scenario::render(yaml, &vars(&[(TEST_ID_VAR, "abc123")])).unwrap();
        assert_eq!(scenario.name, "team-abc123");
        assert_eq!(
            scenario.window,
            Some(WindowSize::Fixed {
                width: 1024,
                height: 768
            })
        );
        match &scenario.steps[0] {
            Step::Assert { text, .. } => assert_eq!(text.as_deref(), Some("create-team-abc123")),
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_substitute_errors() {
        assert!(substitute("{{missing}}", &vars(&[])).is_err());
        assert!(substitute("open {{test_id", &vars(&[(TEST_ID_VAR, "x")])).is_err());
        assert_eq!(substitute("no placeholders", &vars(&[])).unwrap(), "no placeholders");
    }

    #[test]
    fn test_rejects_empty_steps_and_bad_threshold() {
        assert!(Scenario::from_yaml("name: x\nsteps: []\n").is_err());
        let yaml = "name: x\nvisual_threshold: 150\nsteps:\n  - action: sleep\n    ms: 1\n";
        assert!(Scenario::from_yaml(yaml).is_err());
    }
}
