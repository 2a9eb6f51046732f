//! towerqa end-to-end harness
//!
//! Black-box test tooling for a job-orchestration controller, driven only
//! through its HTTP API, WebSocket channel, CLI and web UI:
//! - `api`: a session-aware HTTP connection plus typed `/api/v2/` helpers
//! - `ws`: the real-time event client
//! - `settings`: scoped overrides of controller-wide settings
//! - `cli`: running the command line client with a scrubbed environment
//! - `browser`, `pages`: Playwright driving and page objects
//! - `spec`, `runner`, `visual`: declarative YAML UI scenarios
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 test suites (tests/*.rs)                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Factories ──► ApiV2 ──► Connection (cookies, CSRF, auth)     │
//! │  WsClient ───────────────► /websocket/                        │
//! │  SettingsOverride ──► /api/v2/settings/<category>/            │
//! │  CliRunner ──► controller CLI binary                          │
//! │  Page objects ──► BrowserSession ──► node + playwright        │
//! │  ScenarioRunner ──► Scenario (YAML) + VisualTester            │
//! │  poll_until: shared by everything that waits                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod browser;
pub mod cli;
pub mod error;
pub mod factories;
pub mod pages;
pub mod poll;
pub mod runner;
pub mod settings;
pub mod spec;
pub mod visual;
pub mod ws;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

pub use api::{ApiV2, Connection, ConnectionOptions};
pub use browser::{BrowserConfig, BrowserSession, WindowSize};
pub use cli::{CliEnv, CliOutput, CliRunner};
pub use error::{E2eError, E2eResult};
pub use factories::Factories;
pub use pages::{LoginPage, OrganizationsPage, Page};
pub use poll::{poll_until, poll_until_true};
pub use runner::ScenarioRunner;
pub use settings::{with_settings, SettingsOverride};
pub use spec::{Scenario, Step};
pub use ws::{WsClient, WsOptions};

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process; `RUST_LOG`
/// overrides the default `info` level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // another harness may already own the global subscriber
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
