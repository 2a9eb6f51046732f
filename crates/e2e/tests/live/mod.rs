//! Shared setup for suites that run against a real controller

#![allow(dead_code)]

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tracing::info;

use towerqa_common::QaConfig;
use towerqa_e2e::api::{Connection, ConnectionOptions};
use towerqa_e2e::factories::CreatedUser;
use towerqa_e2e::{init_tracing, E2eResult, Factories};

/// Configuration plus an admin connection for one live test
///
/// `admin` holds a login session rather than Basic credentials so it can
/// still restore settings after a test turns Basic auth off.
pub struct Live {
    pub config: QaConfig,
    pub admin: Connection,
}

impl Live {
    /// Connection that authenticates with basic auth as `username`
    pub fn basic(&self, username: &str, password: &str) -> Connection {
        self.anonymous().with_basic_auth(username, password)
    }

    /// Connection with no credentials and an empty cookie jar
    pub fn anonymous(&self) -> Connection {
        self.admin.fresh()
    }

    pub fn as_user(&self, user: &CreatedUser) -> Connection {
        self.basic(user.username(), &user.password)
    }

    /// Session-cookie connection logged in as `user`
    pub async fn session(&self, user: &CreatedUser) -> Connection {
        let conn = self.anonymous();
        conn.login(user.username(), &user.password, "/")
            .await
            .unwrap_or_else(|e| panic!("login as {} failed: {e}", user.username()));
        conn
    }

    pub fn factories(&self) -> Factories<'_> {
        Factories::from_config(&self.admin, &self.config)
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.timeouts.poll_interval()
    }

    pub fn job_timeout(&self) -> Duration {
        towerqa_common::config::resolve_timeout(self.config.timeouts.job())
    }
}

/// Live context, or `None` (logged) when no controller is configured
pub async fn context() -> Option<Live> {
    init_tracing();
    let config = match QaConfig::from_env() {
        Ok(Some(config)) => config,
        Ok(None) => {
            info!("TOWERQA_BASE_URL is not set; skipping live test");
            return None;
        }
        Err(e) => panic!("invalid towerqa configuration: {e}"),
    };

    let admin = Connection::new(config.base_url(), ConnectionOptions::from(&config))
        .unwrap_or_else(|e| panic!("cannot build connection: {e}"));
    let credentials = &config.credentials.admin;
    admin
        .login(&credentials.username, &credentials.password, "/")
        .await
        .unwrap_or_else(|e| panic!("admin login as {} failed: {e}", credentials.username));

    Some(Live { config, admin })
}

/// Run `body`, then delete what `factories` created whether the body
/// returned, failed or panicked
pub async fn torn_down<T>(factories: &Factories<'_>, body: impl Future<Output = E2eResult<T>>) -> T {
    let outcome = AssertUnwindSafe(body).catch_unwind().await;
    factories.teardown().await;
    match outcome {
        Ok(result) => result.unwrap_or_else(|e| panic!("{e}")),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Bind the live context or return from the test
macro_rules! live_or_skip {
    () => {
        match live::context().await {
            Some(live) => live,
            None => return,
        }
    };
}
