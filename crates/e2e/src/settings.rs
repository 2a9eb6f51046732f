//! Scoped overrides of controller-wide settings
//!
//! Settings such as `SESSIONS_PER_USER` live on the controller and are
//! shared by every test talking to it. An override records the current
//! value of each key it touches and writes those values back when the test
//! body is done, however it ends. The controller offers no per-test
//! isolation, so every test using an override must also be annotated with
//! `#[serial(settings)]`.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::api::Connection;
use crate::error::{E2eError, E2eResult};

/// Settings category holding session and authentication knobs
pub const AUTHENTICATION: &str = "authentication";

/// An applied settings change that has to be restored
pub struct SettingsOverride<'a> {
    conn: &'a Connection,
    category: String,
    original: Map<String, Value>,
    restored: bool,
}

impl<'a> SettingsOverride<'a> {
    /// Capture the current values of the keys in `patch`, then apply it
    pub async fn apply(conn: &'a Connection, category: &str, patch: Value) -> E2eResult<Self> {
        let keys: Vec<String> = match patch.as_object() {
            Some(map) if !map.is_empty() => map.keys().cloned().collect(),
            _ => {
                return Err(E2eError::AssertionFailed(format!(
                    "settings patch for '{}' must be a non-empty object, got {}",
                    category, patch
                )))
            }
        };

        let current = conn.v2().settings(category).await?;
        let mut original = Map::new();
        for key in keys {
            let value = current.get(&key).cloned().ok_or_else(|| {
                E2eError::AssertionFailed(format!("setting {}.{} does not exist", category, key))
            })?;
            original.insert(key, value);
        }

        info!("Overriding {} settings: {}", category, patch);
        conn.v2().patch_settings(category, patch).await?;

        Ok(Self {
            conn,
            category: category.to_string(),
            original,
            restored: false,
        })
    }

    /// Values in effect before the override
    pub fn original(&self) -> &Map<String, Value> {
        &self.original
    }

    /// Write the captured values back
    pub async fn restore(mut self) -> E2eResult<()> {
        self.restored = true;
        let original = Value::Object(self.original.clone());
        info!("Restoring {} settings: {}", self.category, original);
        match self.conn.v2().patch_settings(&self.category, original).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.status() == Some(401) {
                    error!(
                        "Restoring {} settings was refused with 401; the override revoked the \
                         connection's own credentials and the controller keeps {:?} changed",
                        self.category,
                        self.original.keys().collect::<Vec<_>>()
                    );
                }
                Err(e)
            }
        }
    }
}

impl Drop for SettingsOverride<'_> {
    fn drop(&mut self) {
        if !self.restored {
            error!(
                "{} settings override dropped without restore; controller still has {:?} overridden",
                self.category,
                self.original.keys().collect::<Vec<_>>()
            );
        }
    }
}

/// Run `body` with `patch` applied to `category`, restoring the original
/// values on success, error and panic alike.
pub async fn with_settings<T, F, Fut>(
    conn: &Connection,
    category: &str,
    patch: Value,
    body: F,
) -> E2eResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = E2eResult<T>>,
{
    let guard = SettingsOverride::apply(conn, category, patch).await?;
    let outcome = AssertUnwindSafe(async move { body().await }).catch_unwind().await;
    let restored = guard.restore().await;

    match outcome {
        Err(panic) => {
            if let Err(e) = restored {
                error!("Failed to restore {} settings after panic: {}", category, e);
            }
            std::panic::resume_unwind(panic)
        }
        Ok(Err(e)) => {
            if let Err(restore_err) = restored {
                error!("Failed to restore {} settings: {}", category, restore_err);
            }
            Err(e)
        }
        Ok(Ok(value)) => {
            restored?;
            Ok(value)
        }
    }
}
