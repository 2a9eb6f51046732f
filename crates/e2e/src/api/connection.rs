//! HTTP connection to the controller
//!
//! A [`Connection`] is one client identity: anonymous, basic auth, bearer
//! token, or a browser-style session established with [`Connection::login`].
//! Cookies are tracked by the connection itself rather than by reqwest so
//! that the suites can inspect each cookie's absolute expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use towerqa_common::QaConfig;

use crate::error::{E2eError, E2eResult};

pub const SESSION_COOKIE: &str = "sessionid";
pub const CSRF_COOKIE: &str = "csrftoken";
const CSRF_HEADER: &str = "X-CSRFToken";
const LOGIN_PATH: &str = "/api/login/";

/// How a connection authenticates its requests
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
    Token(String),
}

/// Transport options for a connection
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub verify_tls: bool,
    pub timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            verify_tls: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&QaConfig> for ConnectionOptions {
    fn from(config: &QaConfig) -> Self {
        Self {
            verify_tls: config.verify_tls,
            timeout: config.timeouts.request(),
        }
    }
}

/// A single stored cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub value: String,
    /// Absolute expiry; `None` for browser-session cookies
    pub expires: Option<DateTime<Utc>>,
}

/// Minimal cookie jar keyed by cookie name (one controller host per jar)
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: HashMap<String, StoredCookie>,
}

impl CookieJar {
    /// Record one `Set-Cookie` header value received at `now`
    pub fn store(&mut self, header: &str, now: DateTime<Utc>) {
        let parsed = match cookie::Cookie::parse(header.to_string()) {
            Ok(c) => c,
            Err(e) => {
                warn!("Ignoring unparsable Set-Cookie '{}': {}", header, e);
                return;
            }
        };

        // Max-Age takes precedence over Expires
        let expires = match parsed.max_age() {
            Some(age) => Some(now + chrono::Duration::seconds(age.whole_seconds())),
            None => parsed
                .expires_datetime()
                .and_then(|at| Utc.timestamp_opt(at.unix_timestamp(), 0).single()),
        };

        let name = parsed.name().to_string();
        if matches!(expires, Some(at) if at <= now) {
            trace!("Cookie {} expired by server", name);
            self.cookies.remove(&name);
            return;
        }

        self.cookies.insert(
            name,
            StoredCookie {
                value: parsed.value().to_string(),
                expires,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&StoredCookie> {
        self.cookies.get(name)
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.get(name).map(|c| c.value.clone())
    }

    pub fn expiry(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).and_then(|c| c.expires)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// `Cookie` request header for everything still valid at `now`
    pub fn header_value(&self, now: DateTime<Utc>) -> Option<String> {
        let mut pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|(_, c)| c.expires.map_or(true, |at| at > now))
            .map(|(name, c)| format!("{}={}", name, c.value))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        pairs.sort();
        Some(pairs.join("; "))
    }
}

/// Request payloads the controller accepts
#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Names of the cookies this response tried to set
    pub fn set_cookie_names(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|raw| raw.split('=').next())
            .map(|name| name.trim().to_string())
            .collect()
    }

    pub fn sets_cookie(&self, name: &str) -> bool {
        self.set_cookie_names().iter().any(|n| n == name)
    }

    pub fn json<T: DeserializeOwned>(&self) -> E2eResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn value(&self) -> E2eResult<Value> {
        self.json()
    }

    /// Turn a non-2xx response into [`E2eError::Api`]
    pub fn error_for_status(self) -> E2eResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    pub fn into_error(self) -> E2eError {
        E2eError::Api {
            method: self.method.to_string(),
            path: self.path,
            status: self.status.as_u16(),
            body: truncate(&self.body, 512),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// One authenticated identity talking to the controller
#[derive(Debug)]
pub struct Connection {
    base_url: String,
    client: reqwest::Client,
    auth: Auth,
    cookies: Mutex<CookieJar>,
}

impl Connection {
    pub fn new(base_url: &str, options: ConnectionOptions) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!options.verify_tls)
            .timeout(options.timeout)
            // login answers with a redirect that carries the session cookie
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            auth: Auth::Anonymous,
            cookies: Mutex::new(CookieJar::default()),
        })
    }

    pub fn from_config(config: &QaConfig) -> E2eResult<Self> {
        Self::new(config.base_url(), ConnectionOptions::from(config))
    }

    /// Anonymous connection to the same server with the same transport
    pub fn fresh(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            auth: Auth::Anonymous,
            cookies: Mutex::new(CookieJar::default()),
        }
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Auth::Basic {
            username: username.to_string(),
            password: password.to_string(),
        };
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.auth = Auth::Token(token.to_string());
        self
    }

    pub fn server(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn jar(&self) -> std::sync::MutexGuard<'_, CookieJar> {
        // a poisoned jar only means another test thread panicked mid-update
        self.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the cookie jar
    pub fn cookies(&self) -> CookieJar {
        self.jar().clone()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.jar().value(name)
    }

    pub fn cookie_expiry(&self, name: &str) -> Option<DateTime<Utc>> {
        self.jar().expiry(name)
    }

    pub fn session_id(&self) -> Option<String> {
        self.cookie(SESSION_COOKIE)
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.cookie(CSRF_COOKIE)
    }

    /// Send a request and read the whole response, whatever its status
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Body>,
    ) -> E2eResult<ApiResponse> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut builder = self.client.request(method.clone(), &url);
        if !query.is_empty() {
            builder = builder.query(query);
        }

        builder = match &self.auth {
            Auth::Anonymous => builder,
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Token(token) => builder.bearer_auth(token),
        };

        let (cookie_header, csrf) = {
            let jar = self.jar();
            (jar.header_value(Utc::now()), jar.value(CSRF_COOKIE))
        };
        if let Some(header) = cookie_header {
            builder = builder.header(COOKIE, header);
        }
        let unsafe_method = !matches!(method, Method::GET | Method::HEAD | Method::OPTIONS);
        if unsafe_method {
            if let Some(token) = csrf {
                builder = builder.header(CSRF_HEADER, token);
            }
            builder = builder.header(REFERER, format!("{}{}", self.base_url, LOGIN_PATH));
        }

        builder = match body {
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::Form(fields)) => builder.form(&fields),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        {
            let now = Utc::now();
            let mut jar = self.jar();
            for value in headers.get_all(SET_COOKIE).iter() {
                if let Ok(raw) = value.to_str() {
                    jar.store(raw, now);
                }
            }
        }

        let body = response.text().await?;
        trace!("{} {} -> {}", method, url, status);

        Ok(ApiResponse {
            method,
            path: path.to_string(),
            status,
            headers,
            body,
        })
    }

    pub async fn get(&self, path: &str) -> E2eResult<ApiResponse> {
        self.request(Method::GET, path, &[], None).await
    }

    pub async fn get_query(&self, path: &str, query: &[(&str, String)]) -> E2eResult<ApiResponse> {
        self.request(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> E2eResult<ApiResponse> {
        self.request(Method::POST, path, &[], Some(Body::Json(body))).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> E2eResult<ApiResponse> {
        self.request(Method::PATCH, path, &[], Some(Body::Json(body))).await
    }

    pub async fn delete(&self, path: &str) -> E2eResult<ApiResponse> {
        self.request(Method::DELETE, path, &[], None).await
    }

    /// Fetch the anonymous session prerequisites (the CSRF cookie)
    pub async fn get_session_requirements(&self) -> E2eResult<()> {
        let response = self.get(LOGIN_PATH).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        if self.csrf_token().is_none() {
            return Err(E2eError::Session(format!(
                "{} did not set a {} cookie",
                LOGIN_PATH, CSRF_COOKIE
            )));
        }
        Ok(())
    }

    /// Log in through the browser login form, establishing a session cookie
    pub async fn login(&self, username: &str, password: &str, next: &str) -> E2eResult<()> {
        if self.csrf_token().is_none() {
            self.get_session_requirements().await?;
        }

        let form = vec![
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
            ("next".to_string(), next.to_string()),
        ];
        let response = self
            .request(Method::POST, LOGIN_PATH, &[], Some(Body::Form(form)))
            .await?;

        if !(response.status.is_success() || response.status.is_redirection()) {
            return Err(response.into_error());
        }
        if self.session_id().is_none() {
            return Err(E2eError::Session(format!(
                "login as '{}' returned {} without a {} cookie",
                username, response.status, SESSION_COOKIE
            )));
        }

        debug!("Logged in as {}", username);
        Ok(())
    }

    /// Typed access to the `/api/v2/` endpoints
    pub fn v2(&self) -> super::v2::ApiV2<'_> {
        super::v2::ApiV2::new(self)
    }
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            auth: self.auth.clone(),
            cookies: Mutex::new(self.cookies()),
        }
    }
}

/// Header value helper used by the websocket client
pub(crate) fn cookie_header(session_id: &str, csrftoken: &str) -> E2eResult<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; {}={}",
        SESSION_COOKIE, session_id, CSRF_COOKIE, csrftoken
    ))
    .map_err(|e| E2eError::Session(format!("invalid cookie value: {}", e)))
}
