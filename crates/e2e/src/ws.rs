//! WebSocket client for the controller's push channel
//!
//! The controller authenticates sockets with the browser session cookies and
//! expects every subscription message to echo the CSRF token. Messages are
//! exposed as a finite, ordered sequence: reads are bounded by an idle
//! timeout so draining a quiet socket never hangs. A client cannot be
//! restarted; reconnect to observe new traffic.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, ORIGIN};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;

use crate::api::connection::cookie_header;
use crate::api::Connection;
use crate::error::{E2eError, E2eResult};
use towerqa_common::config::resolve_timeout;
use towerqa_common::QaConfig;

pub const WEBSOCKET_PATH: &str = "/websocket/";

/// Connection options for [`WsClient`]
#[derive(Debug, Clone)]
pub struct WsOptions {
    pub verify_tls: bool,
    pub connect_timeout: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            verify_tls: false,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&QaConfig> for WsOptions {
    fn from(config: &QaConfig) -> Self {
        Self {
            verify_tls: config.verify_tls,
            connect_timeout: resolve_timeout(config.timeouts.request()),
        }
    }
}

/// A control-channel event as pushed by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    #[serde(default)]
    pub user: Option<i64>,
    #[serde(default)]
    pub accept: Option<bool>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ControlEvent {
    /// Lenient view of any message; absent fields stay `None`
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn is_limit_reached(&self) -> bool {
        self.group_name.as_deref() == Some("control") && self.reason.as_deref() == Some("limit_reached")
    }
}

/// Name of the per-user control group announcing forced logouts
pub fn limit_reached_group(user_id: i64) -> String {
    format!("limit_reached_{}", user_id)
}

/// Rewrite a controller base URL into its websocket endpoint
pub fn websocket_url(base_url: &str) -> E2eResult<Url> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(E2eError::Session(format!(
                "cannot derive a websocket URL from scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| E2eError::Session(format!("cannot switch {} to {}", base_url, scheme)))?;
    url.set_path(WEBSOCKET_PATH);
    url.set_query(None);
    Ok(url)
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    csrftoken: String,
    closed: bool,
    received: usize,
}

impl WsClient {
    /// Open an authenticated socket for an existing browser session
    pub async fn connect(
        base_url: &str,
        session_id: &str,
        csrftoken: &str,
        options: WsOptions,
    ) -> E2eResult<Self> {
        let url = websocket_url(base_url)?;
        debug!("Connecting to WebSocket: {}", url);

        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(COOKIE, cookie_header(session_id, csrftoken)?);
        let origin = HeaderValue::from_str(base_url.trim_end_matches('/'))
            .map_err(|e| E2eError::Session(format!("invalid origin: {}", e)))?;
        request.headers_mut().insert(ORIGIN, origin);

        let connector = if url.scheme() == "wss" && !options.verify_tls {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (stream, response) = timeout(
            options.connect_timeout,
            connect_async_tls_with_config(request, None, false, connector),
        )
        .await
        .map_err(|_| E2eError::Timeout(format!("websocket handshake with {}", url)))??;
        debug!("WebSocket handshake completed: {}", response.status());

        Ok(Self {
            stream,
            csrftoken: csrftoken.to_string(),
            closed: false,
            received: 0,
        })
    }

    /// Open a socket using the cookies of a logged-in [`Connection`]
    pub async fn for_session(conn: &Connection, options: WsOptions) -> E2eResult<Self> {
        let session_id = conn
            .session_id()
            .ok_or_else(|| E2eError::Session("connection has no session cookie".to_string()))?;
        let csrftoken = conn
            .csrf_token()
            .ok_or_else(|| E2eError::Session("connection has no csrf cookie".to_string()))?;
        Self::connect(conn.server(), &session_id, &csrftoken, options).await
    }

    /// Subscribe to channel groups, e.g. `{"control": ["limit_reached_7"]}`
    pub async fn subscribe(&mut self, groups: Value) -> E2eResult<()> {
        let payload = json!({ "groups": groups, "xrftoken": self.csrftoken });
        trace!("Subscribing: {}", payload);
        self.stream.send(Message::Text(payload.to_string().into())).await?;
        Ok(())
    }

    /// Subscribe to named control-channel groups
    pub async fn subscribe_control(&mut self, groups: &[String]) -> E2eResult<()> {
        self.subscribe(json!({ "control": groups })).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Messages decoded so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Next decoded message, or `None` once `idle` passes without one or the
    /// socket is closed
    pub async fn next_message(&mut self, idle: Duration) -> E2eResult<Option<Value>> {
        if self.closed {
            return Ok(None);
        }

        let deadline = Instant::now() + idle;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = match timeout(remaining, self.stream.next()).await {
                Err(_) => return Ok(None),
                Ok(None) => {
                    self.closed = true;
                    return Ok(None);
                }
                Ok(Some(frame)) => frame,
            };

            let message = match frame {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    self.closed = true;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            let decoded = match message {
                Message::Text(text) => decode(text.as_bytes()),
                Message::Binary(bytes) => decode(&bytes),
                Message::Close(frame) => {
                    debug!("WebSocket closed by server: {:?}", frame);
                    self.closed = true;
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            self.received += 1;
            trace!("WebSocket message: {}", decoded);
            return Ok(Some(decoded));
        }
    }

    /// Drain messages until the socket is idle for `idle`, closes, or `max`
    /// messages have been read
    pub async fn collect(&mut self, idle: Duration, max: usize) -> E2eResult<Vec<Value>> {
        let mut messages = Vec::new();
        while messages.len() < max {
            match self.next_message(idle).await? {
                Some(message) => messages.push(message),
                None => break,
            }
        }
        debug!("Collected {} websocket message(s)", messages.len());
        Ok(messages)
    }

    pub async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => {
                warn!("WebSocket close failed: {}", e);
                Err(e.into())
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
