//! In-process stand-in for the controller's login, settings and websocket
//! endpoints, used by the harness self-tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE, LOCATION, SET_COOKIE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use base64::Engine;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const CSRF_TOKEN: &str = "mock-csrf-token";
pub const BEARER_CHALLENGE: &str = "Bearer realm=api authorization_url=/api/o/authorize/";
pub const ADMIN: (&str, &str) = ("admin", "password");
pub const ALICE: (&str, &str) = ("alice", "wonderland");
pub const BOB: (&str, &str) = ("bob", "builder");

struct MockUser {
    id: i64,
    username: String,
    password: String,
    is_superuser: bool,
}

struct Session {
    key: String,
    user_id: i64,
}

struct Subscriber {
    session: String,
    tx: mpsc::UnboundedSender<(String, Value)>,
}

struct MockState {
    users: Vec<MockUser>,
    settings: Map<String, Value>,
    /// Oldest first
    sessions: Vec<Session>,
    subscribers: Vec<Subscriber>,
    settings_patches: usize,
    next_session: u64,
}

impl MockState {
    fn new() -> Self {
        let users = [(1, ADMIN, true), (2, ALICE, false), (3, BOB, false)]
            .into_iter()
            .map(|(id, (username, password), is_superuser)| MockUser {
                id,
                username: username.to_string(),
                password: password.to_string(),
                is_superuser,
            })
            .collect();
        let settings = json!({
            "SESSIONS_PER_USER": -1,
            "SESSION_COOKIE_AGE": 1800,
            "AUTH_BASIC_ENABLED": true,
        });
        Self {
            users,
            settings: settings.as_object().cloned().unwrap_or_default(),
            sessions: Vec::new(),
            subscribers: Vec::new(),
            settings_patches: 0,
            next_session: 0,
        }
    }

    fn cookie_age(&self) -> i64 {
        self.settings["SESSION_COOKIE_AGE"].as_i64().unwrap_or(1800)
    }

    fn user(&self, id: i64) -> &MockUser {
        self.users.iter().find(|u| u.id == id).expect("known user")
    }

    fn session_user(&self, key: &str) -> Option<i64> {
        self.sessions.iter().find(|s| s.key == key).map(|s| s.user_id)
    }

    /// Drop the user's oldest sessions beyond the limit and notify their sockets
    fn enforce_session_limit(&mut self, user_id: i64) {
        let limit = self.settings["SESSIONS_PER_USER"].as_i64().unwrap_or(-1);
        if limit < 1 {
            return;
        }
        loop {
            let owned: Vec<usize> = self
                .sessions
                .iter()
                .enumerate()
                .filter(|(_, s)| s.user_id == user_id)
                .map(|(i, _)| i)
                .collect();
            if owned.len() as i64 <= limit {
                break;
            }
            let kicked = self.sessions.remove(owned[0]);
            let group = format!("limit_reached_{}", user_id);
            for sub in self.subscribers.iter().filter(|s| s.session == kicked.key) {
                let _ = sub.tx.send((
                    group.clone(),
                    json!({ "group_name": "control", "reason": "limit_reached" }),
                ));
            }
            self.subscribers.retain(|s| s.session != kicked.key);
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// A mock controller listening on an ephemeral local port
pub struct MockController {
    url: String,
    state: Shared,
    task: JoinHandle<()>,
}

impl MockController {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState::new()));
        let app = Router::new()
            .route("/api/login/", get(login_form).post(login_submit))
            .route("/api/v2/me/", get(me))
            .route(
                "/api/v2/settings/authentication/",
                get(get_settings).patch(patch_settings),
            )
            .route("/websocket/", get(websocket))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock controller");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{}", addr),
            state,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn setting(&self, key: &str) -> Value {
        lock(&self.state).settings.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn set_setting(&self, key: &str, value: Value) {
        lock(&self.state).settings.insert(key.to_string(), value);
    }

    pub fn settings_patches(&self) -> usize {
        lock(&self.state).settings_patches
    }

    pub fn active_sessions(&self, username: &str) -> usize {
        let state = lock(&self.state);
        let Some(user) = state.users.iter().find(|u| u.username == username) else {
            return 0;
        };
        state.sessions.iter().filter(|s| s.user_id == user.id).count()
    }

    pub fn user_id(&self, username: &str) -> i64 {
        lock(&self.state)
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.id)
            .expect("known user")
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn header_value(value: String) -> HeaderValue {
    HeaderValue::from_str(&value).expect("valid header")
}

fn challenge(detail: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static(BEARER_CHALLENGE));
    (StatusCode::UNAUTHORIZED, headers, Json(json!({ "detail": detail }))).into_response()
}

enum Identity {
    Session(String, i64),
    Basic(i64),
}

fn authenticate(state: &MockState, headers: &HeaderMap) -> Result<Identity, Response> {
    if let Some(key) = cookies(headers).get("sessionid") {
        if let Some(user_id) = state.session_user(key) {
            return Ok(Identity::Session(key.clone(), user_id));
        }
    }

    let Some(auth) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Err(challenge("Authentication credentials were not provided."));
    };
    if state.settings["AUTH_BASIC_ENABLED"] != Value::Bool(true) {
        return Err(challenge("Authentication credentials were not provided."));
    }
    let decoded = auth
        .strip_prefix("Basic ")
        .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
        .and_then(|raw| String::from_utf8(raw).ok());
    let Some((username, password)) = decoded.as_deref().and_then(|d| d.split_once(':')) else {
        return Err(challenge("Invalid basic header."));
    };
    state
        .users
        .iter()
        .find(|u| u.username == username && u.password == password)
        .map(|u| Identity::Basic(u.id))
        .ok_or_else(|| challenge("Invalid username/password."))
}

async fn login_form() -> Response {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        header_value(format!("csrftoken={}; Path=/; Max-Age=31449600; SameSite=Lax", CSRF_TOKEN)),
    );
    (StatusCode::OK, headers, "<form>login</form>").into_response()
}

async fn login_submit(
    State(state): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let csrf_header = headers.get("X-CSRFToken").and_then(|v| v.to_str().ok());
    if csrf_header != Some(CSRF_TOKEN) || cookies(&headers).get("csrftoken").map(String::as_str) != Some(CSRF_TOKEN) {
        return (StatusCode::FORBIDDEN, "CSRF verification failed").into_response();
    }

    let mut state = lock(&state);
    let username = form.get("username").cloned().unwrap_or_default();
    let password = form.get("password").cloned().unwrap_or_default();
    let Some(user_id) = state
        .users
        .iter()
        .find(|u| u.username == username && u.password == password)
        .map(|u| u.id)
    else {
        return (StatusCode::OK, "Please enter a correct username and password.").into_response();
    };

    state.next_session += 1;
    let key = format!("session{:04}", state.next_session);
    state.sessions.push(Session {
        key: key.clone(),
        user_id,
    });
    state.enforce_session_limit(user_id);

    let mut headers = HeaderMap::new();
    headers.insert(
        LOCATION,
        header_value(form.get("next").cloned().unwrap_or_else(|| "/".to_string())),
    );
    headers.append(
        SET_COOKIE,
        header_value(format!(
            "sessionid={}; Path=/; HttpOnly; Max-Age={}",
            key,
            state.cookie_age()
        )),
    );
    (StatusCode::FOUND, headers).into_response()
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = lock(&state);
    let identity = match authenticate(&state, &headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    let mut out = HeaderMap::new();
    let user_id = match identity {
        Identity::Session(key, user_id) => {
            // every authenticated request slides the session expiry
            out.append(
                SET_COOKIE,
                header_value(format!(
                    "sessionid={}; Path=/; HttpOnly; Max-Age={}",
                    key,
                    state.cookie_age()
                )),
            );
            user_id
        }
        Identity::Basic(user_id) => user_id,
    };
    let user = state.user(user_id);
    let body = json!({
        "count": 1,
        "next": null,
        "previous": null,
        "results": [{ "id": user.id, "username": user.username, "is_superuser": user.is_superuser }],
    });
    (StatusCode::OK, out, Json(body)).into_response()
}

fn require_superuser(state: &MockState, headers: &HeaderMap) -> Result<(), Response> {
    let user_id = match authenticate(state, headers)? {
        Identity::Session(_, id) | Identity::Basic(id) => id,
    };
    if state.user(user_id).is_superuser {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, Json(json!({ "detail": "forbidden" }))).into_response())
    }
}

async fn get_settings(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = lock(&state);
    if let Err(response) = require_superuser(&state, &headers) {
        return response;
    }
    Json(Value::Object(state.settings.clone())).into_response()
}

async fn patch_settings(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Response {
    let mut state = lock(&state);
    if let Err(response) = require_superuser(&state, &headers) {
        return response;
    }
    let Some(patch) = patch.as_object() else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "detail": "expected an object" }))).into_response();
    };
    if let Some(unknown) = patch.keys().find(|k| !state.settings.contains_key(*k)) {
        let detail = format!("unknown setting {}", unknown);
        return (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response();
    }
    for (key, value) in patch {
        state.settings.insert(key.clone(), value.clone());
    }
    state.settings_patches += 1;
    Json(Value::Object(state.settings.clone())).into_response()
}

async fn websocket(State(state): State<Shared>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let session = {
        let state = lock(&state);
        cookies(&headers)
            .get("sessionid")
            .and_then(|key| state.session_user(key).map(|user| (key.clone(), user)))
    };
    match session {
        Some((key, user_id)) => ws.on_upgrade(move |socket| serve_socket(socket, state, key, user_id)),
        None => (StatusCode::FORBIDDEN, "no session").into_response(),
    }
}

async fn serve_socket(mut socket: WebSocket, state: Shared, session: String, user_id: i64) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    lock(&state).subscribers.push(Subscriber {
        session: session.clone(),
        tx,
    });

    let hello = json!({ "accept": true, "user": user_id });
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    let mut groups: Vec<String> = Vec::new();
    loop {
        tokio::select! {
            biased;
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let request: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    if request["xrftoken"] != CSRF_TOKEN {
                        let _ = socket.send(Message::Text(json!({ "error": "invalid xrftoken" }).to_string())).await;
                        continue;
                    }
                    if let Some(channels) = request["groups"].as_object() {
                        for names in channels.values() {
                            for name in names.as_array().into_iter().flatten().filter_map(Value::as_str) {
                                groups.push(name.to_string());
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            pushed = rx.recv() => match pushed {
                Some((group, payload)) => {
                    if groups.contains(&group) {
                        let _ = socket.send(Message::Text(payload.to_string())).await;
                    }
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                None => break,
            },
        }
    }

    lock(&state).subscribers.retain(|s| s.session != session);
}
