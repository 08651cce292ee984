#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taleex_api_client::{
    AuthFailedEvent, ClientSettings, MemoryTokenStore, RequestCoordinator, StoredTokens,
    TokenStore,
};

const SESSION_COOKIE: &str = "taleex_session";

#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    Issue {
        access_token: &'static str,
        refresh_token: Option<&'static str>,
    },
    /// Renews the session cookie only; no bearer token in the body.
    CookieOnly { cookie: &'static str },
    Reject(u16),
    Hang,
}

pub struct MockState {
    valid_token: Mutex<Option<String>>,
    valid_cookie: Mutex<Option<String>>,
    refresh_behavior: Mutex<RefreshBehavior>,
    refresh_delay: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    refresh_bodies: Mutex<Vec<Value>>,
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl MockState {
    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if let (Some(bearer), Some(valid)) = (bearer, self.valid_token.lock().unwrap().as_deref()) {
            if bearer == valid {
                return true;
            }
        }

        let cookie_header = headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        match self.valid_cookie.lock().unwrap().as_deref() {
            Some(valid) => cookie_header
                .split(';')
                .filter_map(|part| part.trim().split_once('='))
                .any(|(name, value)| name == SESSION_COOKIE && value == valid),
            None => false,
        }
    }

    fn record(&self, uri: &Uri, headers: &HeaderMap) {
        let auth = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen
            .lock()
            .unwrap()
            .push((uri.path().to_string(), auth));
    }
}

pub struct MockApi {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockApi {
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            valid_token: Mutex::new(None),
            valid_cookie: Mutex::new(None),
            refresh_behavior: Mutex::new(RefreshBehavior::Issue {
                access_token: "A2",
                refresh_token: None,
            }),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_calls: AtomicUsize::new(0),
            refresh_bodies: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/api/jobs", get(protected))
            .route("/api/companies", get(protected))
            .route("/api/users", get(protected))
            .route("/api/always-401", get(always_unauthorized))
            .route("/api/slow-401", get(slow_unauthorized))
            .route("/api/public", get(public))
            .route("/api/boom", get(boom))
            .route("/api/rotate", get(rotate))
            .route("/api/echo", post(echo))
            .route("/api/auth/refresh-token", post(refresh))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind mock api");
        let port = listener.local_addr().expect("local addr").port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}/api"),
            state,
        }
    }

    pub fn accept_token(&self, token: &str) {
        *self.state.valid_token.lock().unwrap() = Some(token.to_string());
    }

    pub fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        *self.state.refresh_behavior.lock().unwrap() = behavior;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock().unwrap() = delay;
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_bodies(&self) -> Vec<Value> {
        self.state.refresh_bodies.lock().unwrap().clone()
    }

    /// Authorization headers received for `path`, in arrival order.
    pub fn authorizations_for(&self, path: &str) -> Vec<Option<String>> {
        self.state
            .seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, auth)| auth.clone())
            .collect()
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            refresh_timeout_seconds: 5,
            refresh_wait_timeout_seconds: 5,
            ..ClientSettings::default()
        }
    }

    pub fn coordinator(&self, store: Arc<dyn TokenStore>) -> RequestCoordinator {
        RequestCoordinator::new(&self.settings(), store).expect("coordinator")
    }
}

pub fn store_with(
    access_token: Option<&str>,
    refresh_token: Option<&str>,
    oauth: bool,
) -> Arc<dyn TokenStore> {
    Arc::new(MemoryTokenStore::with_tokens(StoredTokens {
        access_token: access_token.map(str::to_string),
        refresh_token: refresh_token.map(str::to_string),
        oauth_authenticated: oauth,
    }))
}

/// Polls `condition` every 10ms for up to 5s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

pub fn collect_auth_failures(coordinator: &RequestCoordinator) -> Arc<Mutex<Vec<AuthFailedEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    coordinator.on_auth_failed(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

async fn protected(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    state.record(&uri, &headers);
    if state.is_authorized(&headers) {
        (StatusCode::OK, Json(json!({ "path": uri.path(), "items": [] }))).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized" })),
        )
            .into_response()
    }
}

async fn always_unauthorized(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.record(&uri, &headers);
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Unauthorized" })),
    )
        .into_response()
}

/// Answers 401 only after a concurrent refresh has had time to finish.
async fn slow_unauthorized(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.record(&uri, &headers);
    tokio::time::sleep(Duration::from_millis(800)).await;
    StatusCode::UNAUTHORIZED.into_response()
}

async fn public(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    state.record(&uri, &headers);
    (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
}

async fn boom(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    state.record(&uri, &headers);
    (StatusCode::INTERNAL_SERVER_ERROR, "exploded").into_response()
}

async fn rotate(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    state.record(&uri, &headers);
    if !state.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    *state.valid_token.lock().unwrap() = Some("A-rotated".to_string());
    (
        StatusCode::OK,
        Json(json!({ "accessToken": "A-rotated", "ok": true })),
    )
        .into_response()
}

async fn echo(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    state.record(&uri, &headers);
    if !state.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (
        StatusCode::OK,
        Json(json!({ "query": query, "body": body })),
    )
        .into_response()
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    state.refresh_bodies.lock().unwrap().push(body);

    let delay = *state.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let behavior = state.refresh_behavior.lock().unwrap().clone();
    match behavior {
        RefreshBehavior::Issue {
            access_token,
            refresh_token,
        } => {
            *state.valid_token.lock().unwrap() = Some(access_token.to_string());
            let mut payload = json!({ "accessToken": access_token });
            if let Some(refresh_token) = refresh_token {
                payload["refreshToken"] = json!(refresh_token);
            }
            (StatusCode::OK, Json(payload)).into_response()
        }
        RefreshBehavior::CookieOnly { cookie } => {
            *state.valid_cookie.lock().unwrap() = Some(cookie.to_string());
            (
                StatusCode::OK,
                [(SET_COOKIE, format!("{SESSION_COOKIE}={cookie}; Path=/; HttpOnly"))],
                Json(json!({ "ok": true })),
            )
                .into_response()
        }
        RefreshBehavior::Reject(status) => (
            StatusCode::from_u16(status).expect("status"),
            Json(json!({ "message": "refresh rejected", "refreshToken": "leaked-refresh-token-value" })),
        )
            .into_response(),
        RefreshBehavior::Hang => {
            tokio::time::sleep(Duration::from_secs(60)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}
