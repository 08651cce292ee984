//! Usage: Authenticated request coordinator (bearer attach, 401 recovery, single-flight refresh).
//!
//! Contract:
//! - Every request carries `Authorization: Bearer <token>` when the store holds an access token;
//!   cookies are always enabled so OAuth cookie sessions work without a bearer token.
//! - A 401 triggers at most one refresh per coordinator at a time. Requests that hit 401 while a
//!   refresh is running queue behind it (FIFO) and retry with whatever token is current when the
//!   refresh settles.
//! - A request is retried at most once; a second 401 is terminal.
//! - A 401 for a session that ended while the request was in flight (store emptied by a failed
//!   refresh or a logout) is terminal; the ended session was already reported once.
//! - Other non-2xx statuses and transport errors are returned as-is, without touching credentials.

use crate::auth::events::{AuthEvents, AuthFailedEvent, ListenerId};
use crate::auth::refresh::RefreshProcedure;
use crate::auth::single_flight::{Flight, SingleFlight};
use crate::auth::token_store::TokenStore;
use crate::infra::settings::{is_absolute_url, ClientSettings};
use crate::shared::error::{ClientError, ClientResult};
use crate::shared::security::mask_token;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LABEL: &str = "api";
pub(crate) const ADMIN_LABEL: &str = "admin";

#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> ClientResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ClientError::InvalidInput(format!("request body is not json: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_json_value(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Extra header. `Authorization` is ignored: credentials only come from the token store.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if name != AUTHORIZATION {
            self.headers.append(name, value);
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_retry(&self) -> bool {
        self.retried
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    async fn read(response: reqwest::Response) -> ClientResult<Self> {
        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            url,
            headers,
            body,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::Decode(format!("{} {}: {e}", self.status.as_u16(), self.url)))
    }

    /// Server-issued access token rotation: a non-empty top-level `accessToken` in a JSON body.
    pub(crate) fn rotated_access_token(&self) -> Option<String> {
        let first = self.body.iter().find(|b| !b.is_ascii_whitespace())?;
        if *first != b'{' {
            return None;
        }
        let value: Value = serde_json::from_slice(&self.body).ok()?;
        value
            .get("accessToken")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

pub(crate) fn resolve_url(base: &Url, path: &str) -> ClientResult<Url> {
    let path = path.trim();
    let raw = if is_absolute_url(path) {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&raw).map_err(|e| ClientError::InvalidInput(format!("invalid url {raw}: {e}")))
}

fn parse_base_url(raw: &str) -> ClientResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ClientError::InvalidInput(format!("invalid base url {raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidInput(format!(
            "unsupported base url scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Cookie-enabled HTTP client configured from settings.
pub fn build_http_client(settings: &ClientSettings) -> ClientResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .cookie_store(true)
        .user_agent(settings.user_agent.as_str());
    if let Some(timeout) = settings.request_timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(ClientError::from)
}

/// One API surface (e.g. user API or admin API) with its own refresh single-flight.
///
/// Coordinators may share a token store, an [`AuthEvents`] hub and an HTTP client (and with it the
/// cookie jar); the refresh in-flight state is never shared.
pub struct RequestCoordinator {
    label: String,
    base_url: Url,
    http: reqwest::Client,
    store: Arc<dyn TokenStore>,
    events: AuthEvents,
    refresh: RefreshProcedure,
    refresh_flight: SingleFlight<ClientResult<()>>,
    refresh_wait_timeout: Duration,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("label", &self.label)
            .field("base_url", &self.base_url.as_str())
            .field("refresh_url", &self.refresh.url().as_str())
            .field("refreshing", &self.refresh_flight.is_in_flight())
            .finish()
    }
}

impl RequestCoordinator {
    /// Coordinator for the main API (`settings.base_url`).
    pub fn new(settings: &ClientSettings, store: Arc<dyn TokenStore>) -> ClientResult<Self> {
        Self::with_base_url(settings, settings.base_url.as_str(), store)
    }

    /// Coordinator for the admin API (`settings.admin_base_url`, falling back to `base_url`).
    pub fn for_admin(settings: &ClientSettings, store: Arc<dyn TokenStore>) -> ClientResult<Self> {
        Ok(Self::with_base_url(settings, settings.admin_base_url(), store)?.with_label(ADMIN_LABEL))
    }

    pub fn with_base_url(
        settings: &ClientSettings,
        base_url: &str,
        store: Arc<dyn TokenStore>,
    ) -> ClientResult<Self> {
        Self::from_parts(
            settings,
            base_url,
            store,
            build_http_client(settings)?,
            AuthEvents::new(),
        )
    }

    /// Coordinator over an existing HTTP client (and cookie jar) and event hub.
    pub fn from_parts(
        settings: &ClientSettings,
        base_url: &str,
        store: Arc<dyn TokenStore>,
        http: reqwest::Client,
        events: AuthEvents,
    ) -> ClientResult<Self> {
        let base_url = parse_base_url(base_url)?;
        let refresh_url = resolve_url(&base_url, &settings.refresh_path)?;
        let refresh = RefreshProcedure::new(
            http.clone(),
            refresh_url,
            settings.refresh_timeout(),
            Arc::clone(&store),
            events.clone(),
        );

        Ok(Self {
            label: DEFAULT_LABEL.to_string(),
            base_url,
            http,
            store,
            events,
            refresh,
            refresh_flight: SingleFlight::new(),
            refresh_wait_timeout: settings.refresh_wait_timeout(),
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Share an event hub (e.g. one hub for the user and admin coordinators).
    pub fn with_auth_events(mut self, events: AuthEvents) -> Self {
        self.refresh.set_events(events.clone());
        self.events = events;
        self
    }

    /// Use a custom HTTP client (shared cookie jar, connection pool reuse, testing).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.refresh.set_http(client.clone());
        self.http = client;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn auth_events(&self) -> &AuthEvents {
        &self.events
    }

    pub fn on_auth_failed<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AuthFailedEvent) + Send + Sync + 'static,
    {
        self.events.on_auth_failed(callback)
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_flight.is_in_flight()
    }

    /// Requests currently queued behind the running refresh.
    pub fn queued_behind_refresh(&self) -> usize {
        self.refresh_flight.waiting()
    }

    pub async fn get(&self, path: &str) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::get(path)).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::post(path).with_json(body)?).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::put(path).with_json(body)?).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::patch(path).with_json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::delete(path)).await
    }

    pub async fn request(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        let mut request = request;
        loop {
            let (response, sent_token) = self.dispatch(&request).await?;
            let status = response.status();

            if status.is_success() {
                self.absorb_rotated_token(&response);
                return Ok(response);
            }

            if status != StatusCode::UNAUTHORIZED {
                return Err(ClientError::Status {
                    method: request.method.to_string(),
                    url: response.url().to_string(),
                    status: status.as_u16(),
                    body: response.text(),
                });
            }

            if request.retried {
                tracing::warn!(
                    coordinator = %self.label,
                    method = %request.method,
                    path = %request.path,
                    "request rejected again after refresh; giving up"
                );
                return Err(ClientError::Unauthorized {
                    method: request.method.to_string(),
                    url: response.url().to_string(),
                });
            }

            if self.session_ended_in_flight(sent_token.as_deref()) {
                tracing::debug!(
                    coordinator = %self.label,
                    method = %request.method,
                    path = %request.path,
                    "session ended while request was in flight; not refreshing again"
                );
                return Err(ClientError::Unauthorized {
                    method: request.method.to_string(),
                    url: response.url().to_string(),
                });
            }

            request.retried = true;
            self.recover_from_unauthorized(sent_token.as_deref()).await?;
        }
    }

    async fn dispatch(&self, request: &ApiRequest) -> ClientResult<(ApiResponse, Option<String>)> {
        let url = resolve_url(&self.base_url, &request.path)?;
        let token = self.store.access_token();

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let response = ApiResponse::read(response).await?;
        tracing::debug!(
            coordinator = %self.label,
            method = %request.method,
            path = %request.path,
            status = response.status().as_u16(),
            retry = request.retried,
            bearer = token.is_some(),
            "request completed"
        );
        Ok((response, token))
    }

    /// The request carried a token, and the store now holds no credentials at all: a failed refresh
    /// or a logout already ended that session and reported it.
    fn session_ended_in_flight(&self, sent_token: Option<&str>) -> bool {
        sent_token.is_some()
            && self.store.access_token().is_none()
            && self.store.refresh_token().is_none()
            && !self.store.is_oauth_authenticated()
    }

    /// Gets a usable token after a first 401: reuse a token rotated meanwhile, join the running
    /// refresh, or run it.
    async fn recover_from_unauthorized(&self, sent_token: Option<&str>) -> ClientResult<()> {
        let current = self.store.access_token();
        if current.is_some() && current.as_deref() != sent_token {
            tracing::debug!(
                coordinator = %self.label,
                "access token changed while request was in flight; retrying without refresh"
            );
            return Ok(());
        }

        loop {
            match self.refresh_flight.begin() {
                Flight::Leader(leader) => {
                    let outcome = self.refresh.run(&self.label).await;
                    let released = leader.settle(outcome.clone());
                    if released > 0 {
                        tracing::debug!(
                            coordinator = %self.label,
                            released,
                            refreshed = outcome.is_ok(),
                            "released requests queued behind refresh"
                        );
                    }
                    return outcome;
                }
                Flight::Follower(waiter) => {
                    tracing::debug!(coordinator = %self.label, "refresh in flight; queueing request");
                    match tokio::time::timeout(self.refresh_wait_timeout, waiter.wait()).await {
                        Ok(Some(outcome)) => return outcome,
                        // Leader was cancelled before settling; try again (possibly as leader).
                        Ok(None) => continue,
                        Err(_) => {
                            tracing::warn!(
                                coordinator = %self.label,
                                wait_secs = self.refresh_wait_timeout.as_secs(),
                                "gave up waiting for in-flight refresh"
                            );
                            return Err(ClientError::refresh_wait_timed_out(
                                self.refresh_wait_timeout,
                            ));
                        }
                    }
                }
            }
        }
    }

    fn absorb_rotated_token(&self, response: &ApiResponse) {
        let Some(token) = response.rotated_access_token() else {
            return;
        };
        if self.store.access_token().as_deref() == Some(token.as_str()) {
            return;
        }
        tracing::debug!(
            coordinator = %self.label,
            access_token = %mask_token(&token),
            "server rotated access token"
        );
        self.store.set_access_token(&token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token_store::MemoryTokenStore;

    fn response_with_body(body: &str) -> ApiResponse {
        ApiResponse {
            status: StatusCode::OK,
            url: Url::parse("http://127.0.0.1/jobs").unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn resolve_url_joins_base_path_and_request_path() {
        let base = Url::parse("http://localhost:8000/api").unwrap();
        assert_eq!(
            resolve_url(&base, "/jobs").unwrap().as_str(),
            "http://localhost:8000/api/jobs"
        );
        assert_eq!(
            resolve_url(&base, "jobs?page=2").unwrap().as_str(),
            "http://localhost:8000/api/jobs?page=2"
        );

        let root = Url::parse("http://localhost:8000").unwrap();
        assert_eq!(
            resolve_url(&root, "/auth/refresh-token").unwrap().as_str(),
            "http://localhost:8000/auth/refresh-token"
        );
    }

    #[test]
    fn resolve_url_keeps_absolute_urls() {
        let base = Url::parse("http://localhost:8000/api").unwrap();
        assert_eq!(
            resolve_url(&base, "https://auth.taleex.test/refresh").unwrap().as_str(),
            "https://auth.taleex.test/refresh"
        );
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(parse_base_url("ftp://example.com").is_err());
        assert!(parse_base_url("not a url").is_err());
        assert!(parse_base_url("https://api.taleex.test").is_ok());
    }

    #[test]
    fn rotated_access_token_reads_top_level_field_only() {
        assert_eq!(
            response_with_body(r#"{"accessToken":" R1 "}"#)
                .rotated_access_token()
                .as_deref(),
            Some("R1")
        );
        assert_eq!(
            response_with_body(r#"{"data":{"accessToken":"R1"}}"#).rotated_access_token(),
            None
        );
        assert_eq!(response_with_body(r#"[{"accessToken":"R1"}]"#).rotated_access_token(), None);
        assert_eq!(response_with_body("plain text").rotated_access_token(), None);
        assert_eq!(response_with_body(r#"{"accessToken":""}"#).rotated_access_token(), None);
    }

    #[test]
    fn caller_authorization_header_is_ignored() {
        let request = ApiRequest::get("/jobs")
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer forged"))
            .with_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("abc"),
            );
        assert!(request.headers.get(AUTHORIZATION).is_none());
        assert_eq!(request.headers.get("x-request-id").unwrap(), "abc");
        assert!(!request.is_retry());
    }

    #[test]
    fn coordinators_resolve_their_own_refresh_url() {
        let settings = ClientSettings {
            base_url: "http://localhost:8000/api".to_string(),
            admin_base_url: Some("http://localhost:9000/admin".to_string()),
            ..ClientSettings::default()
        };
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());

        let api = RequestCoordinator::new(&settings, Arc::clone(&store)).expect("api");
        let admin = RequestCoordinator::for_admin(&settings, store).expect("admin");

        assert_eq!(api.label(), "api");
        assert_eq!(admin.label(), "admin");
        assert_eq!(
            api.refresh.url().as_str(),
            "http://localhost:8000/api/auth/refresh-token"
        );
        assert_eq!(
            admin.refresh.url().as_str(),
            "http://localhost:9000/admin/auth/refresh-token"
        );
        assert!(!api.is_refreshing());
    }

    #[test]
    fn from_parts_keeps_the_injected_event_hub() {
        let settings = ClientSettings::default();
        let events = AuthEvents::new();
        events.on_auth_failed(|_| {});

        let coordinator = RequestCoordinator::from_parts(
            &settings,
            "http://localhost:8000/api",
            Arc::new(MemoryTokenStore::new()),
            reqwest::Client::new(),
            events.clone(),
        )
        .expect("coordinator");

        assert_eq!(coordinator.auth_events().listener_count(), 1);
        coordinator.on_auth_failed(|_| {});
        assert_eq!(events.listener_count(), 2);
        assert_eq!(coordinator.queued_behind_refresh(), 0);
    }

    #[test]
    fn json_response_decodes_or_reports_decode_error() {
        let response = response_with_body(r#"{"items":[1,2]}"#);
        let value: Value = response.json().expect("json");
        assert_eq!(value["items"][1], 2);

        let err = response_with_body("nope").json::<Value>().expect_err("not json");
        assert_eq!(err.code(), "SYSTEM_ERROR");
    }
}
