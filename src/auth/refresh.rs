//! Usage: Refresh procedure (cookie or refresh-token grant against `POST /auth/refresh-token`).
//!
//! On failure of any kind the session is torn down: both tokens and the OAuth flag are cleared and
//! one `auth:failed` event is emitted. Callers waiting on the refresh receive the same error.

use crate::auth::events::{AuthEvents, AuthFailedEvent};
use crate::auth::token_store::TokenStore;
use crate::shared::error::{ClientError, ClientResult};
use crate::shared::security::{mask_token, sanitize_body_snippet};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Body sent to the refresh endpoint. OAuth sessions send `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequestBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshedTokens {
    #[serde(default, alias = "access_token")]
    pub access_token: Option<String>,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

pub(crate) fn build_refresh_body(store: &dyn TokenStore) -> ClientResult<RefreshRequestBody> {
    if store.is_oauth_authenticated() {
        return Ok(RefreshRequestBody::default());
    }
    let refresh_token = store
        .refresh_token()
        .ok_or(ClientError::MissingRefreshToken)?;
    Ok(RefreshRequestBody {
        refresh_token: Some(refresh_token),
    })
}

/// Writes a successful refresh into the store.
///
/// The old refresh token is kept when the server does not rotate it.
pub(crate) fn apply_refreshed_tokens(
    store: &dyn TokenStore,
    oauth: bool,
    tokens: &RefreshedTokens,
) -> ClientResult<()> {
    let access_token = tokens
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let refresh_token = tokens
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match access_token {
        Some(token) => store.set_access_token(token),
        // Cookie sessions may renew the cookie without handing out a bearer token.
        None if oauth => {}
        None => {
            return Err(ClientError::refresh_failed(
                None,
                "refresh response missing accessToken",
            ))
        }
    }
    if let Some(token) = refresh_token {
        store.set_refresh_token(token);
    }
    Ok(())
}

async fn parse_refresh_response(response: reqwest::Response) -> ClientResult<RefreshedTokens> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        ClientError::refresh_failed(
            Some(status.as_u16()),
            format!("refresh response read failed: {e}"),
        )
    })?;

    if !status.is_success() {
        return Err(ClientError::refresh_failed(
            Some(status.as_u16()),
            format!(
                "refresh endpoint returned status={} body={}",
                status.as_u16(),
                sanitize_body_snippet(&body)
            ),
        ));
    }

    if body.trim().is_empty() {
        return Ok(RefreshedTokens::default());
    }
    serde_json::from_str(&body).map_err(|e| {
        ClientError::refresh_failed(
            Some(status.as_u16()),
            format!("refresh response json invalid: {e}"),
        )
    })
}

/// One refresh endpoint bound to a token store and an event hub.
pub(crate) struct RefreshProcedure {
    http: reqwest::Client,
    url: Url,
    timeout: Duration,
    store: Arc<dyn TokenStore>,
    events: AuthEvents,
}

impl RefreshProcedure {
    pub(crate) fn new(
        http: reqwest::Client,
        url: Url,
        timeout: Duration,
        store: Arc<dyn TokenStore>,
        events: AuthEvents,
    ) -> Self {
        Self {
            http,
            url,
            timeout,
            store,
            events,
        }
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn set_http(&mut self, http: reqwest::Client) {
        self.http = http;
    }

    pub(crate) fn set_events(&mut self, events: AuthEvents) {
        self.events = events;
    }

    pub(crate) async fn run(&self, label: &str) -> ClientResult<()> {
        let oauth = self.store.is_oauth_authenticated();
        let started = Instant::now();
        tracing::info!(
            coordinator = label,
            oauth_session = oauth,
            endpoint = %self.url,
            "access token rejected; refreshing session"
        );

        let outcome = match tokio::time::timeout(self.timeout, self.exchange(oauth)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::refresh_timed_out(self.timeout)),
        };

        match &outcome {
            Ok(()) => {
                tracing::info!(
                    coordinator = label,
                    oauth_session = oauth,
                    access_token = %self.store.access_token().as_deref().map(mask_token).unwrap_or_default(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "session refreshed"
                );
            }
            Err(err) => {
                tracing::warn!(
                    coordinator = label,
                    oauth_session = oauth,
                    code = err.code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "session refresh failed; clearing credentials: {}",
                    err
                );
                self.store.clear_all();
                self.events.emit(&AuthFailedEvent::from_error(err));
            }
        }
        outcome
    }

    async fn exchange(&self, oauth: bool) -> ClientResult<()> {
        let body = build_refresh_body(self.store.as_ref())?;
        let response = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::refresh_failed(None, format!("refresh request failed: {e}")))?;
        let tokens = parse_refresh_response(response).await?;
        apply_refreshed_tokens(self.store.as_ref(), oauth, &tokens)
    }
}
