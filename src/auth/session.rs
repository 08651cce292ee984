//! Usage: Session lifecycle on top of the token store (login, OAuth callback, logout).

use crate::auth::token_store::TokenStore;
use serde::{Deserialize, Serialize};

/// Token pair as returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Anonymous,
    TokenPair,
    OAuthCookie,
}

/// Token-pair login: stores both tokens and leaves cookie mode.
pub fn begin_token_session(store: &dyn TokenStore, pair: &TokenPair) {
    store.clear_tokens();
    store.set_access_token(&pair.access_token);
    if let Some(refresh_token) = pair.refresh_token.as_deref() {
        store.set_refresh_token(refresh_token);
    }
    store.set_oauth_authenticated(false);
    tracing::info!(
        has_refresh_token = store.refresh_token().is_some(),
        "token session started"
    );
}

/// OAuth redirect callback: the server set a session cookie; a bearer token is optional.
pub fn begin_oauth_session(store: &dyn TokenStore, access_token: Option<&str>) {
    store.clear_tokens();
    if let Some(token) = access_token {
        store.set_access_token(token);
    }
    store.set_oauth_authenticated(true);
    tracing::info!(
        has_access_token = store.access_token().is_some(),
        "oauth session started"
    );
}

pub fn end_session(store: &dyn TokenStore) {
    store.clear_all();
    tracing::info!("session ended");
}

pub fn session_kind(store: &dyn TokenStore) -> SessionKind {
    if store.is_oauth_authenticated() {
        SessionKind::OAuthCookie
    } else if store.access_token().is_some() || store.refresh_token().is_some() {
        SessionKind::TokenPair
    } else {
        SessionKind::Anonymous
    }
}
