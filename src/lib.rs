//! TaleeX API client: bearer-token requests with transparent, single-flight session refresh.
//!
//! ```no_run
//! use std::sync::Arc;
//! use taleex_api_client::{ApiClients, ClientSettings};
//!
//! # async fn demo() -> taleex_api_client::ClientResult<()> {
//! let settings = ClientSettings::default().apply_env_overrides();
//! let _log_guard = taleex_api_client::infra::logging::init(&settings);
//! let clients = ApiClients::from_settings(&settings)?;
//! clients.auth_events().on_auth_failed(|event| eprintln!("{}: {}", event.name, event.reason));
//! let jobs = clients.api.get("/jobs").await?;
//! println!("{}", jobs.text());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod infra;
mod shared;

pub use auth::coordinator::{build_http_client, ApiRequest, ApiResponse, RequestCoordinator};
pub use auth::events::{AuthEvents, AuthFailedEvent, ListenerId, AUTH_FAILED_EVENT};
pub use auth::session::{
    begin_oauth_session, begin_token_session, end_session, session_kind, SessionKind, TokenPair,
};
pub use auth::single_flight::{Flight, FlightLeader, FlightWaiter, SingleFlight};
pub use auth::token_store::{FileTokenStore, MemoryTokenStore, StoredTokens, TokenStore};
pub use client::ApiClients;
pub use infra::settings::ClientSettings;
pub use reqwest::{Method, StatusCode};
pub use shared::error::{ClientError, ClientResult};
