//! Usage: Wiring for the user and admin API coordinators (shared store, cookie jar and auth events).

use crate::auth::coordinator::{build_http_client, RequestCoordinator, ADMIN_LABEL};
use crate::auth::events::AuthEvents;
use crate::auth::token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
use crate::infra::settings::ClientSettings;
use crate::shared::error::ClientResult;
use std::sync::Arc;

#[derive(Debug)]
pub struct ApiClients {
    pub api: RequestCoordinator,
    pub admin: RequestCoordinator,
    events: AuthEvents,
}

impl ApiClients {
    /// Builds both coordinators. Tokens persist to `token_store_path` when set, else stay in memory.
    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        let store: Arc<dyn TokenStore> = match settings.token_store_path.as_deref() {
            Some(path) => Arc::new(FileTokenStore::open(path)?),
            None => Arc::new(MemoryTokenStore::new()),
        };
        Self::with_store(settings, store)
    }

    pub fn with_store(settings: &ClientSettings, store: Arc<dyn TokenStore>) -> ClientResult<Self> {
        let http = build_http_client(settings)?;
        let events = AuthEvents::new();

        let api = RequestCoordinator::from_parts(
            settings,
            &settings.base_url,
            Arc::clone(&store),
            http.clone(),
            events.clone(),
        )?;
        let admin = RequestCoordinator::from_parts(
            settings,
            settings.admin_base_url(),
            store,
            http,
            events.clone(),
        )?
        .with_label(ADMIN_LABEL);

        tracing::debug!(
            api_base_url = %api.base_url(),
            admin_base_url = %admin.base_url(),
            "api clients ready"
        );
        Ok(Self { api, admin, events })
    }

    pub fn auth_events(&self) -> &AuthEvents {
        &self.events
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        self.api.token_store()
    }
}
