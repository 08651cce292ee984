//! Usage: Token Store (access/refresh tokens + OAuth-session flag) with memory and file backends.
//!
//! Store operations are total: they never fail. The file backend logs persist failures and keeps
//! serving its in-memory view, so a read-only disk degrades to a memory-only session.

use crate::shared::error::{ClientError, ClientResult};
use crate::shared::fs::write_atomic;
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::mask_token;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted layout, keyed by fixed names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoredTokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(alias = "isOAuthAuthenticated")]
    pub oauth_authenticated: bool,
}

impl StoredTokens {
    fn normalized(mut self) -> Self {
        self.access_token = normalize_token(self.access_token.as_deref());
        self.refresh_token = normalize_token(self.refresh_token.as_deref());
        self
    }
}

fn normalize_token(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Key-value storage for the Token Pair and the OAuth-session flag.
///
/// Several coordinators may share one store; it is the only place tokens are mutated.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn set_access_token(&self, token: &str);
    fn refresh_token(&self) -> Option<String>;
    fn set_refresh_token(&self, token: &str);
    fn is_oauth_authenticated(&self) -> bool;
    fn set_oauth_authenticated(&self, value: bool);

    /// Removes both tokens. The OAuth flag is left as is.
    fn clear_tokens(&self);

    /// Removes both tokens and resets the OAuth flag.
    fn clear_all(&self) {
        self.clear_tokens();
        self.set_oauth_authenticated(false);
    }

    fn snapshot(&self) -> StoredTokens {
        StoredTokens {
            access_token: self.access_token(),
            refresh_token: self.refresh_token(),
            oauth_authenticated: self.is_oauth_authenticated(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<StoredTokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            inner: Mutex::new(tokens.normalized()),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.inner.lock_or_recover().access_token.clone()
    }

    fn set_access_token(&self, token: &str) {
        self.inner.lock_or_recover().access_token = normalize_token(Some(token));
    }

    fn refresh_token(&self) -> Option<String> {
        self.inner.lock_or_recover().refresh_token.clone()
    }

    fn set_refresh_token(&self, token: &str) {
        self.inner.lock_or_recover().refresh_token = normalize_token(Some(token));
    }

    fn is_oauth_authenticated(&self) -> bool {
        self.inner.lock_or_recover().oauth_authenticated
    }

    fn set_oauth_authenticated(&self, value: bool) {
        self.inner.lock_or_recover().oauth_authenticated = value;
    }

    fn clear_tokens(&self) {
        let mut inner = self.inner.lock_or_recover();
        inner.access_token = None;
        inner.refresh_token = None;
    }
}

/// JSON file backed store; every mutation is written through atomically (temp file + rename).
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    inner: Mutex<StoredTokens>,
}

impl FileTokenStore {
    /// Opens (or lazily creates) the token file. A corrupt file is treated as an empty session.
    pub fn open(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let path = path.into();
        let tokens = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<StoredTokens>(&raw) {
                Ok(tokens) => tokens.normalized(),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        "token file is not valid json; starting with an empty session: {}",
                        err
                    );
                    StoredTokens::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoredTokens::default(),
            Err(err) => {
                return Err(ClientError::Storage(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        };

        tracing::debug!(
            path = %path.display(),
            access_token = %tokens.access_token.as_deref().map(mask_token).unwrap_or_default(),
            has_refresh_token = tokens.refresh_token.is_some(),
            oauth_authenticated = tokens.oauth_authenticated,
            "token store opened"
        );

        Ok(Self {
            path,
            inner: Mutex::new(tokens),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, mutate: impl FnOnce(&mut StoredTokens)) {
        let mut inner = self.inner.lock_or_recover();
        mutate(&mut inner);
        if let Err(err) = persist(&self.path, &inner) {
            tracing::warn!(path = %self.path.display(), "token store persist failed: {}", err);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&StoredTokens) -> T) -> T {
        f(&self.inner.lock_or_recover())
    }
}

fn persist(path: &Path, tokens: &StoredTokens) -> std::io::Result<()> {
    let encoded = serde_json::to_vec_pretty(tokens)?;
    write_atomic(path, &encoded)
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        self.read(|t| t.access_token.clone())
    }

    fn set_access_token(&self, token: &str) {
        self.update(|t| t.access_token = normalize_token(Some(token)));
    }

    fn refresh_token(&self) -> Option<String> {
        self.read(|t| t.refresh_token.clone())
    }

    fn set_refresh_token(&self, token: &str) {
        self.update(|t| t.refresh_token = normalize_token(Some(token)));
    }

    fn is_oauth_authenticated(&self) -> bool {
        self.read(|t| t.oauth_authenticated)
    }

    fn set_oauth_authenticated(&self, value: bool) {
        self.update(|t| t.oauth_authenticated = value);
    }

    fn clear_tokens(&self) {
        self.update(|t| {
            t.access_token = None;
            t.refresh_token = None;
        });
    }

    fn clear_all(&self) {
        self.update(|t| *t = StoredTokens::default());
    }
}
