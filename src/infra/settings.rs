//! Usage: Client settings (schema + TOML read/write helpers + env overrides).

use crate::shared::error::{ClientError, ClientResult};
use crate::shared::fs::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh-token";
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u32 = 0;
pub const DEFAULT_REFRESH_TIMEOUT_SECONDS: u32 = 15;
pub const DEFAULT_REFRESH_WAIT_TIMEOUT_SECONDS: u32 = 30;
const DEFAULT_LOG_FILTER: &str = "info";
const MAX_REQUEST_TIMEOUT_SECONDS: u32 = 10 * 60;
const MAX_REFRESH_TIMEOUT_SECONDS: u32 = 5 * 60;
const MAX_REFRESH_WAIT_TIMEOUT_SECONDS: u32 = 10 * 60;

pub const ENV_BASE_URL: &str = "TALEEX_API_BASE_URL";
pub const ENV_ADMIN_BASE_URL: &str = "TALEEX_ADMIN_API_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub schema_version: u32,
    pub base_url: String,
    // Separate API root for the admin coordinator; falls back to `base_url`.
    pub admin_base_url: Option<String>,
    pub refresh_path: String,
    // 0 disables the per-request timeout.
    pub request_timeout_seconds: u32,
    pub refresh_timeout_seconds: u32,
    pub refresh_wait_timeout_seconds: u32,
    pub token_store_path: Option<PathBuf>,
    pub user_agent: String,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            base_url: DEFAULT_BASE_URL.to_string(),
            admin_base_url: None,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            refresh_timeout_seconds: DEFAULT_REFRESH_TIMEOUT_SECONDS,
            refresh_wait_timeout_seconds: DEFAULT_REFRESH_WAIT_TIMEOUT_SECONDS,
            token_store_path: None,
            user_agent: format!("taleex-api-client/{}", env!("CARGO_PKG_VERSION")),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs))),
        }
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.refresh_timeout_seconds.max(1)))
    }

    pub fn refresh_wait_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.refresh_wait_timeout_seconds.max(1)))
    }

    pub fn admin_base_url(&self) -> &str {
        self.admin_base_url
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(self.base_url.as_str())
    }

    /// Clamps numeric fields and fills blank strings with defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        self.schema_version = SCHEMA_VERSION;
        self.base_url = non_blank_or(self.base_url, &defaults.base_url);
        self.admin_base_url = self
            .admin_base_url
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self.refresh_path = non_blank_or(self.refresh_path, &defaults.refresh_path);
        if !self.refresh_path.starts_with('/') && !is_absolute_url(&self.refresh_path) {
            self.refresh_path = format!("/{}", self.refresh_path);
        }
        self.user_agent = non_blank_or(self.user_agent, &defaults.user_agent);
        self.log_filter = non_blank_or(self.log_filter, &defaults.log_filter);

        self.request_timeout_seconds = self
            .request_timeout_seconds
            .min(MAX_REQUEST_TIMEOUT_SECONDS);
        self.refresh_timeout_seconds = self
            .refresh_timeout_seconds
            .clamp(1, MAX_REFRESH_TIMEOUT_SECONDS);
        self.refresh_wait_timeout_seconds = self
            .refresh_wait_timeout_seconds
            .clamp(1, MAX_REFRESH_WAIT_TIMEOUT_SECONDS);
        self
    }

    /// Applies `TALEEX_API_BASE_URL` / `TALEEX_ADMIN_API_BASE_URL` when set and non-blank.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(url) = env_non_blank(ENV_BASE_URL) {
            tracing::debug!(base_url = %url, "base url overridden from {}", ENV_BASE_URL);
            self.base_url = url;
        }
        if let Some(url) = env_non_blank(ENV_ADMIN_BASE_URL) {
            tracing::debug!(admin_base_url = %url, "admin base url overridden from {}", ENV_ADMIN_BASE_URL);
            self.admin_base_url = Some(url);
        }
        self
    }
}

fn non_blank_or(value: String, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn env_non_blank(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn is_absolute_url(raw: &str) -> bool {
    let lower = raw.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Reads settings from a TOML file. A missing file yields defaults.
pub fn read(path: &Path) -> ClientResult<ClientSettings> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "settings file missing; using defaults");
            return Ok(ClientSettings::default());
        }
        Err(err) => {
            return Err(ClientError::Config(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };

    let settings: ClientSettings = toml::from_str(&raw)
        .map_err(|e| ClientError::Config(format!("invalid settings {}: {e}", path.display())))?;

    if settings.schema_version > SCHEMA_VERSION {
        tracing::warn!(
            path = %path.display(),
            schema_version = settings.schema_version,
            supported = SCHEMA_VERSION,
            "settings written by a newer client; unknown fields are ignored"
        );
    }

    Ok(settings.sanitized())
}

pub fn write(path: &Path, settings: &ClientSettings) -> ClientResult<ClientSettings> {
    let settings = settings.clone().sanitized();
    let encoded = toml::to_string_pretty(&settings)
        .map_err(|e| ClientError::Config(format!("failed to encode settings: {e}")))?;

    write_atomic(path, encoded.as_bytes())
        .map_err(|e| ClientError::Config(format!("failed to write {}: {e}", path.display())))?;

    Ok(settings)
}
