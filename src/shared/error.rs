//! Usage: Unified client error model (every failure renders as `CODE: message`).

use std::sync::Arc;
use std::time::Duration;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// A 401 with no fresher session to retry under: the request was already retried once, or
    /// the session ended while it was in flight.
    #[error("AUTH_UNAUTHORIZED: {method} {url} rejected; no session left to retry with")]
    Unauthorized { method: String, url: String },

    /// Token-pair session without a stored refresh token.
    #[error("AUTH_MISSING_REFRESH_TOKEN: no refresh token available")]
    MissingRefreshToken,

    #[error("AUTH_REFRESH_FAILED: {detail}")]
    RefreshFailed { status: Option<u16>, detail: String },

    /// A queued request stopped waiting on a refresh another request is still running. The
    /// session is left alone; the running refresh decides its outcome.
    #[error("AUTH_REFRESH_FAILED: gave up waiting for in-flight refresh after {waited_secs}s")]
    RefreshWaitTimedOut { waited_secs: u64 },

    /// Any non-2xx status other than 401, passed through untouched.
    #[error("HTTP_STATUS: {method} {url} returned status={status} body={body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("SYSTEM_ERROR: request failed: {0}")]
    Transport(#[source] Arc<reqwest::Error>),

    #[error("SYSTEM_ERROR: response decode failed: {0}")]
    Decode(String),

    #[error("SEC_INVALID_INPUT: {0}")]
    InvalidInput(String),

    #[error("SYSTEM_ERROR: settings error: {0}")]
    Config(String),

    #[error("SYSTEM_ERROR: token storage error: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "AUTH_UNAUTHORIZED",
            Self::MissingRefreshToken => "AUTH_MISSING_REFRESH_TOKEN",
            Self::RefreshFailed { .. } | Self::RefreshWaitTimedOut { .. } => "AUTH_REFRESH_FAILED",
            Self::Status { .. } => "HTTP_STATUS",
            Self::InvalidInput(_) => "SEC_INVALID_INPUT",
            Self::Transport(_) | Self::Decode(_) | Self::Config(_) | Self::Storage(_) => {
                "SYSTEM_ERROR"
            }
        }
    }

    pub(crate) fn refresh_failed(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::RefreshFailed {
            status,
            detail: detail.into(),
        }
    }

    pub(crate) fn refresh_timed_out(after: Duration) -> Self {
        Self::refresh_failed(
            None,
            format!("refresh did not settle within {}s", after.as_secs()),
        )
    }

    pub(crate) fn refresh_wait_timed_out(after: Duration) -> Self {
        Self::RefreshWaitTimedOut {
            waited_secs: after.as_secs(),
        }
    }

    /// True when the request failed because its session could not be refreshed.
    ///
    /// Every such failure from the refresh itself has already cleared credentials and emitted
    /// `auth:failed`. [`ClientError::RefreshWaitTimedOut`] also reports true but leaves the
    /// session untouched.
    pub fn is_refresh_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingRefreshToken | Self::RefreshFailed { .. } | Self::RefreshWaitTimedOut { .. }
        )
    }

    /// HTTP status attached to the failure, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::RefreshFailed { status, .. } => *status,
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(Arc::new(value))
    }
}

impl From<ClientError> for String {
    fn from(value: ClientError) -> Self {
        value.to_string()
    }
}
