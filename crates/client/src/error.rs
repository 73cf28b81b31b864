//! Client-side error types.

use dealflow_shared::ApiError;

/// Invalid messaging configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),
}

/// Failure of the duplex channel. Never returned to callers of the
/// messenger; it only drives connection status and logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel I/O failed: {0}")]
    Io(String),
    #[error("channel is closed")]
    Closed,
}

/// Failure to hand a request to the messenger task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessengerError {
    #[error("messenger has shut down")]
    Stopped,
}

/// Which operation an error banner refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConversationList,
    MessageHistory,
    Send,
    NotAuthenticated,
}

/// A user-visible, non-fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBanner {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBanner {
    /// Banner for a failed call; missing or rejected credentials always map
    /// to [`ErrorKind::NotAuthenticated`].
    pub fn from_api(kind: ErrorKind, error: &ApiError) -> Self {
        let kind = if error.is_auth_failure() {
            ErrorKind::NotAuthenticated
        } else {
            kind
        };
        Self {
            kind,
            message: error.user_message(),
        }
    }

    pub fn not_authenticated() -> Self {
        Self::from_api(ErrorKind::NotAuthenticated, &ApiError::NotAuthenticated)
    }
}
