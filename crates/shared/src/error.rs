//! API error type and extraction of user-facing error text.

/// Error returned by request/response calls to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("deserialization error: {0}")]
    Deserialize(String),
    /// No credential was available, so the call was never attempted.
    #[error("not authenticated")]
    NotAuthenticated,
}

impl ApiError {
    /// Whether the failure means the credential is missing or rejected.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ApiError::NotAuthenticated => true,
            ApiError::Http { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    /// Short message suitable for an error banner.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => "Unable to reach the server. Check your connection.".into(),
            ApiError::Http { status, body } => try_error_detail(body)
                .unwrap_or_else(|| format!("The server returned an error ({status}).")),
            ApiError::Deserialize(_) => "The server sent an unexpected response.".into(),
            ApiError::NotAuthenticated => "You are not signed in.".into(),
        }
    }
}

/// Extract a human-readable message from a REST error body.
///
/// Understands `{"detail": "..."}`, `{"non_field_errors": [...]}` and field
/// error maps such as `{"content": ["This field may not be blank."]}`, tried
/// in that order; among fields the first error wins.
pub fn try_error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;

    if let Some(detail) = object.get("detail").and_then(first_error) {
        return Some(detail.to_string());
    }
    if let Some(general) = object.get("non_field_errors").and_then(first_error) {
        return Some(general.to_string());
    }

    object
        .iter()
        .find_map(|(field, errors)| Some(format!("{field}: {}", first_error(errors)?)))
}

fn first_error(value: &serde_json::Value) -> Option<&str> {
    let text = match value {
        serde_json::Value::String(s) => Some(s.as_str()),
        serde_json::Value::Array(items) => items.iter().find_map(serde_json::Value::as_str),
        _ => None,
    }?;
    (!text.trim().is_empty()).then_some(text)
}
