//! Client error kinds shared by the session store, the access helpers, and
//! the backend API client.
//!
//! ERROR HANDLING
//! ==============
//! Callers match on the variant (and status where present), never on message
//! text. `user_message` is the only place that turns an error into prose.

use crate::net::transport::GuardedAction;
use crate::state::storage::StorageError;

// =============================================================================
// PAYLOAD
// =============================================================================

/// Error body returned by the backend alongside a non-success status.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    /// The body parsed as JSON and is kept structured.
    Json(serde_json::Value),
    /// The body was not JSON; the raw text is kept as-is.
    Text(String),
    Empty,
}

impl ErrorPayload {
    /// Classify a raw response body.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(trimmed.to_owned()),
        }
    }

    /// Best human-readable message carried by the payload.
    ///
    /// Looks at `detail.message`, then a string `detail`, then `message`, then
    /// a bare JSON string body, and finally the raw text.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Json(value) => {
                let detail = value.get("detail");
                detail
                    .and_then(|d| d.get("message"))
                    .and_then(serde_json::Value::as_str)
                    .or_else(|| detail.and_then(serde_json::Value::as_str))
                    .or_else(|| value.get("message").and_then(serde_json::Value::as_str))
                    .or_else(|| value.as_str())
                    .map(str::to_owned)
            }
            Self::Text(text) => Some(text.clone()),
            Self::Empty => None,
        }
    }
}

/// One field-level validation failure reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Login or registration was rejected (401/403 on an auth endpoint).
    #[error("invalid credentials (status {status})")]
    InvalidCredentials { status: u16, payload: ErrorPayload },

    /// The backend rejected the request body (422).
    #[error("validation failed: {}", describe_fields(.0))]
    ValidationFailed(Vec<FieldError>),

    /// The credential was missing or rejected. `status` is `None` when the
    /// refusal happened locally because nobody is signed in.
    #[error("unauthorized")]
    Unauthorized { status: Option<u16>, payload: ErrorPayload },

    /// A guest tried an action that needs an account. Raised before any request.
    #[error("guests cannot {action}")]
    GuestForbidden { action: GuardedAction },

    /// The request never produced an HTTP response.
    #[error("connection failed: {0}")]
    Connectivity(String),

    /// Durable session data could not be read back.
    #[error("persisted session is corrupt: {0}")]
    CorruptPersistedState(String),

    /// Any other non-success status.
    #[error("unexpected response: status {status}")]
    Unknown { status: u16, payload: ErrorPayload },

    /// Another login or registration is already in flight.
    #[error("a sign-in request is already in progress")]
    Busy,

    /// The session changed while the request was in flight; its result was dropped.
    #[error("session changed while the request was in flight")]
    Superseded,

    #[error("session storage failed: {0}")]
    Storage(#[from] StorageError),

    /// A success response could not be decoded.
    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Stable machine-readable code for logs and UI branching.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials { .. } => "E_INVALID_CREDENTIALS",
            Self::ValidationFailed(_) => "E_VALIDATION_FAILED",
            Self::Unauthorized { .. } => "E_UNAUTHORIZED",
            Self::GuestForbidden { .. } => "E_GUEST_FORBIDDEN",
            Self::Connectivity(_) => "E_CONNECTIVITY",
            Self::CorruptPersistedState(_) => "E_CORRUPT_PERSISTED_STATE",
            Self::Unknown { .. } => "E_UNKNOWN",
            Self::Busy => "E_BUSY",
            Self::Superseded => "E_SUPERSEDED",
            Self::Storage(_) => "E_STORAGE",
            Self::Decode(_) => "E_DECODE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Config(_) => "E_CONFIG",
        }
    }

    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_) | Self::Unauthorized { .. } | Self::Busy | Self::Unknown { status: 429 | 500..=599, .. }
        )
    }

    /// Text suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Connectivity(_) => "Could not reach the server. Check your connection and try again.".to_owned(),
            Self::Unauthorized { status: None, .. } => "Please log in to continue.".to_owned(),
            Self::Unauthorized { .. } => "Your session could not be verified. Try again or log in again.".to_owned(),
            Self::ValidationFailed(fields) => describe_fields(fields),
            Self::GuestForbidden { action } => format!("Guests cannot {action}. Please log in."),
            Self::Busy => "Already signing in, please wait.".to_owned(),
            Self::InvalidCredentials { payload, .. } => with_backend_text("Invalid email or password.", payload),
            Self::Unknown { payload, .. } => with_backend_text("Something went wrong.", payload),
            _ => "Something went wrong.".to_owned(),
        }
    }
}

fn with_backend_text(generic: &str, payload: &ErrorPayload) -> String {
    match payload.message() {
        Some(text) => format!("{generic} {text}"),
        None => generic.to_owned(),
    }
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| if f.field.is_empty() { f.message.clone() } else { format!("{}: {}", f.field, f.message) })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
