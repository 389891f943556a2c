//! Credential transport: auth headers, local guest refusal, and response
//! classification.
//!
//! SYSTEM CONTEXT
//! ==============
//! `ApiClient` routes every request through these helpers. They are pure so
//! the header and status rules can be tested without a server.

use std::fmt;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use super::credential::{BearerToken, Credential};
use crate::error::{ClientError, ErrorPayload, FieldError};

// =============================================================================
// GUARDED ACTIONS
// =============================================================================

/// Backend operations that require a real account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedAction {
    Vote,
    Submit,
    UpdateProfile,
    ViewProfile,
    CreateTournament,
    JoinTournament,
}

impl fmt::Display for GuardedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Vote => "vote",
            Self::Submit => "submit entries",
            Self::UpdateProfile => "update a profile",
            Self::ViewProfile => "access a user profile",
            Self::CreateTournament => "create tournaments",
            Self::JoinTournament => "join tournaments",
        };
        f.write_str(text)
    }
}

/// Resolve the bearer token for `action`, refusing guests and anonymous users
/// before any request exists.
///
/// # Errors
///
/// `GuestForbidden` for the guest credential, `Unauthorized` with no status
/// when there is no credential at all.
pub fn require_bearer(credential: Option<&Credential>, action: GuardedAction) -> Result<BearerToken, ClientError> {
    match credential {
        Some(Credential::Bearer(token)) => Ok(token.clone()),
        Some(Credential::Guest) => Err(ClientError::GuestForbidden { action }),
        None => Err(ClientError::Unauthorized { status: None, payload: ErrorPayload::Empty }),
    }
}

// =============================================================================
// HEADERS
// =============================================================================

/// Build the header set for a request.
///
/// `Authorization` is attached only for a real bearer token; it is omitted
/// entirely when the credential is absent or the guest sentinel.
#[must_use]
pub fn auth_headers(credential: Option<&Credential>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(token) = credential.and_then(Credential::bearer) {
        // BearerToken only admits visible ASCII, which is always a valid header value.
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token.as_str())) {
            headers.insert(AUTHORIZATION, value);
        }
    }
    headers
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Which family of endpoint produced a response; 401/403 mean different
/// things on the credential endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Login and registration.
    Credentials,
    /// Everything else.
    Standard,
}

/// Convert a non-success status and its body into a typed error.
#[must_use]
pub fn classify(kind: RequestKind, status: u16, body: &str) -> ClientError {
    let payload = ErrorPayload::parse(body);
    match (status, kind) {
        (401 | 403, RequestKind::Credentials) => ClientError::InvalidCredentials { status, payload },
        (401 | 403, RequestKind::Standard) => ClientError::Unauthorized { status: Some(status), payload },
        (422, _) => ClientError::ValidationFailed(field_errors(&payload)),
        _ => ClientError::Unknown { status, payload },
    }
}

/// Extract field-level detail from a 422 body.
///
/// Understands the `{"detail": [{"loc": [...], "msg": "..."}]}` shape; any
/// other body becomes a single entry with an empty field name.
fn field_errors(payload: &ErrorPayload) -> Vec<FieldError> {
    let entries = match payload {
        ErrorPayload::Json(value) => value.get("detail").and_then(serde_json::Value::as_array),
        _ => None,
    };

    let fields: Vec<FieldError> = entries
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let message = entry.get("msg").and_then(serde_json::Value::as_str)?;
            let field = entry
                .get("loc")
                .and_then(serde_json::Value::as_array)
                .and_then(|loc| loc.last())
                .map(|last| match last {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            Some(FieldError { field, message: message.to_owned() })
        })
        .collect();

    if !fields.is_empty() {
        return fields;
    }
    let message = payload.message().unwrap_or_else(|| "invalid request".to_owned());
    vec![FieldError { field: String::new(), message }]
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
