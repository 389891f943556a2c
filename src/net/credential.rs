//! Credential values as they travel between durable storage and requests.
//!
//! DESIGN
//! ======
//! The guest sentinel and a real bearer token are distinct types. Code that
//! talks to guarded endpoints takes a `BearerToken`, which can never hold the
//! sentinel, so a guest credential cannot reach the network by construction.

use std::fmt;

/// Reserved credential value meaning "browsing without an account".
pub const GUEST_SENTINEL: &str = "guest";

/// An opaque bearer credential issued by the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Accept a raw token if it is usable as an `Authorization` header value.
    ///
    /// Rejects the empty string, the guest sentinel, and anything outside
    /// visible ASCII.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw == GUEST_SENTINEL || !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }
        Some(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// The credential slot of a non-anonymous session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Guest,
    Bearer(BearerToken),
}

impl Credential {
    /// Decode the stored `authToken` value. `None` means the value is unusable.
    #[must_use]
    pub fn from_stored(raw: &str) -> Option<Self> {
        if raw == GUEST_SENTINEL {
            return Some(Self::Guest);
        }
        BearerToken::new(raw).map(Self::Bearer)
    }

    /// The string written to durable storage.
    #[must_use]
    pub fn as_stored(&self) -> &str {
        match self {
            Self::Guest => GUEST_SENTINEL,
            Self::Bearer(token) => token.as_str(),
        }
    }

    #[must_use]
    pub fn bearer(&self) -> Option<&BearerToken> {
        match self {
            Self::Guest => None,
            Self::Bearer(token) => Some(token),
        }
    }
}

#[cfg(test)]
#[path = "credential_test.rs"]
mod tests;
