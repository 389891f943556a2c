//! Client configuration parsed from environment variables.

use std::path::PathBuf;

use crate::error::ClientError;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SESSION_FILE: &str = ".rivals-session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend origin without the `/api/v1` prefix and without a trailing `/`.
    pub api_url: String,
    pub timeouts: Timeouts,
    /// Where the CLI keeps its durable session slot.
    pub session_file: PathBuf,
}

impl ClientConfig {
    /// Build config for `api_url` with default timeouts and session file.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the URL is not `http://` or `https://`.
    pub fn new(api_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            api_url: normalize_api_url(api_url)?,
            timeouts: Timeouts::default(),
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
        })
    }

    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `RIVALS_API_URL`: default `http://localhost:8000`
    /// - `RIVALS_REQUEST_TIMEOUT_SECS`: default 30
    /// - `RIVALS_CONNECT_TIMEOUT_SECS`: default 10
    /// - `RIVALS_SESSION_FILE`: default `.rivals-session.json`
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if `RIVALS_API_URL` is not an HTTP(S) URL.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if `RIVALS_API_URL` is not an HTTP(S) URL.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let api_url = lookup("RIVALS_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        let timeouts = Timeouts {
            request_secs: parse_u64(lookup("RIVALS_REQUEST_TIMEOUT_SECS"), DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_u64(lookup("RIVALS_CONNECT_TIMEOUT_SECS"), DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let session_file = lookup("RIVALS_SESSION_FILE").map_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE), PathBuf::from);

        Ok(Self { api_url: normalize_api_url(&api_url)?, timeouts, session_file })
    }
}

fn parse_u64(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(default)
}

fn normalize_api_url(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ClientError::Config(format!("api url must start with http:// or https://, got '{raw}'")));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
