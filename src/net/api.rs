//! REST client for the battle backend.
//!
//! ARCHITECTURE
//! ============
//! `AuthBackend` is the seam the session store depends on; `ApiClient` is
//! the `reqwest` implementation. Guarded endpoints take a `BearerToken`, so
//! callers must obtain one through `SessionStore::bearer_for`, which refuses
//! guests locally.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures become `Connectivity`; non-success statuses go through
//! `transport::classify` so callers can branch on kind and status.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::credential::{BearerToken, Credential};
use super::transport::{RequestKind, auth_headers, classify};
use super::types::{
    AdminStatusResponse, LoginResponse, MessageResponse, ProfileUpdate, RegisterRequest, Submission,
    SubmissionCreate, TournamentCategory, User, VoteRequest,
};
use crate::config::ClientConfig;
use crate::error::ClientError;

const API_PREFIX: &str = "/api/v1";

/// Auth operations the session store needs from the backend.
#[async_trait(?Send)]
pub trait AuthBackend {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError>;

    async fn register(&self, request: &RegisterRequest) -> Result<LoginResponse, ClientError>;

    /// Re-fetch the signed-in user's payload.
    async fn current_user(&self, token: &BearerToken, user_id: i64) -> Result<User, ClientError>;

    async fn admin_status(&self, token: &BearerToken, user_id: i64) -> Result<bool, ClientError>;
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::HttpClientBuild` if the HTTP client cannot be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| ClientError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: config.api_url.clone() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str, token: Option<&BearerToken>) -> reqwest::RequestBuilder {
        let credential = token.map(|t| Credential::Bearer(t.clone()));
        self.http
            .request(method, self.url(path))
            .headers(auth_headers(credential.as_ref()))
    }

    async fn send<T: DeserializeOwned>(&self, kind: RequestKind, request: reqwest::RequestBuilder) -> Result<T, ClientError> {
        let response = request
            .send()
            .await
            .map_err(connectivity)?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(connectivity)?;

        if !(200..300).contains(&status) {
            tracing::debug!(status, "backend returned non-success status");
            return Err(classify(kind, status, &text));
        }

        parse_body(&text)
    }

    // -------------------------------------------------------------------------
    // Guarded actions
    // -------------------------------------------------------------------------

    /// Cast a vote via `POST /votes/`.
    ///
    /// # Errors
    ///
    /// Any classified backend or transport error.
    pub async fn vote(&self, token: &BearerToken, vote: VoteRequest) -> Result<String, ClientError> {
        let request = self.request(reqwest::Method::POST, "/votes/", Some(token)).json(&vote);
        self.send(RequestKind::Standard, request).await
    }

    /// Upload a battle entry via `POST /submissions/?user_id=`.
    ///
    /// # Errors
    ///
    /// Any classified backend or transport error.
    pub async fn upload_submission(
        &self,
        token: &BearerToken,
        user_id: i64,
        submission: &SubmissionCreate,
    ) -> Result<Submission, ClientError> {
        let request = self
            .request(reqwest::Method::POST, "/submissions/", Some(token))
            .query(&[("user_id", user_id)])
            .json(submission);
        self.send(RequestKind::Standard, request).await
    }

    /// Update display name / hometown via `PUT /users/{id}`.
    ///
    /// # Errors
    ///
    /// Any classified backend or transport error.
    pub async fn update_profile(&self, token: &BearerToken, user_id: i64, update: &ProfileUpdate) -> Result<User, ClientError> {
        let request = self
            .request(reqwest::Method::PUT, &format!("/users/{user_id}"), Some(token))
            .json(update);
        self.send(RequestKind::Standard, request).await
    }

    /// Create a tournament. The backend response shape is not fixed, so it is
    /// returned as raw JSON.
    ///
    /// # Errors
    ///
    /// Any classified backend or transport error.
    pub async fn create_tournament(
        &self,
        token: &BearerToken,
        title: &str,
        category: TournamentCategory,
    ) -> Result<serde_json::Value, ClientError> {
        let request = self
            .request(reqwest::Method::POST, "/tournaments/", Some(token))
            .query(&[("title", title), ("category", category.as_str())]);
        self.send(RequestKind::Standard, request).await
    }

    /// Enter a submission into a tournament.
    ///
    /// # Errors
    ///
    /// Any classified backend or transport error.
    pub async fn join_tournament(
        &self,
        token: &BearerToken,
        tournament_id: i64,
        submission_id: i64,
    ) -> Result<serde_json::Value, ClientError> {
        let request = self
            .request(reqwest::Method::POST, &format!("/tournaments/{tournament_id}/join"), Some(token))
            .query(&[("submission_id", submission_id)]);
        self.send(RequestKind::Standard, request).await
    }

    /// Ask for a password-reset email. Public; sends no credential.
    ///
    /// # Errors
    ///
    /// Any classified backend or transport error.
    pub async fn request_password_reset(&self, email: &str) -> Result<String, ClientError> {
        let request = self
            .request(reqwest::Method::POST, "/auth/password-reset", None)
            .json(&serde_json::json!({ "email": email }));
        let body: MessageResponse = self.send(RequestKind::Standard, request).await?;
        Ok(body.message)
    }
}

#[async_trait(?Send)]
impl AuthBackend for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let request = self
            .request(reqwest::Method::POST, "/auth/login", None)
            .query(&[("email", email), ("password", password)]);
        self.send(RequestKind::Credentials, request).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<LoginResponse, ClientError> {
        let builder = self.request(reqwest::Method::POST, "/auth/register", None).json(request);
        self.send(RequestKind::Credentials, builder).await
    }

    async fn current_user(&self, token: &BearerToken, user_id: i64) -> Result<User, ClientError> {
        let request = self
            .request(reqwest::Method::GET, "/users/me", Some(token))
            .query(&[("user_id", user_id)]);
        self.send(RequestKind::Standard, request).await
    }

    async fn admin_status(&self, token: &BearerToken, user_id: i64) -> Result<bool, ClientError> {
        let path = format!("/admin/users/{user_id}/admin-status");
        let request = self.request(reqwest::Method::GET, &path, Some(token));
        let body: AdminStatusResponse = self.send(RequestKind::Standard, request).await?;
        Ok(body.is_admin)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Transport failure without the request URL; login carries the password in
/// its query string.
fn connectivity(error: reqwest::Error) -> ClientError {
    ClientError::Connectivity(error.without_url().to_string())
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{base_url}{API_PREFIX}{path}")
}

/// Decode a success body. An empty body decodes as JSON `null` so unit-like
/// responses work.
fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, ClientError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
