//! Wire types exchanged with the battle backend.

use serde::{Deserialize, Serialize};

/// Display name and email of the placeholder user written for guest sessions.
pub const GUEST_DISPLAY_NAME: &str = "Guest";
pub const GUEST_EMAIL: &str = "guest@battleapp.com";

/// An account as returned by the backend and mirrored into `userInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Display name shown on battle cards and leaderboards.
    pub mc_name: String,
    #[serde(default)]
    pub hometown: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl User {
    /// Fixed placeholder stored alongside the guest sentinel.
    #[must_use]
    pub fn guest_placeholder() -> Self {
        Self {
            id: 0,
            email: GUEST_EMAIL.to_owned(),
            mc_name: GUEST_DISPLAY_NAME.to_owned(),
            hometown: None,
            is_admin: false,
            is_active: true,
        }
    }
}

/// Body of a successful login or registration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: User,
}

/// New-account request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub mc_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hometown: Option<String>,
}

/// Partial profile update; absent fields are left untouched by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mc_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hometown: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteRequest {
    pub battle_id: i64,
    pub voted_submission_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionCreate {
    pub beat_id: i64,
    pub file_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub user_id: i64,
    pub beat_id: i64,
    pub file_url: String,
    pub created_at: String,
    #[serde(default)]
    pub votes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AdminStatusResponse {
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TournamentCategory {
    Rap,
    Beat,
    Track,
}

impl TournamentCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rap => "rap",
            Self::Beat => "beat",
            Self::Track => "track",
        }
    }
}

impl std::str::FromStr for TournamentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rap" => Ok(Self::Rap),
            "beat" => Ok(Self::Beat),
            "track" => Ok(Self::Track),
            other => Err(format!("unknown tournament category '{other}' (expected rap, beat or track)")),
        }
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
