//! Session store: who is using the client right now.
//!
//! SYSTEM CONTEXT
//! ==============
//! The store is the single owner of identity. The access guard, the route
//! table, and guarded API calls all read it through `view()` or
//! `bearer_for()`; nothing else reads durable storage.
//!
//! DESIGN
//! ======
//! Identity is a tagged union, so "guest with a real token" or "anonymous
//! with a user" cannot be expressed. Durable and in-memory copies are updated
//! under the same lock: storage is written first and memory only changes if
//! that write succeeded.
//!
//! CONCURRENCY
//! ===========
//! The lock is never held across an await. Network-bound operations capture
//! the identity generation before awaiting and commit only if it is unchanged,
//! so a late response cannot overwrite a newer login, guest entry, or logout.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{ClientError, ErrorPayload};
use crate::net::api::AuthBackend;
use crate::net::credential::{BearerToken, Credential};
use crate::net::transport::{GuardedAction, require_bearer};
use crate::net::types::{LoginResponse, RegisterRequest, User};
use crate::state::storage::{SessionStorage, StorageError};

/// Durable key holding the credential (absent, `"guest"`, or a bearer token).
pub const TOKEN_KEY: &str = "authToken";
/// Durable key holding the JSON user payload; written together with `TOKEN_KEY`.
pub const USER_KEY: &str = "userInfo";

// =============================================================================
// IDENTITY
// =============================================================================

/// Admin refinement of an authenticated identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdminStatus {
    /// Not checked with the backend yet; the user payload's flag applies.
    #[default]
    Unknown,
    Confirmed(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Guest(User),
    Authenticated { user: User, token: BearerToken, admin: AdminStatus },
}

impl Identity {
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Anonymous => None,
            Self::Guest(user) | Self::Authenticated { user, .. } => Some(user),
        }
    }

    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        match self {
            Self::Anonymous => None,
            Self::Guest(_) => Some(Credential::Guest),
            Self::Authenticated { token, .. } => Some(Credential::Bearer(token.clone())),
        }
    }

    /// The admin flag the access guard trusts. Never true for guests.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        match self {
            Self::Authenticated { admin: AdminStatus::Confirmed(confirmed), .. } => *confirmed,
            Self::Authenticated { user, admin: AdminStatus::Unknown, .. } => user.is_admin,
            Self::Anonymous | Self::Guest(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Rehydration has not finished; guard decisions are not trusted yet.
    Initializing,
    Ready,
}

/// Read model handed to the guard and to views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub identity: Identity,
    pub loading: LoadState,
    /// A login or registration is awaiting the backend.
    pub busy: bool,
}

impl SessionView {
    /// A settled view of `identity`, mostly useful to build guard inputs.
    #[must_use]
    pub fn ready(identity: Identity) -> Self {
        Self { identity, loading: LoadState::Ready, busy: false }
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.identity.user()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.identity, Identity::Authenticated { .. })
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        matches!(self.identity, Identity::Guest(_))
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading == LoadState::Initializing
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.identity.is_admin()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }
}

/// Result of a background refinement (`refresh`, `confirm_admin`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// Nothing to do for the current identity.
    Skipped,
    /// The identity changed while the request was in flight; the response was dropped.
    Discarded,
}

// =============================================================================
// STORE
// =============================================================================

struct Inner {
    identity: Identity,
    loading: LoadState,
    generation: u64,
    pending: bool,
}

impl Inner {
    fn view(&self) -> SessionView {
        SessionView { identity: self.identity.clone(), loading: self.loading, busy: self.pending }
    }
}

/// Owned session handle. Clones share the same state.
pub struct SessionStore<S, B> {
    inner: Arc<Mutex<Inner>>,
    storage: Arc<S>,
    backend: Arc<B>,
}

impl<S, B> Clone for SessionStore<S, B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), storage: Arc::clone(&self.storage), backend: Arc::clone(&self.backend) }
    }
}

/// Marks a login/registration as in flight; clears the mark when dropped,
/// including when the caller abandons the future.
struct InFlight {
    inner: Arc<Mutex<Inner>>,
    generation: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.inner).pending = false;
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: SessionStorage, B: AuthBackend> SessionStore<S, B> {
    /// Create a store in the `Initializing` state. Call `initialize` next.
    pub fn new(storage: S, backend: B) -> Self {
        let inner = Inner { identity: Identity::Anonymous, loading: LoadState::Initializing, generation: 0, pending: false };
        Self { inner: Arc::new(Mutex::new(inner)), storage: Arc::new(storage), backend: Arc::new(backend) }
    }

    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        lock(&self.inner).view()
    }

    /// Identity epoch; bumped by every identity-changing mutation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    // -------------------------------------------------------------------------
    // Rehydration
    // -------------------------------------------------------------------------

    /// Rebuild the session from durable storage.
    ///
    /// Corrupt data is cleared and yields `Anonymous`; this never fails.
    pub fn initialize(&self) -> SessionView {
        let mut inner = lock(&self.inner);
        let identity = match self.rehydrate() {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "discarding persisted session");
                self.clear_storage();
                Identity::Anonymous
            }
        };
        tracing::debug!(
            guest = matches!(identity, Identity::Guest(_)),
            authenticated = matches!(identity, Identity::Authenticated { .. }),
            "session rehydrated"
        );
        inner.identity = identity;
        inner.loading = LoadState::Ready;
        inner.generation += 1;
        inner.view()
    }

    fn rehydrate(&self) -> Result<Identity, ClientError> {
        let mut stored = self
            .storage
            .get_all(&[TOKEN_KEY, USER_KEY])
            .map_err(|e: StorageError| ClientError::CorruptPersistedState(e.to_string()))?;
        let token = stored.remove(TOKEN_KEY);
        let user_raw = stored.remove(USER_KEY);

        let (token, user_raw) = match (token, user_raw) {
            (None, None) => return Ok(Identity::Anonymous),
            (None, Some(_)) => {
                return Err(ClientError::CorruptPersistedState("user payload without credential".to_owned()));
            }
            (Some(_), None) => {
                return Err(ClientError::CorruptPersistedState("credential without user payload".to_owned()));
            }
            (Some(token), Some(user_raw)) => (token, user_raw),
        };

        let credential = Credential::from_stored(&token)
            .ok_or_else(|| ClientError::CorruptPersistedState("unusable credential".to_owned()))?;
        let user: User = serde_json::from_str(&user_raw)
            .map_err(|e| ClientError::CorruptPersistedState(format!("user payload: {e}")))?;

        Ok(match credential {
            Credential::Guest => Identity::Guest(user),
            Credential::Bearer(token) => Identity::Authenticated { user, token, admin: AdminStatus::Unknown },
        })
    }

    fn clear_storage(&self) {
        if let Err(e) = self.storage.remove_all(&[TOKEN_KEY, USER_KEY]) {
            tracing::warn!(error = %e, "failed to clear persisted session");
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Backend errors are returned unchanged and leave the session untouched.
    /// `Busy` if another sign-in is in flight, `Superseded` if the identity
    /// changed while waiting, `Storage` if the durable write failed.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionView, ClientError> {
        let flight = self.begin_sign_in()?;
        let result = self.backend.login(email, password).await;
        self.finish_sign_in(&flight, result, "login")
    }

    /// Create an account and sign in as it. Same contract as `login`.
    ///
    /// # Errors
    ///
    /// See `login`.
    pub async fn register(&self, request: &RegisterRequest) -> Result<SessionView, ClientError> {
        let flight = self.begin_sign_in()?;
        let result = self.backend.register(request).await;
        self.finish_sign_in(&flight, result, "register")
    }

    fn begin_sign_in(&self) -> Result<InFlight, ClientError> {
        let mut inner = lock(&self.inner);
        if inner.pending {
            return Err(ClientError::Busy);
        }
        inner.pending = true;
        Ok(InFlight { inner: Arc::clone(&self.inner), generation: inner.generation })
    }

    fn finish_sign_in(
        &self,
        flight: &InFlight,
        result: Result<LoginResponse, ClientError>,
        op: &'static str,
    ) -> Result<SessionView, ClientError> {
        let response = result.inspect_err(|e| {
            tracing::warn!(op, code = e.error_code(), "sign-in rejected");
        })?;
        let token = BearerToken::new(response.access_token)
            .ok_or_else(|| ClientError::Decode("backend returned an unusable access token".to_owned()))?;
        let user_json = serde_json::to_string(&response.user).map_err(|e| ClientError::Decode(e.to_string()))?;

        let mut inner = lock(&self.inner);
        if inner.generation != flight.generation {
            tracing::debug!(op, "dropping stale sign-in response");
            return Err(ClientError::Superseded);
        }
        self.storage.set_all(&[(TOKEN_KEY, token.as_str()), (USER_KEY, &user_json)])?;

        tracing::info!(op, user_id = response.user.id, "signed in");
        inner.identity = Identity::Authenticated { user: response.user, token, admin: AdminStatus::Unknown };
        inner.loading = LoadState::Ready;
        inner.generation += 1;
        inner.pending = false;
        Ok(inner.view())
    }

    /// Browse without an account. Local only; no request is made.
    ///
    /// # Errors
    ///
    /// `Storage` if the durable write failed; the session is unchanged then.
    pub fn enter_guest_mode(&self) -> Result<SessionView, ClientError> {
        let user = User::guest_placeholder();
        let user_json = serde_json::to_string(&user).map_err(|e| ClientError::Decode(e.to_string()))?;

        let mut inner = lock(&self.inner);
        self.storage.set_all(&[(TOKEN_KEY, Credential::Guest.as_stored()), (USER_KEY, &user_json)])?;

        tracing::info!("entered guest mode");
        inner.identity = Identity::Guest(user);
        inner.loading = LoadState::Ready;
        inner.generation += 1;
        Ok(inner.view())
    }

    /// Forget the session. Allowed from any identity; never fails.
    pub fn logout(&self) -> SessionView {
        let mut inner = lock(&self.inner);
        self.clear_storage();

        tracing::info!("signed out");
        inner.identity = Identity::Anonymous;
        inner.loading = LoadState::Ready;
        inner.generation += 1;
        inner.view()
    }

    // -------------------------------------------------------------------------
    // Background refinements
    // -------------------------------------------------------------------------

    /// Re-fetch the signed-in user and overwrite both copies.
    ///
    /// # Errors
    ///
    /// The backend error, with the cached session kept as-is; `Storage` if the
    /// durable write failed.
    pub async fn refresh(&self) -> Result<RefreshOutcome, ClientError> {
        let Some((generation, token, user_id)) = self.authenticated_snapshot() else {
            return Ok(RefreshOutcome::Skipped);
        };

        let user = self.backend.current_user(&token, user_id).await.inspect_err(|e| {
            tracing::warn!(user_id, code = e.error_code(), "refresh failed; keeping cached session");
        })?;
        let user_json = serde_json::to_string(&user).map_err(|e| ClientError::Decode(e.to_string()))?;

        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            tracing::debug!(user_id, "dropping stale refresh response");
            return Ok(RefreshOutcome::Discarded);
        }
        let Identity::Authenticated { user: current, token: current_token, .. } = &mut inner.identity else {
            return Ok(RefreshOutcome::Discarded);
        };
        self.storage.set_all(&[(TOKEN_KEY, current_token.as_str()), (USER_KEY, &user_json)])?;
        *current = user;
        Ok(RefreshOutcome::Updated)
    }

    /// Ask the backend whether the signed-in user is an admin.
    ///
    /// # Errors
    ///
    /// The backend error. A failed check keeps the previous `AdminStatus`, so a
    /// confirmed admin is never downgraded by a network blip.
    pub async fn confirm_admin(&self) -> Result<RefreshOutcome, ClientError> {
        let Some((generation, token, user_id)) = self.authenticated_snapshot() else {
            return Ok(RefreshOutcome::Skipped);
        };

        let confirmed = self.backend.admin_status(&token, user_id).await.inspect_err(|e| {
            tracing::warn!(user_id, code = e.error_code(), "admin check failed; keeping previous status");
        })?;

        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            tracing::debug!(user_id, "dropping stale admin status");
            return Ok(RefreshOutcome::Discarded);
        }
        let Identity::Authenticated { admin, .. } = &mut inner.identity else {
            return Ok(RefreshOutcome::Discarded);
        };
        *admin = AdminStatus::Confirmed(confirmed);
        Ok(RefreshOutcome::Updated)
    }

    /// Generation, token and user id for reading the signed-in account.
    /// `None` for guests and anonymous sessions, which have no account to read.
    fn authenticated_snapshot(&self) -> Option<(u64, BearerToken, i64)> {
        let inner = lock(&self.inner);
        let token = require_bearer(inner.identity.credential().as_ref(), GuardedAction::ViewProfile).ok()?;
        let user_id = inner.identity.user()?.id;
        Some((inner.generation, token, user_id))
    }

    // -------------------------------------------------------------------------
    // Guarded actions
    // -------------------------------------------------------------------------

    /// Bearer token for an account-only action, refused locally for guests.
    ///
    /// # Errors
    ///
    /// `GuestForbidden` for guests, `Unauthorized` when nobody is signed in.
    pub fn bearer_for(&self, action: GuardedAction) -> Result<BearerToken, ClientError> {
        self.account_for(action).map(|(token, _)| token)
    }

    /// Bearer token and signed-in user for an account-only action, taken from
    /// the same snapshot so the two always belong to one account.
    ///
    /// # Errors
    ///
    /// Same as `bearer_for`.
    pub fn account_for(&self, action: GuardedAction) -> Result<(BearerToken, User), ClientError> {
        let identity = lock(&self.inner).identity.clone();
        let refused = match identity {
            Identity::Authenticated { user, token, .. } => return Ok((token, user)),
            Identity::Guest(_) => ClientError::GuestForbidden { action },
            Identity::Anonymous => ClientError::Unauthorized { status: None, payload: ErrorPayload::Empty },
        };
        tracing::debug!(%action, code = refused.error_code(), "refused guarded action locally");
        Err(refused)
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
