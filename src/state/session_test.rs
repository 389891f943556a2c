use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::*;
use crate::error::ErrorPayload;
use crate::state::storage::MemoryStorage;

// =============================================================================
// TEST DOUBLES
// =============================================================================

fn user(id: i64, email: &str, is_admin: bool) -> User {
    User {
        id,
        email: email.to_owned(),
        mc_name: format!("MC {id}"),
        hometown: Some("Detroit".to_owned()),
        is_admin,
        is_active: true,
    }
}

/// Scripted backend. Accounts are keyed by email; `hold_*` pauses the matching
/// call until `release` is notified, so tests can interleave mutations.
#[derive(Default)]
struct FakeBackend {
    accounts: RefCell<HashMap<String, (String, String, User)>>,
    refreshed: RefCell<Option<User>>,
    admin: Cell<Option<bool>>,
    hold_login: Cell<bool>,
    hold_refresh: Cell<bool>,
    hold_admin: Cell<bool>,
    release: Notify,
    calls: Cell<u32>,
}

impl FakeBackend {
    fn with_account(email: &str, password: &str, token: &str, user: User) -> Self {
        let backend = Self::default();
        backend.add_account(email, password, token, user);
        backend
    }

    fn add_account(&self, email: &str, password: &str, token: &str, user: User) {
        self.accounts
            .borrow_mut()
            .insert(email.to_owned(), (password.to_owned(), token.to_owned(), user));
    }

    fn connectivity() -> ClientError {
        ClientError::Connectivity("connection refused".to_owned())
    }
}

#[async_trait(?Send)]
impl AuthBackend for FakeBackend {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        self.calls.set(self.calls.get() + 1);
        if self.hold_login.get() {
            self.release.notified().await;
        }
        let account = self.accounts.borrow().get(email).cloned();
        match account {
            Some((expected, token, user)) if expected == password => {
                Ok(LoginResponse { access_token: token, token_type: Some("bearer".to_owned()), user })
            }
            _ => Err(ClientError::InvalidCredentials {
                status: 401,
                payload: ErrorPayload::parse(r#"{"detail":"Incorrect email or password"}"#),
            }),
        }
    }

    async fn register(&self, request: &RegisterRequest) -> Result<LoginResponse, ClientError> {
        self.calls.set(self.calls.get() + 1);
        if self.accounts.borrow().contains_key(&request.email) {
            return Err(ClientError::Unknown {
                status: 400,
                payload: ErrorPayload::parse(r#"{"detail":"Email already registered"}"#),
            });
        }
        let id = i64::try_from(self.accounts.borrow().len()).unwrap() + 100;
        let created = User {
            id,
            email: request.email.clone(),
            mc_name: request.mc_name.clone(),
            hometown: request.hometown.clone(),
            is_admin: false,
            is_active: true,
        };
        let token = format!("tok-{id}");
        self.add_account(&request.email, &request.password, &token, created.clone());
        Ok(LoginResponse { access_token: token, token_type: None, user: created })
    }

    async fn current_user(&self, _token: &BearerToken, _user_id: i64) -> Result<User, ClientError> {
        self.calls.set(self.calls.get() + 1);
        if self.hold_refresh.get() {
            self.release.notified().await;
        }
        self.refreshed.borrow().clone().ok_or_else(Self::connectivity)
    }

    async fn admin_status(&self, _token: &BearerToken, _user_id: i64) -> Result<bool, ClientError> {
        self.calls.set(self.calls.get() + 1);
        if self.hold_admin.get() {
            self.release.notified().await;
        }
        self.admin.get().ok_or_else(Self::connectivity)
    }
}

/// Memory storage that can be told to reject writes and counts its reads.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: Cell<bool>,
    single_reads: Cell<u32>,
    snapshot_reads: Cell<u32>,
}

impl SessionStorage for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.single_reads.set(self.single_reads.get() + 1);
        self.inner.get(key)
    }

    fn get_all(&self, keys: &[&str]) -> Result<BTreeMap<String, String>, StorageError> {
        self.snapshot_reads.set(self.snapshot_reads.get() + 1);
        self.inner.get_all(keys)
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        if self.fail_writes.get() {
            return Err(StorageError::Io(std::io::Error::other("quota exceeded")));
        }
        self.inner.set_all(entries)
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.inner.remove_all(keys)
    }
}

type Store = SessionStore<MemoryStorage, FakeBackend>;

fn ready_store(backend: FakeBackend) -> Store {
    let store = SessionStore::new(MemoryStorage::new(), backend);
    store.initialize();
    store
}

fn alice() -> User {
    user(1, "alice@example.com", false)
}

fn alice_backend() -> FakeBackend {
    FakeBackend::with_account("alice@example.com", "pw", "tok-alice", alice())
}

// =============================================================================
// initialize
// =============================================================================

#[test]
fn new_store_is_initializing_until_initialize() {
    let store = SessionStore::new(MemoryStorage::new(), FakeBackend::default());
    assert!(store.view().is_loading());

    let view = store.initialize();
    assert!(!view.is_loading());
    assert_eq!(view.identity, Identity::Anonymous);
}

#[test]
fn initialize_restores_guest() {
    let guest_json = serde_json::to_string(&User::guest_placeholder()).unwrap();
    let storage = MemoryStorage::with_entries(&[(TOKEN_KEY, "guest"), (USER_KEY, &guest_json)]);
    let store = SessionStore::new(storage, FakeBackend::default());

    let view = store.initialize();
    assert!(view.is_guest());
    assert_eq!(view.user().unwrap().mc_name, "Guest");
}

#[test]
fn initialize_restores_authenticated_with_unknown_admin() {
    let user_json = serde_json::to_string(&user(9, "nine@example.com", true)).unwrap();
    let storage = MemoryStorage::with_entries(&[(TOKEN_KEY, "tok-9"), (USER_KEY, &user_json)]);
    let store = SessionStore::new(storage, FakeBackend::default());

    let view = store.initialize();
    match &view.identity {
        Identity::Authenticated { user, token, admin } => {
            assert_eq!(user.id, 9);
            assert_eq!(token.as_str(), "tok-9");
            assert_eq!(*admin, AdminStatus::Unknown);
        }
        other => panic!("unexpected identity: {other:?}"),
    }
    assert!(view.is_admin());
}

#[test]
fn initialize_clears_corrupt_payload_and_yields_anonymous() {
    let storage = MemoryStorage::with_entries(&[(TOKEN_KEY, "garbage"), (USER_KEY, "{not json")]);
    let store = SessionStore::new(storage, FakeBackend::default());

    let view = store.initialize();
    assert_eq!(view.identity, Identity::Anonymous);
    assert!(!view.is_loading());
    assert!(store.storage().snapshot().is_empty());
}

#[test]
fn initialize_clears_credential_without_user() {
    let storage = MemoryStorage::with_entries(&[(TOKEN_KEY, "tok")]);
    let store = SessionStore::new(storage, FakeBackend::default());

    assert_eq!(store.initialize().identity, Identity::Anonymous);
    assert!(store.storage().snapshot().is_empty());
}

#[test]
fn initialize_clears_stray_user_payload() {
    let user_json = serde_json::to_string(&alice()).unwrap();
    let storage = MemoryStorage::with_entries(&[(USER_KEY, &user_json)]);
    let store = SessionStore::new(storage, FakeBackend::default());

    assert_eq!(store.initialize().identity, Identity::Anonymous);
    assert!(store.storage().snapshot().is_empty());
}

#[test]
fn initialize_reads_both_keys_in_one_snapshot() {
    let user_json = serde_json::to_string(&alice()).unwrap();
    let storage = FlakyStorage {
        inner: MemoryStorage::with_entries(&[(TOKEN_KEY, "tok-alice"), (USER_KEY, &user_json)]),
        ..FlakyStorage::default()
    };
    let store = SessionStore::new(storage, FakeBackend::default());

    assert!(store.initialize().is_authenticated());
    assert_eq!(store.storage().snapshot_reads.get(), 1);
    assert_eq!(store.storage().single_reads.get(), 0);
}

#[test]
fn initialize_rejects_guest_sentinel_with_non_user_payload() {
    let storage = MemoryStorage::with_entries(&[(TOKEN_KEY, "guest"), (USER_KEY, r#"{"mc_name":"Guest","id":"guest"}"#)]);
    let store = SessionStore::new(storage, FakeBackend::default());

    assert_eq!(store.initialize().identity, Identity::Anonymous);
}

// =============================================================================
// login / register
// =============================================================================

#[tokio::test]
async fn login_persists_and_authenticates() {
    let store = ready_store(alice_backend());

    let view = store.login("alice@example.com", "pw").await.unwrap();
    assert!(view.is_authenticated());
    assert!(!view.is_busy());
    assert_eq!(view.user(), Some(&alice()));

    let stored = store.storage().snapshot();
    assert_eq!(stored.get(TOKEN_KEY).map(String::as_str), Some("tok-alice"));
    let stored_user: User = serde_json::from_str(&stored[USER_KEY]).unwrap();
    assert_eq!(stored_user, alice());
}

#[tokio::test]
async fn login_failure_leaves_session_untouched() {
    let store = ready_store(alice_backend());
    store.enter_guest_mode().unwrap();
    let before = store.view();
    let stored_before = store.storage().snapshot();

    let err = store.login("alice@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidCredentials { status: 401, .. }));
    assert_eq!(store.view(), before);
    assert_eq!(store.storage().snapshot(), stored_before);
    assert_eq!(store.backend().calls.get(), 1);
}

#[tokio::test]
async fn login_twice_is_idempotent_in_effect() {
    let store = ready_store(alice_backend());

    let first = store.login("alice@example.com", "pw").await.unwrap();
    let second = store.login("alice@example.com", "pw").await.unwrap();
    assert_eq!(first.identity, second.identity);
}

#[tokio::test]
async fn login_then_reload_reproduces_session() {
    let store = ready_store(alice_backend());
    let live = store.login("alice@example.com", "pw").await.unwrap();

    let persisted = store.storage().snapshot();
    let entries: Vec<(&str, &str)> = persisted.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let reloaded = SessionStore::new(MemoryStorage::with_entries(&entries), FakeBackend::default());

    assert_eq!(reloaded.initialize().identity, live.identity);
}

#[tokio::test]
async fn login_storage_failure_changes_nothing() {
    let store = SessionStore::new(FlakyStorage::default(), alice_backend());
    store.initialize();
    store.storage().fail_writes.set(true);

    let err = store.login("alice@example.com", "pw").await.unwrap_err();
    assert!(matches!(err, ClientError::Storage(_)));
    assert_eq!(store.view().identity, Identity::Anonymous);
    assert!(store.storage().inner.snapshot().is_empty());
}

#[tokio::test]
async fn login_rejects_unusable_token_from_backend() {
    let store = ready_store(FakeBackend::with_account("g@example.com", "pw", "guest", alice()));

    let err = store.login("g@example.com", "pw").await.unwrap_err();
    assert!(matches!(err, ClientError::Decode(_)));
    assert_eq!(store.view().identity, Identity::Anonymous);
}

#[tokio::test]
async fn register_signs_in_new_account() {
    let store = ready_store(FakeBackend::default());
    let request = RegisterRequest {
        email: "new@example.com".to_owned(),
        password: "pw".to_owned(),
        mc_name: "Newcomer".to_owned(),
        hometown: None,
    };

    let view = store.register(&request).await.unwrap();
    assert!(view.is_authenticated());
    assert_eq!(view.user().unwrap().mc_name, "Newcomer");
    assert!(store.storage().snapshot().contains_key(TOKEN_KEY));
}

#[tokio::test]
async fn register_error_propagates_typed() {
    let store = ready_store(alice_backend());
    let request = RegisterRequest {
        email: "alice@example.com".to_owned(),
        password: "pw".to_owned(),
        mc_name: "Dup".to_owned(),
        hometown: None,
    };

    let err = store.register(&request).await.unwrap_err();
    match err {
        ClientError::Unknown { status, payload } => {
            assert_eq!(status, 400);
            assert_eq!(payload.message().as_deref(), Some("Email already registered"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(store.view().identity, Identity::Anonymous);
}

// =============================================================================
// concurrency: busy + generation
// =============================================================================

#[tokio::test]
async fn second_login_while_in_flight_is_busy() {
    let backend = alice_backend();
    backend.hold_login.set(true);
    let store = ready_store(backend);

    let (first, ()) = tokio::join!(store.login("alice@example.com", "pw"), async {
        assert!(store.view().is_busy());
        let second = store.login("alice@example.com", "pw").await;
        assert!(matches!(second, Err(ClientError::Busy)));
        store.backend().release.notify_one();
    });

    assert!(first.unwrap().is_authenticated());
    assert!(!store.view().is_busy());
    assert_eq!(store.backend().calls.get(), 1);
}

#[tokio::test]
async fn abandoned_login_releases_busy_flag() {
    let backend = alice_backend();
    backend.hold_login.set(true);
    let store = ready_store(backend);

    {
        let pending = store.login("alice@example.com", "pw");
        tokio::pin!(pending);
        let polled = poll_once(pending.as_mut()).await;
        assert!(polled.is_none());
        assert!(store.view().is_busy());
    }

    assert!(!store.view().is_busy());
}

/// Poll a future exactly once.
async fn poll_once<F: std::future::Future + Unpin>(mut fut: F) -> Option<F::Output> {
    std::future::poll_fn(|cx| match std::pin::Pin::new(&mut fut).poll(cx) {
        std::task::Poll::Ready(out) => std::task::Poll::Ready(Some(out)),
        std::task::Poll::Pending => std::task::Poll::Ready(None),
    })
    .await
}

#[tokio::test]
async fn login_superseded_by_guest_entry_is_dropped() {
    let backend = alice_backend();
    backend.hold_login.set(true);
    let store = ready_store(backend);

    let (result, ()) = tokio::join!(store.login("alice@example.com", "pw"), async {
        store.enter_guest_mode().unwrap();
        store.backend().release.notify_one();
    });

    assert!(matches!(result, Err(ClientError::Superseded)));
    assert!(store.view().is_guest());
    assert_eq!(store.storage().snapshot().get(TOKEN_KEY).map(String::as_str), Some("guest"));
}

#[tokio::test]
async fn stale_refresh_does_not_overwrite_newer_login() {
    let backend = alice_backend();
    let bob = user(2, "bob@example.com", false);
    backend.add_account("bob@example.com", "pw2", "tok-bob", bob.clone());
    *backend.refreshed.borrow_mut() = Some(User { mc_name: "Alice Renamed".to_owned(), ..alice() });
    let store = ready_store(backend);
    store.login("alice@example.com", "pw").await.unwrap();
    store.backend().hold_refresh.set(true);

    let (outcome, ()) = tokio::join!(store.refresh(), async {
        store.logout();
        store.login("bob@example.com", "pw2").await.unwrap();
        store.backend().release.notify_one();
    });

    assert_eq!(outcome.unwrap(), RefreshOutcome::Discarded);
    assert_eq!(store.view().user(), Some(&bob));
    assert_eq!(store.storage().snapshot().get(TOKEN_KEY).map(String::as_str), Some("tok-bob"));
}

#[tokio::test]
async fn stale_admin_status_is_discarded_after_account_switch() {
    let backend = alice_backend();
    backend.add_account("bob@example.com", "pw2", "tok-bob", user(2, "bob@example.com", false));
    backend.admin.set(Some(true));
    let store = ready_store(backend);
    store.login("alice@example.com", "pw").await.unwrap();
    store.backend().hold_admin.set(true);

    let (outcome, ()) = tokio::join!(store.confirm_admin(), async {
        store.logout();
        store.login("bob@example.com", "pw2").await.unwrap();
        store.backend().release.notify_one();
    });

    assert_eq!(outcome.unwrap(), RefreshOutcome::Discarded);
    match store.view().identity {
        Identity::Authenticated { user, admin, .. } => {
            assert_eq!(user.id, 2);
            assert_eq!(admin, AdminStatus::Unknown);
        }
        other => panic!("unexpected identity: {other:?}"),
    }
    assert!(!store.view().is_admin());
}

#[tokio::test]
async fn stale_admin_status_is_discarded_after_logout() {
    let backend = alice_backend();
    backend.admin.set(Some(true));
    let store = ready_store(backend);
    store.login("alice@example.com", "pw").await.unwrap();
    store.backend().hold_admin.set(true);

    let (outcome, ()) = tokio::join!(store.confirm_admin(), async {
        store.logout();
        store.backend().release.notify_one();
    });

    assert_eq!(outcome.unwrap(), RefreshOutcome::Discarded);
    assert_eq!(store.view().identity, Identity::Anonymous);
}

// =============================================================================
// guest / logout
// =============================================================================

#[test]
fn guest_mode_is_local_and_persisted() {
    let store = ready_store(FakeBackend::default());

    let view = store.enter_guest_mode().unwrap();
    assert!(view.is_guest());
    assert!(!view.is_authenticated());
    assert_eq!(store.backend().calls.get(), 0);

    let stored = store.storage().snapshot();
    assert_eq!(stored.get(TOKEN_KEY).map(String::as_str), Some("guest"));
    let stored_user: User = serde_json::from_str(&stored[USER_KEY]).unwrap();
    assert_eq!(stored_user, User::guest_placeholder());
}

#[test]
fn guest_is_never_admin_even_if_payload_says_so() {
    let mut payload = User::guest_placeholder();
    payload.is_admin = true;
    let view = SessionView::ready(Identity::Guest(payload));
    assert!(!view.is_admin());
}

#[test]
fn guest_mode_storage_failure_keeps_previous_identity() {
    let store = SessionStore::new(FlakyStorage::default(), FakeBackend::default());
    store.initialize();
    store.storage().fail_writes.set(true);

    assert!(matches!(store.enter_guest_mode(), Err(ClientError::Storage(_))));
    assert_eq!(store.view().identity, Identity::Anonymous);
}

#[tokio::test]
async fn logout_clears_storage_and_reload_is_anonymous() {
    let store = ready_store(alice_backend());
    store.login("alice@example.com", "pw").await.unwrap();

    let view = store.logout();
    assert_eq!(view.identity, Identity::Anonymous);
    assert!(store.storage().snapshot().is_empty());

    assert_eq!(store.initialize().identity, Identity::Anonymous);
}

#[test]
fn logout_from_anonymous_is_allowed() {
    let store = ready_store(FakeBackend::default());
    let before = store.generation();
    assert_eq!(store.logout().identity, Identity::Anonymous);
    assert!(store.generation() > before);
}

// =============================================================================
// refresh / confirm_admin
// =============================================================================

#[tokio::test]
async fn refresh_updates_both_copies() {
    let backend = alice_backend();
    let renamed = User { mc_name: "Alice v2".to_owned(), ..alice() };
    *backend.refreshed.borrow_mut() = Some(renamed.clone());
    let store = ready_store(backend);
    store.login("alice@example.com", "pw").await.unwrap();

    assert_eq!(store.refresh().await.unwrap(), RefreshOutcome::Updated);
    assert_eq!(store.view().user(), Some(&renamed));
    let stored_user: User = serde_json::from_str(&store.storage().snapshot()[USER_KEY]).unwrap();
    assert_eq!(stored_user, renamed);
    assert_eq!(store.storage().snapshot().get(TOKEN_KEY).map(String::as_str), Some("tok-alice"));
}

#[tokio::test]
async fn refresh_failure_keeps_cached_session() {
    let store = ready_store(alice_backend());
    let before = store.login("alice@example.com", "pw").await.unwrap();

    let err = store.refresh().await.unwrap_err();
    assert!(matches!(err, ClientError::Connectivity(_)));
    assert_eq!(store.view(), before);
}

#[tokio::test]
async fn refresh_is_noop_for_guest_and_anonymous() {
    let store = ready_store(FakeBackend::default());
    assert_eq!(store.refresh().await.unwrap(), RefreshOutcome::Skipped);
    store.enter_guest_mode().unwrap();
    assert_eq!(store.refresh().await.unwrap(), RefreshOutcome::Skipped);
    assert_eq!(store.confirm_admin().await.unwrap(), RefreshOutcome::Skipped);
    assert_eq!(store.backend().calls.get(), 0);
}

#[tokio::test]
async fn confirm_admin_records_backend_answer() {
    let backend = alice_backend();
    backend.admin.set(Some(true));
    let store = ready_store(backend);
    store.login("alice@example.com", "pw").await.unwrap();
    assert!(!store.view().is_admin());

    assert_eq!(store.confirm_admin().await.unwrap(), RefreshOutcome::Updated);
    assert!(store.view().is_admin());
}

#[tokio::test]
async fn failed_admin_check_never_downgrades_confirmed_admin() {
    let backend = alice_backend();
    backend.admin.set(Some(true));
    let store = ready_store(backend);
    store.login("alice@example.com", "pw").await.unwrap();
    store.confirm_admin().await.unwrap();

    store.backend().admin.set(None);
    assert!(store.confirm_admin().await.is_err());
    assert!(store.view().is_admin());
}

#[tokio::test]
async fn admin_confirmation_survives_refresh() {
    let backend = alice_backend();
    backend.admin.set(Some(true));
    *backend.refreshed.borrow_mut() = Some(alice());
    let store = ready_store(backend);
    store.login("alice@example.com", "pw").await.unwrap();
    store.confirm_admin().await.unwrap();

    store.refresh().await.unwrap();
    assert!(store.view().is_admin());
}

// =============================================================================
// bearer_for
// =============================================================================

#[test]
fn bearer_for_refuses_guest_without_network() {
    let store = ready_store(FakeBackend::default());
    store.enter_guest_mode().unwrap();

    let err = store.bearer_for(GuardedAction::Vote).unwrap_err();
    assert!(matches!(err, ClientError::GuestForbidden { action: GuardedAction::Vote }));
    assert_eq!(store.backend().calls.get(), 0);
}

#[test]
fn bearer_for_refuses_anonymous() {
    let store = ready_store(FakeBackend::default());
    assert!(matches!(
        store.bearer_for(GuardedAction::Submit),
        Err(ClientError::Unauthorized { status: None, .. })
    ));
}

#[tokio::test]
async fn bearer_for_returns_session_token() {
    let store = ready_store(alice_backend());
    store.login("alice@example.com", "pw").await.unwrap();
    assert_eq!(store.bearer_for(GuardedAction::UpdateProfile).unwrap().as_str(), "tok-alice");
}

#[tokio::test]
async fn account_for_pairs_token_with_signed_in_user() {
    let store = ready_store(alice_backend());
    store.login("alice@example.com", "pw").await.unwrap();

    let (token, user) = store.account_for(GuardedAction::Submit).unwrap();
    assert_eq!(token.as_str(), "tok-alice");
    assert_eq!(user, alice());
}

#[test]
fn account_for_refuses_guest_and_anonymous() {
    let store = ready_store(FakeBackend::default());
    assert!(matches!(
        store.account_for(GuardedAction::UpdateProfile),
        Err(ClientError::Unauthorized { status: None, .. })
    ));

    store.enter_guest_mode().unwrap();
    assert!(matches!(
        store.account_for(GuardedAction::UpdateProfile),
        Err(ClientError::GuestForbidden { action: GuardedAction::UpdateProfile })
    ));
    assert_eq!(store.backend().calls.get(), 0);
}
