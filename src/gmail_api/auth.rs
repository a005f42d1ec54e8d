use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::credentials::{Credential, CredentialStore};
use crate::error::{Error, Result};

pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// What the provider needs to set itself up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub scopes: Vec<String>,
    pub token_cache: PathBuf,
}

/// Token and absolute expiry as reported by the provider for the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_at_ms: i64,
}

impl From<AuthResponse> for Credential {
    fn from(response: AuthResponse) -> Self {
        Credential::new(response.access_token, response.expires_at_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignInOptions {
    /// Let the user pick a different Google account than the last one.
    pub select_account: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("no signed-in user")]
    NotSignedIn,
    #[error("the consent window could not be opened")]
    PopupBlocked,
    #[error("{0}")]
    Failed(String),
}

// Define a trait for the OAuth library so the session can be tested without it
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Whether the provider can be used yet. Polled by `AuthSession::initialize`.
    async fn is_loaded(&self) -> bool;
    async fn init(&self, config: &ClientConfig) -> std::result::Result<(), ProviderError>;
    async fn is_signed_in(&self) -> bool;
    async fn current_auth_response(&self) -> std::result::Result<AuthResponse, ProviderError>;
    /// Interactive consent flow.
    async fn sign_in(
        &self,
        options: &SignInOptions,
    ) -> std::result::Result<AuthResponse, ProviderError>;
    /// Re-fetch the current user's auth response, bypassing any cached token.
    async fn reload_auth_response(&self) -> std::result::Result<AuthResponse, ProviderError>;
    async fn sign_out(&self) -> std::result::Result<(), ProviderError>;
}

/// Anything that can hand out a bearer token for the mail API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed-interval polling with a hard attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("not ready after {attempts} attempts")]
pub struct RetryExhausted {
    pub attempts: u32,
}

impl RetryPolicy {
    /// Call `ready` until it returns true, sleeping `interval` between calls.
    pub async fn poll<F, Fut>(&self, mut ready: F) -> std::result::Result<(), RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for attempt in 1..=self.max_attempts {
            if ready().await {
                return Ok(());
            }
            if attempt < self.max_attempts {
                debug!("Waiting for auth provider to load (attempt {})", attempt);
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(RetryExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    Authenticating,
    SignedIn,
    Refreshing,
    Failed(String),
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::SignedOut => write!(f, "signed out"),
            AuthState::Authenticating => write!(f, "authenticating"),
            AuthState::SignedIn => write!(f, "signed in"),
            AuthState::Refreshing => write!(f, "refreshing"),
            AuthState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

struct SessionState {
    auth: AuthState,
    credential: Option<Credential>,
}

/// Owns the sign-in/refresh state machine and the single live credential.
pub struct AuthSession {
    provider: Box<dyn AuthProvider>,
    store: Box<dyn CredentialStore>,
    config: ClientConfig,
    readiness: RetryPolicy,
    state: Mutex<SessionState>,
    // Held for the whole refresh so concurrent callers share one round trip.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl AuthSession {
    /// Build a session, picking up any credential persisted by an earlier run.
    pub fn new(
        provider: Box<dyn AuthProvider>,
        store: Box<dyn CredentialStore>,
        config: ClientConfig,
    ) -> Self {
        let credential = store.load();
        let auth = if credential.is_some() {
            AuthState::SignedIn
        } else {
            AuthState::SignedOut
        };
        Self {
            provider,
            store,
            config,
            readiness: RetryPolicy::default(),
            state: Mutex::new(SessionState { auth, credential }),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_readiness(mut self, policy: RetryPolicy) -> Self {
        self.readiness = policy;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> AuthState {
        self.lock().auth.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.lock();
        state.auth == AuthState::SignedIn && state.credential.is_some()
    }

    /// True with no credential, or within the skew window of its expiry.
    pub fn is_expired(&self) -> bool {
        self.lock()
            .credential
            .as_ref()
            .map_or(true, Credential::is_expired)
    }

    /// Wait for the provider, initialize it and adopt an existing sign-in.
    pub async fn initialize(&self) -> Result<()> {
        self.readiness
            .poll(|| self.provider.is_loaded())
            .await
            .map_err(|e| Error::AuthInit(format!("provider {}", e)))?;

        self.provider
            .init(&self.config)
            .await
            .map_err(|e| Error::AuthInit(e.to_string()))?;
        debug!("Auth provider initialized");

        if self.provider.is_signed_in().await {
            let response = self
                .provider
                .current_auth_response()
                .await
                .map_err(|e| Error::AuthInit(e.to_string()))?;
            self.install(response.into());
            info!("Restored existing Google session");
        }
        Ok(())
    }

    pub async fn sign_in(&self) -> Result<()> {
        let restore = {
            let mut state = self.lock();
            if state.auth == AuthState::Authenticating {
                return Err(Error::Auth("a sign-in is already in progress".to_string()));
            }
            let previous = std::mem::replace(&mut state.auth, AuthState::Authenticating);
            StateRestore::new(self, AuthState::Authenticating, previous)
        };

        info!("Requesting user consent");
        let options = SignInOptions {
            select_account: true,
        };
        let outcome = self.provider.sign_in(&options).await;
        restore.disarm();
        match outcome {
            Ok(response) => {
                self.install(response.into());
                info!("User signed in successfully");
                Ok(())
            }
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                self.lock().auth = AuthState::Failed(e.to_string());
                Err(match e {
                    ProviderError::PopupBlocked => Error::PopupBlocked,
                    other => Error::Auth(other.to_string()),
                })
            }
        }
    }

    pub async fn refresh_token(&self) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    // Caller must hold `refresh_gate`.
    async fn refresh_locked(&self) -> Result<()> {
        let restore = {
            let mut state = self.lock();
            if !matches!(state.auth, AuthState::SignedIn | AuthState::Failed(_)) {
                return Err(Error::Refresh(format!(
                    "no session to refresh ({})",
                    state.auth
                )));
            }
            let previous = std::mem::replace(&mut state.auth, AuthState::Refreshing);
            StateRestore::new(self, AuthState::Refreshing, previous)
        };

        let outcome = self.provider.reload_auth_response().await;
        restore.disarm();
        match outcome {
            Ok(response) => {
                self.install(response.into());
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.lock().auth = AuthState::Failed(e.to_string());
                Err(Error::Refresh(e.to_string()))
            }
        }
    }

    /// The token consumers should use. Refreshes first when the current one
    /// is missing or inside the skew window.
    pub async fn valid_token(&self) -> Result<String> {
        if let Some(token) = self.usable_token() {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock().await;
        if let Some(token) = self.usable_token() {
            debug!("Using token refreshed by a concurrent caller");
            return Ok(token);
        }

        self.refresh_locked()
            .await
            .map_err(|e| Error::AuthExpired(e.to_string()))?;
        self.usable_token().ok_or_else(|| {
            Error::AuthExpired("provider returned a token that is about to expire".to_string())
        })
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.provider
            .sign_out()
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;
        self.store.clear();

        let mut state = self.lock();
        state.credential = None;
        state.auth = AuthState::SignedOut;
        info!("Signed out");
        Ok(())
    }

    fn usable_token(&self) -> Option<String> {
        let state = self.lock();
        if !matches!(state.auth, AuthState::SignedIn | AuthState::Refreshing) {
            return None;
        }
        state
            .credential
            .as_ref()
            .filter(|c| !c.is_expired())
            .map(|c| c.access_token.clone())
    }

    fn install(&self, credential: Credential) {
        self.store.save(&credential);
        let mut state = self.lock();
        state.credential = Some(credential);
        state.auth = AuthState::SignedIn;
    }
}

// Puts the session back where it was if a sign-in or refresh future is
// dropped while the provider call is still pending.
struct StateRestore<'a> {
    session: &'a AuthSession,
    transient: AuthState,
    previous: Option<AuthState>,
}

impl<'a> StateRestore<'a> {
    fn new(session: &'a AuthSession, transient: AuthState, previous: AuthState) -> Self {
        Self {
            session,
            transient,
            previous: Some(previous),
        }
    }

    fn disarm(mut self) {
        self.previous = None;
    }
}

impl Drop for StateRestore<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let mut state = self.session.lock();
            if state.auth == self.transient {
                warn!("{} was cancelled, back to {}", self.transient, previous);
                state.auth = previous;
            }
        }
    }
}

#[async_trait]
impl TokenSource for AuthSession {
    async fn access_token(&self) -> Result<String> {
        self.valid_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail_api::credentials::MockCredentialStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> ClientConfig {
        ClientConfig {
            scopes: vec![GMAIL_READONLY_SCOPE.to_string()],
            token_cache: PathBuf::from("tokens.json"),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn fresh_response(token: &str) -> AuthResponse {
        AuthResponse {
            access_token: token.to_string(),
            expires_at_ms: now_ms() + 3_600_000,
        }
    }

    fn empty_store() -> MockCredentialStore {
        let mut store = MockCredentialStore::new();
        store.expect_load().returning(|| None);
        store.expect_save().returning(|_| ());
        store.expect_clear().returning(|| ());
        store
    }

    fn store_with(credential: Credential) -> MockCredentialStore {
        let mut store = MockCredentialStore::new();
        store.expect_load().returning(move || Some(credential.clone()));
        store.expect_save().returning(|_| ());
        store.expect_clear().returning(|| ());
        store
    }

    fn session(provider: MockAuthProvider, store: MockCredentialStore) -> AuthSession {
        AuthSession::new(Box::new(provider), Box::new(store), config())
    }

    #[test]
    fn test_new_session_adopts_stored_credential() {
        let stored = Credential::new("stored", now_ms() + 3_600_000);
        let session = session(MockAuthProvider::new(), store_with(stored));
        assert_eq!(session.state(), AuthState::SignedIn);
        assert!(session.is_authenticated());
        assert!(!session.is_expired());
    }

    #[test]
    fn test_is_expired_without_credential() {
        let session = session(MockAuthProvider::new(), empty_store());
        assert_eq!(session.state(), AuthState::SignedOut);
        assert!(session.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_waits_for_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut provider = MockAuthProvider::new();
        provider
            .expect_is_loaded()
            .returning(move || seen.fetch_add(1, Ordering::SeqCst) >= 3);
        provider.expect_init().times(1).returning(|_| Ok(()));
        provider.expect_is_signed_in().returning(|| false);

        let session = session(provider, empty_store()).with_readiness(RetryPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 5,
        });
        let started = tokio::time::Instant::now();
        session.initialize().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(session.state(), AuthState::SignedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut provider = MockAuthProvider::new();
        provider.expect_is_loaded().returning(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            false
        });
        provider.expect_init().never();

        let session = session(provider, empty_store());
        let started = tokio::time::Instant::now();
        let err = session.initialize().await.unwrap_err();

        assert!(matches!(err, Error::AuthInit(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 20);
        assert_eq!(started.elapsed(), Duration::from_millis(1_900));
    }

    #[tokio::test]
    async fn test_initialize_adopts_signed_in_user() {
        let mut provider = MockAuthProvider::new();
        provider.expect_is_loaded().returning(|| true);
        provider.expect_init().returning(|_| Ok(()));
        provider.expect_is_signed_in().returning(|| true);
        provider
            .expect_current_auth_response()
            .returning(|| Ok(fresh_response("existing")));

        let mut store = MockCredentialStore::new();
        store.expect_load().returning(|| None);
        store
            .expect_save()
            .withf(|c| c.access_token == "existing")
            .times(1)
            .returning(|_| ());

        let session = session(provider, store);
        session.initialize().await.unwrap();
        assert_eq!(session.state(), AuthState::SignedIn);
        assert_eq!(session.valid_token().await.unwrap(), "existing");
    }

    #[tokio::test]
    async fn test_initialize_reports_provider_init_failure() {
        let mut provider = MockAuthProvider::new();
        provider.expect_is_loaded().returning(|| true);
        provider
            .expect_init()
            .returning(|_| Err(ProviderError::Failed("bad client secret".to_string())));

        let session = session(provider, empty_store());
        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, Error::AuthInit(msg) if msg.contains("bad client secret")));
    }

    #[tokio::test]
    async fn test_sign_in_stores_credential() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_in()
            .withf(|options| options.select_account)
            .times(1)
            .returning(|_| Ok(fresh_response("new-token")));

        let mut store = MockCredentialStore::new();
        store.expect_load().returning(|| None);
        store
            .expect_save()
            .withf(|c| c.access_token == "new-token")
            .times(1)
            .returning(|_| ());

        let session = session(provider, store);
        session.sign_in().await.unwrap();
        assert_eq!(session.state(), AuthState::SignedIn);
        assert_eq!(session.valid_token().await.unwrap(), "new-token");
    }

    #[tokio::test]
    async fn test_sign_in_popup_blocked() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_in()
            .returning(|_| Err(ProviderError::PopupBlocked));

        let session = session(provider, empty_store());
        let err = session.sign_in().await.unwrap_err();
        assert!(matches!(err, Error::PopupBlocked));
        assert!(matches!(session.state(), AuthState::Failed(_)));
    }

    #[tokio::test]
    async fn test_sign_in_other_provider_error() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_in()
            .returning(|_| Err(ProviderError::Failed("access_denied".to_string())));

        let session = session(provider, empty_store());
        let err = session.sign_in().await.unwrap_err();
        assert!(matches!(err, Error::Auth(msg) if msg == "access_denied"));
    }

    #[tokio::test]
    async fn test_valid_token_skips_refresh_when_fresh() {
        let mut provider = MockAuthProvider::new();
        provider.expect_reload_auth_response().never();

        let stored = Credential::new("still-good", now_ms() + 600_000);
        let session = session(provider, store_with(stored));
        assert_eq!(session.valid_token().await.unwrap(), "still-good");
    }

    #[tokio::test]
    async fn test_valid_token_refreshes_inside_skew_window() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_reload_auth_response()
            .times(1)
            .returning(|| Ok(fresh_response("refreshed")));

        // four minutes left is inside the five minute window
        let stored = Credential::new("stale", now_ms() + 240_000);
        let session = session(provider, store_with(stored));
        assert!(session.is_expired());
        assert_eq!(session.valid_token().await.unwrap(), "refreshed");
        assert_eq!(session.state(), AuthState::SignedIn);
    }

    #[tokio::test]
    async fn test_valid_token_refresh_failure_is_auth_expired() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_reload_auth_response()
            .returning(|| Err(ProviderError::NotSignedIn));

        let stored = Credential::new("stale", now_ms() - 1);
        let session = session(provider, store_with(stored));
        let err = session.valid_token().await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired(_)));
        assert!(matches!(session.state(), AuthState::Failed(_)));
    }

    #[tokio::test]
    async fn test_valid_token_rejects_short_lived_refresh() {
        let mut provider = MockAuthProvider::new();
        provider.expect_reload_auth_response().returning(|| {
            Ok(AuthResponse {
                access_token: "short".to_string(),
                expires_at_ms: now_ms() + 60_000,
            })
        });

        let stored = Credential::new("stale", now_ms() - 1);
        let session = session(provider, store_with(stored));
        assert!(matches!(
            session.valid_token().await,
            Err(Error::AuthExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_valid_token_signed_out() {
        let mut provider = MockAuthProvider::new();
        provider.expect_reload_auth_response().never();

        let session = session(provider, empty_store());
        assert!(matches!(
            session.valid_token().await,
            Err(Error::AuthExpired(_))
        ));
        assert_eq!(session.state(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_refresh_token_without_session() {
        let session = session(MockAuthProvider::new(), empty_store());
        assert!(matches!(
            session.refresh_token().await,
            Err(Error::Refresh(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_recovers_from_failed_state() {
        let mut provider = MockAuthProvider::new();
        let mut attempts = 0;
        provider.expect_reload_auth_response().returning(move || {
            attempts += 1;
            if attempts == 1 {
                Err(ProviderError::Failed("network down".to_string()))
            } else {
                Ok(fresh_response("second-try"))
            }
        });

        let stored = Credential::new("stale", now_ms() - 1);
        let session = session(provider, store_with(stored));
        assert!(session.refresh_token().await.is_err());
        assert!(matches!(session.state(), AuthState::Failed(_)));

        session.refresh_token().await.unwrap();
        assert_eq!(session.state(), AuthState::SignedIn);
        assert_eq!(session.valid_token().await.unwrap(), "second-try");
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let mut provider = MockAuthProvider::new();
        provider.expect_sign_out().times(1).returning(|| Ok(()));

        let mut store = MockCredentialStore::new();
        store
            .expect_load()
            .returning(|| Some(Credential::new("t", i64::MAX)));
        store.expect_clear().times(1).returning(|| ());

        let session = session(provider, store);
        session.sign_out().await.unwrap();
        assert_eq!(session.state(), AuthState::SignedOut);
        assert!(session.is_expired());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_out_failure_keeps_session() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_out()
            .returning(|| Err(ProviderError::Failed("revoke failed".to_string())));

        let mut store = MockCredentialStore::new();
        store
            .expect_load()
            .returning(|| Some(Credential::new("t", i64::MAX)));
        store.expect_clear().never();

        let session = session(provider, store);
        assert!(matches!(session.sign_out().await, Err(Error::Auth(_))));
        assert_eq!(session.state(), AuthState::SignedIn);
    }

    // Provider whose refresh takes a while, so concurrent callers overlap.
    #[derive(Default)]
    struct SlowProvider {
        reloads: Arc<AtomicUsize>,
        sign_ins: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AuthProvider for SlowProvider {
        async fn is_loaded(&self) -> bool {
            true
        }
        async fn init(&self, _config: &ClientConfig) -> std::result::Result<(), ProviderError> {
            Ok(())
        }
        async fn is_signed_in(&self) -> bool {
            true
        }
        async fn current_auth_response(&self) -> std::result::Result<AuthResponse, ProviderError> {
            Err(ProviderError::NotSignedIn)
        }
        async fn sign_in(
            &self,
            _options: &SignInOptions,
        ) -> std::result::Result<AuthResponse, ProviderError> {
            let n = self.sign_ins.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(fresh_response(&format!("consent-{}", n)))
        }
        async fn reload_auth_response(&self) -> std::result::Result<AuthResponse, ProviderError> {
            let n = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(fresh_response(&format!("refresh-{}", n)))
        }
        async fn sign_out(&self) -> std::result::Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let reloads = Arc::new(AtomicUsize::new(0));
        let provider = SlowProvider {
            reloads: reloads.clone(),
            ..Default::default()
        };
        let stored = Credential::new("stale", now_ms() - 1);
        let session = AuthSession::new(Box::new(provider), Box::new(store_with(stored)), config());

        let (a, b, c) = tokio::join!(
            session.valid_token(),
            session.valid_token(),
            session.valid_token()
        );

        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), "refresh-1");
        assert_eq!(b.unwrap(), "refresh-1");
        assert_eq!(c.unwrap(), "refresh-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_refresh_does_not_wedge_session() {
        let provider = SlowProvider::default();
        let reloads = provider.reloads.clone();
        let stored = Credential::new("stale", now_ms() - 1);
        let session = AuthSession::new(Box::new(provider), Box::new(store_with(stored)), config());

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), session.valid_token()).await;
        assert!(cancelled.is_err());
        assert_eq!(session.state(), AuthState::SignedIn);

        assert_eq!(session.valid_token().await.unwrap(), "refresh-2");
        assert_eq!(reloads.load(Ordering::SeqCst), 2);
        assert_eq!(session.state(), AuthState::SignedIn);
        session.refresh_token().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sign_in_can_be_retried() {
        let provider = SlowProvider::default();
        let session = AuthSession::new(Box::new(provider), Box::new(empty_store()), config());

        let cancelled = tokio::time::timeout(Duration::from_millis(10), session.sign_in()).await;
        assert!(cancelled.is_err());
        assert_eq!(session.state(), AuthState::SignedOut);

        session.sign_in().await.unwrap();
        assert_eq!(session.valid_token().await.unwrap(), "consent-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_sign_in_while_in_flight_is_rejected() {
        let provider = SlowProvider::default();
        let sign_ins = provider.sign_ins.clone();
        let session = AuthSession::new(Box::new(provider), Box::new(empty_store()), config());

        let (first, second) = tokio::join!(session.sign_in(), session.sign_in());

        first.unwrap();
        assert!(matches!(second, Err(Error::Auth(_))));
        assert_eq!(sign_ins.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), AuthState::SignedIn);
        assert_eq!(session.valid_token().await.unwrap(), "consent-1");
    }
}
