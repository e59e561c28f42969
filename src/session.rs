//! Session gateway.
//!
//! Wraps an external identity provider behind [`AuthProvider`] and owns the
//! current [`Session`]. Sign-in state changes are published on a broadcast
//! channel, exactly one message per transition; no-op calls publish nothing.

use crate::error::AuthError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex};

/// Capacity of the transition channel. Slow subscribers that fall further
/// behind see `Lagged` and must re-read [`SessionGateway::currently_signed_in`].
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Result of a successful sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedIn {
    /// Account identifier (email) when the provider exposes one.
    pub account: Option<String>,
}

/// External authentication capability.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// Prepare the provider. Returns whether a session is already active.
    async fn initialize(&self) -> Result<Option<SignedIn>, AuthError>;

    /// Complete a sign-in with a provider-specific grant (e.g. an authorization code).
    async fn sign_in(&self, grant: &str) -> Result<SignedIn, AuthError>;

    /// End the session. Local credentials are dropped even when this fails.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Bearer token for remote requests, if signed in.
    async fn access_token(&self) -> Option<String>;

    /// Where to send the user to start an interactive sign-in.
    fn sign_in_url(&self, _state: &str) -> Option<String> {
        None
    }
}

/// Current sign-in state as shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    pub signed_in: bool,
    pub account: Option<String>,
    pub last_error: Option<String>,
}

/// Owns the session and serializes sign-in/sign-out transitions.
pub struct SessionGateway {
    provider: Arc<dyn AuthProvider>,
    session: RwLock<Session>,
    changes: broadcast::Sender<bool>,
    transition: Mutex<()>,
}

impl SessionGateway {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            provider,
            session: RwLock::new(Session::default()),
            changes,
            transition: Mutex::new(()),
        }
    }

    /// Initialize the provider. Safe to call again as a manual retry.
    ///
    /// On failure the error is recorded as `last_error` (blocking error screen)
    /// and returned.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        let _guard = self.transition.lock().await;
        match self.provider.initialize().await {
            Ok(existing) => {
                self.write_session(|s| s.last_error = None);
                if let Some(signed_in) = existing {
                    log::info!("Existing session restored");
                    self.transition_to(true, signed_in.account);
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Error initializing auth provider: {}", e);
                self.write_session(|s| s.last_error = Some(e.message()));
                Err(e)
            }
        }
    }

    pub fn currently_signed_in(&self) -> bool {
        self.session().signed_in
    }

    pub fn session(&self) -> Session {
        match self.session.read() {
            Ok(session) => session.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Receive `true`/`false` on every sign-in transition.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.changes.subscribe()
    }

    pub fn sign_in_url(&self, state: &str) -> Option<String> {
        self.provider.sign_in_url(state)
    }

    /// Sign in with a provider grant. Already signed in is a no-op.
    pub async fn sign_in(&self, grant: &str) -> Result<(), AuthError> {
        let _guard = self.transition.lock().await;
        if self.currently_signed_in() {
            log::debug!("Sign-in requested while already signed in; ignoring");
            return Ok(());
        }

        match self.provider.sign_in(grant).await {
            Ok(signed_in) => {
                self.write_session(|s| s.last_error = None);
                self.transition_to(true, signed_in.account);
                Ok(())
            }
            Err(e) => {
                log::error!("Error during sign in: {}", e);
                self.write_session(|s| s.last_error = Some(e.message()));
                Err(e)
            }
        }
    }

    /// Sign out. Signed out already is a no-op.
    ///
    /// The local session always ends; a provider failure is still returned.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _guard = self.transition.lock().await;
        if !self.currently_signed_in() {
            log::debug!("Sign-out requested while signed out; ignoring");
            return Ok(());
        }

        let result = self.provider.sign_out().await;
        if let Err(e) = &result {
            log::error!("Error during sign out: {}", e);
        }
        self.transition_to(false, None);
        result
    }

    fn transition_to(&self, signed_in: bool, account: Option<String>) {
        let changed = self.write_session(|s| {
            if s.signed_in == signed_in {
                return false;
            }
            s.signed_in = signed_in;
            s.account = account;
            true
        });

        if changed {
            log::info!("Session {}", if signed_in { "signed in" } else { "signed out" });
            // No subscribers is fine.
            let _ = self.changes.send(signed_in);
        }
    }

    fn write_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        match self.session.write() {
            Ok(mut session) => f(&mut session),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProvider {
        fail_init: AtomicBool,
        fail_sign_out: AtomicBool,
        already_signed_in: AtomicBool,
        sign_in_calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthProvider for FakeProvider {
        async fn initialize(&self) -> Result<Option<SignedIn>, AuthError> {
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(AuthError::Initialization("discovery unreachable".into()));
            }
            if self.already_signed_in.load(Ordering::SeqCst) {
                return Ok(Some(SignedIn { account: Some("a@example.com".into()) }));
            }
            Ok(None)
        }

        async fn sign_in(&self, grant: &str) -> Result<SignedIn, AuthError> {
            self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
            if grant == "bad" {
                return Err(AuthError::SignIn("invalid_grant".into()));
            }
            Ok(SignedIn { account: Some("a@example.com".into()) })
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            if self.fail_sign_out.load(Ordering::SeqCst) {
                return Err(AuthError::SignOut("revoke failed".into()));
            }
            Ok(())
        }

        async fn access_token(&self) -> Option<String> {
            Some("token".into())
        }
    }

    fn drain(rx: &mut broadcast::Receiver<bool>) -> Vec<bool> {
        let mut seen = Vec::new();
        while let Ok(v) = rx.try_recv() {
            seen.push(v);
        }
        seen
    }

    #[tokio::test]
    async fn test_one_notification_per_transition() {
        let gateway = SessionGateway::new(Arc::new(FakeProvider::default()));
        let mut rx = gateway.subscribe();

        gateway.initialize().await.unwrap();
        gateway.sign_in("code").await.unwrap();
        gateway.sign_in("code").await.unwrap();
        gateway.sign_out().await.unwrap();
        gateway.sign_out().await.unwrap();
        gateway.sign_in("code").await.unwrap();

        assert_eq!(drain(&mut rx), vec![true, false, true]);
        assert!(gateway.currently_signed_in());
        assert_eq!(gateway.session().account.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_sign_in_while_signed_in_skips_provider() {
        let provider = Arc::new(FakeProvider::default());
        let gateway = SessionGateway::new(provider.clone());
        gateway.sign_in("code").await.unwrap();
        gateway.sign_in("code").await.unwrap();
        assert_eq!(provider.sign_in_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_sign_in_records_error_without_transition() {
        let gateway = SessionGateway::new(Arc::new(FakeProvider::default()));
        let mut rx = gateway.subscribe();

        let err = gateway.sign_in("bad").await.unwrap_err();
        assert!(matches!(err, AuthError::SignIn(_)));
        assert!(!gateway.currently_signed_in());
        assert_eq!(
            gateway.session().last_error.as_deref(),
            Some("Failed to sign in: invalid_grant")
        );
        assert!(drain(&mut rx).is_empty());

        gateway.sign_in("code").await.unwrap();
        assert_eq!(gateway.session().last_error, None);
    }

    #[tokio::test]
    async fn test_failed_init_is_retryable() {
        let provider = Arc::new(FakeProvider::default());
        provider.fail_init.store(true, Ordering::SeqCst);
        let gateway = SessionGateway::new(provider.clone());

        assert!(gateway.initialize().await.is_err());
        assert!(gateway.session().last_error.is_some());

        provider.fail_init.store(false, Ordering::SeqCst);
        gateway.initialize().await.unwrap();
        assert_eq!(gateway.session().last_error, None);
    }

    #[tokio::test]
    async fn test_restored_session_notifies() {
        let provider = Arc::new(FakeProvider::default());
        provider.already_signed_in.store(true, Ordering::SeqCst);
        let gateway = SessionGateway::new(provider);
        let mut rx = gateway.subscribe();

        gateway.initialize().await.unwrap();
        assert_eq!(drain(&mut rx), vec![true]);
    }

    #[tokio::test]
    async fn test_sign_out_failure_still_ends_session() {
        let provider = Arc::new(FakeProvider::default());
        provider.fail_sign_out.store(true, Ordering::SeqCst);
        let gateway = SessionGateway::new(provider);
        let mut rx = gateway.subscribe();

        gateway.sign_in("code").await.unwrap();
        assert!(gateway.sign_out().await.is_err());
        assert!(!gateway.currently_signed_in());
        assert_eq!(drain(&mut rx), vec![true, false]);
    }
}
