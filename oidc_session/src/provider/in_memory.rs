//! An in-memory identity provider

use std::{
    collections::HashSet,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use super::IdentityProvider;
use crate::{ProviderError, Session};

/// The flow on whose behalf an [`InMemoryProvider`] issues a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Issuance {
    /// A silent renewal
    Silent,
    /// A popup renewal
    Popup,
    /// A sign-in callback
    Callback,
}

/// A record of one call made against an [`InMemoryProvider`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ProviderCall {
    CachedSession,
    RemoveSession,
    RenewSilently,
    RenewViaPopup,
    RedirectToSignIn,
    RedirectToSignOut,
    RevokeAccessToken,
    StoreSession,
    HandleSignInCallback,
    ClearStaleState,
    SaveReturnPath,
    ReturnPath,
}

type Issuer = dyn Fn(Issuance) -> Result<Option<Session>, ProviderError> + Send + Sync;

/// An identity provider that keeps its session cache in process memory
///
/// New sessions come from an issuer function, which makes this useful for
/// demonstrations and for exercising renewal logic in tests. Every call is
/// recorded and can be inspected with [`calls()`][Self::calls]. Any call
/// can be made to fail with [`with_failing()`][Self::with_failing].
pub struct InMemoryProvider {
    session: Mutex<Option<Session>>,
    return_path: Mutex<Option<String>>,
    issuer: Box<Issuer>,
    calls: Mutex<Vec<ProviderCall>>,
    failing: HashSet<ProviderCall>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// Constructs a provider with an empty cache whose renewals never
    /// produce a session
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            return_path: Mutex::new(None),
            issuer: Box::new(|_| Ok(None)),
            calls: Mutex::new(Vec::new()),
            failing: HashSet::new(),
        }
    }

    /// Seeds the session cache
    pub fn with_session(self, session: Session) -> Self {
        *lock(&self.session) = Some(session);
        self
    }

    /// Sets the function used to issue sessions for renewals and callbacks
    pub fn with_issuer<F>(mut self, issuer: F) -> Self
    where
        F: Fn(Issuance) -> Result<Option<Session>, ProviderError> + Send + Sync + 'static,
    {
        self.issuer = Box::new(issuer);
        self
    }

    /// Makes every future `call` fail with [`ProviderError::Other`]
    ///
    /// The call is still recorded, and has no other effect.
    pub fn with_failing(mut self, call: ProviderCall) -> Self {
        self.failing.insert(call);
        self
    }

    /// Peeks at the saved return path without recording a call
    pub fn saved_return_path(&self) -> Option<String> {
        lock(&self.return_path).clone()
    }

    /// Peeks at the cached session without recording a call
    pub fn session(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    /// Replaces the cached session without recording a call
    pub fn set_session(&self, session: Option<Session>) {
        *lock(&self.session) = session;
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.calls).clone()
    }

    /// The number of times a particular call was made
    pub fn call_count(&self, call: ProviderCall) -> usize {
        lock(&self.calls).iter().filter(|&&c| c == call).count()
    }

    /// Forgets all recorded calls
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: ProviderCall) -> Result<(), ProviderError> {
        tracing::trace!(?call, "identity provider call");
        lock(&self.calls).push(call);

        if self.failing.contains(&call) {
            Err(ProviderError::Other(format!("{:?} failed", call)))
        } else {
            Ok(())
        }
    }

    async fn issue(&self, issuance: Issuance) -> Result<Option<Session>, ProviderError> {
        // Renewals complete asynchronously in a real client; yield so that
        // concurrent callers interleave the same way.
        tokio::task::yield_now().await;

        let issued = (self.issuer)(issuance)?;
        if issuance != Issuance::Callback {
            if let Some(session) = &issued {
                *lock(&self.session) = Some(session.clone());
            }
        }
        Ok(issued)
    }
}

impl fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InMemoryProvider")
            .field("session", &*lock(&self.session))
            .field("calls", &lock(&self.calls).len())
            .field("failing", &self.failing)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryProvider {
    async fn cached_session(&self) -> Result<Option<Session>, ProviderError> {
        self.record(ProviderCall::CachedSession)?;
        Ok(self.session())
    }

    async fn remove_session(&self) -> Result<(), ProviderError> {
        self.record(ProviderCall::RemoveSession)?;
        self.set_session(None);
        Ok(())
    }

    async fn renew_silently(&self) -> Result<Option<Session>, ProviderError> {
        self.record(ProviderCall::RenewSilently)?;
        self.issue(Issuance::Silent).await
    }

    async fn renew_via_popup(&self) -> Result<Option<Session>, ProviderError> {
        self.record(ProviderCall::RenewViaPopup)?;
        self.issue(Issuance::Popup).await
    }

    async fn redirect_to_sign_in(&self) -> Result<(), ProviderError> {
        self.record(ProviderCall::RedirectToSignIn)?;
        Ok(())
    }

    async fn redirect_to_sign_out(&self) -> Result<(), ProviderError> {
        self.record(ProviderCall::RedirectToSignOut)?;
        Ok(())
    }

    async fn revoke_access_token(&self) -> Result<(), ProviderError> {
        self.record(ProviderCall::RevokeAccessToken)?;
        Ok(())
    }

    async fn store_session(&self, session: &Session) -> Result<(), ProviderError> {
        self.record(ProviderCall::StoreSession)?;
        self.set_session(Some(session.clone()));
        Ok(())
    }

    async fn handle_sign_in_callback(&self) -> Result<Option<Session>, ProviderError> {
        self.record(ProviderCall::HandleSignInCallback)?;
        self.issue(Issuance::Callback).await
    }

    async fn clear_stale_state(&self) -> Result<(), ProviderError> {
        self.record(ProviderCall::ClearStaleState)?;
        Ok(())
    }

    async fn save_return_path(&self, path: &str) -> Result<(), ProviderError> {
        self.record(ProviderCall::SaveReturnPath)?;
        *lock(&self.return_path) = Some(path.to_owned());
        Ok(())
    }

    async fn return_path(&self) -> Result<Option<String>, ProviderError> {
        self.record(ProviderCall::ReturnPath)?;
        Ok(self.saved_return_path())
    }
}
