//! The operations the rest of an application calls

use std::{error, fmt, sync::Arc};

use oidc_session_clock::{Clock, System};

use crate::{
    acquire::{SessionAcquirer, Strategy},
    config::SessionConfig,
    freshness,
    provider::IdentityProvider,
    scheduler::{RefreshScheduler, RestartHandle, StopReason},
    watcher::{SessionPublisher, SessionWatcher},
    AccessToken, Session, SessionError,
};

/// Control has passed to the identity provider via a full-page navigation
///
/// Nothing after the call that returned this will meaningfully run; the
/// application is about to be unloaded. Callers should return immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "the page is navigating away; return without doing further work"]
pub struct Redirecting {
    _p: (),
}

impl Redirecting {
    const fn new() -> Self {
        Self { _p: () }
    }
}

/// The result of gating the application on an authenticated session
#[derive(Clone, Debug, PartialEq)]
pub enum Authentication {
    /// A fresh session is available
    Authenticated(Session),
    /// No usable session; the user is being sent to sign in
    Redirecting(Redirecting),
}

/// A sign-in that completed successfully
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedLogin {
    /// The newly stored session
    pub session: Session,
    /// Where the user was before being sent to sign in
    ///
    /// `/` when nothing was saved.
    pub return_to: String,
}

/// Session lifecycle operations over an identity provider
pub struct SessionManager<C = System> {
    acquirer: SessionAcquirer<C>,
    config: SessionConfig,
    publisher: SessionPublisher,
}

impl SessionManager<System> {
    /// Constructs a session manager using the system clock
    pub fn new(provider: Arc<dyn IdentityProvider>, config: SessionConfig) -> Self {
        let acquirer =
            SessionAcquirer::new(provider).with_coalescing(config.coalesce_acquisitions());
        Self {
            acquirer,
            config,
            publisher: SessionPublisher::new(),
        }
    }
}

impl<C> SessionManager<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> SessionManager<D> {
        SessionManager {
            acquirer: self.acquirer.with_clock(clock),
            config: self.config,
            publisher: self.publisher,
        }
    }

    /// The configuration in use
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Observes the current authenticated identity
    pub fn watch(&self) -> SessionWatcher {
        self.publisher.subscribe()
    }

    fn provider(&self) -> &Arc<dyn IdentityProvider> {
        self.acquirer.provider()
    }

    /// Redirects to the identity provider's sign-in page
    pub async fn login(&self) -> Result<Redirecting, SessionError> {
        self.provider().redirect_to_sign_in().await?;
        tracing::info!("redirecting to sign in");
        Ok(Redirecting::new())
    }

    /// Redirects to the identity provider's sign-out page
    pub async fn logout(&self) -> Result<Redirecting, SessionError> {
        self.provider().redirect_to_sign_out().await?;
        self.publisher.publish(None);
        tracing::info!("redirecting to sign out");
        Ok(Redirecting::new())
    }

    /// Completes sign-in after the identity provider redirects back
    ///
    /// The resulting session is stored and published, and the location saved
    /// by [`authenticate()`][Self::authenticate] is returned. If sign-in
    /// fails, the session is abandoned before the error is returned.
    pub async fn complete_login(&self) -> Result<CompletedLogin, SessionError> {
        let session = match self.store_callback_session().await {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "sign in failed, abandoning session"
                );
                self.abandon_session().await;
                return Err(error);
            }
        };

        let return_to = match self.provider().return_path().await {
            Ok(path) => path,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to read saved return path"
                );
                None
            }
        }
        .unwrap_or_else(|| String::from("/"));

        self.publisher.publish(Some(session.clone()));
        tracing::info!(%return_to, "sign in completed");
        Ok(CompletedLogin { session, return_to })
    }

    async fn store_callback_session(&self) -> Result<Session, SessionError> {
        let session = self
            .provider()
            .handle_sign_in_callback()
            .await?
            .ok_or(SessionError::LoginFailed)?;

        self.provider().store_session(&session).await?;
        Ok(session)
    }

    /// Discards all local and provider-side state for the current session
    ///
    /// Each step is attempted even if an earlier one fails.
    pub async fn abandon_session(&self) {
        let provider = self.provider();

        if let Err(error) = provider.clear_stale_state().await {
            tracing::warn!(error = (&error as &dyn error::Error), "unable to clear stale state");
        }
        if let Err(error) = provider.revoke_access_token().await {
            tracing::warn!(error = (&error as &dyn error::Error), "unable to revoke access token");
        }
        if let Err(error) = provider.remove_session().await {
            tracing::warn!(error = (&error as &dyn error::Error), "unable to remove session");
        }

        self.publisher.publish(None);
    }
}

impl<C: Clock> SessionManager<C> {
    /// Gets the access token of a fresh session
    ///
    /// Falls back to silent and then popup renewal if the cached session is
    /// stale or missing.
    pub async fn token(&self) -> Result<AccessToken, SessionError> {
        let session = self.acquire_fresh().await?;
        session
            .and_then(|s| s.access_token().map(ToOwned::to_owned))
            .ok_or(SessionError::NotAuthenticated)
    }

    /// Gets a fresh session
    ///
    /// Falls back to silent and then popup renewal if the cached session is
    /// stale or missing.
    pub async fn user(&self) -> Result<Session, SessionError> {
        self.acquire_fresh().await?.ok_or(SessionError::NoSession)
    }

    /// Renews the session regardless of whether the current one is fresh
    pub async fn force_refresh(&self) -> Result<Option<Session>, SessionError> {
        let session = self
            .acquirer
            .acquire_with(&[Strategy::Silent, Strategy::Popup])
            .await?;
        self.publisher.publish(session.clone());
        Ok(session)
    }

    /// Gates the application on a fresh cached session
    ///
    /// `location` is where the user currently is: the path, or the full
    /// location when a basename is configured. It is saved first so that
    /// [`complete_login()`][Self::complete_login] can return the user there.
    /// Without a fresh session, any leftover state is discarded and the user
    /// is sent to sign in rather than being shown an error.
    pub async fn authenticate(&self, location: &str) -> Result<Authentication, SessionError> {
        let provider = self.provider();

        let return_path = self.config.return_path_for(location);
        if let Err(error) = provider.save_return_path(&return_path).await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to save return path"
            );
        }

        let cached = provider.cached_session().await?;

        if let Some(session) = cached {
            if freshness::is_fresh_with_clock(Some(&session), self.acquirer.clock()) {
                self.publisher.publish(Some(session.clone()));
                return Ok(Authentication::Authenticated(session));
            }
        }

        tracing::info!("no fresh session, sending user to sign in");
        self.abandon_session().await;
        let redirecting = self.login().await?;
        Ok(Authentication::Redirecting(redirecting))
    }

    async fn acquire_fresh(&self) -> Result<Option<Session>, SessionError> {
        let session = self.acquirer.acquire().await?;
        let clock = self.acquirer.clock();

        Ok(session.filter(|s| freshness::is_fresh_with_clock(Some(s), clock)))
    }
}

impl<C> SessionManager<C>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Builds a refresh scheduler sharing this manager's provider, clock,
    /// configuration, and session broadcast
    pub fn scheduler<F>(&self, on_stop: F) -> RefreshScheduler<C>
    where
        F: Fn(StopReason, RestartHandle<C>) + Send + Sync + 'static,
    {
        RefreshScheduler::new(
            self.acquirer.clone(),
            self.config.clone(),
            self.publisher.clone(),
            on_stop,
        )
    }
}

impl<C: fmt::Debug> fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("acquirer", &self.acquirer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
