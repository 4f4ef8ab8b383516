//! Obtaining a usable session through a chain of fallback strategies

use std::{error, fmt, sync::Arc};

use oidc_session_clock::{Clock, System};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{freshness, provider::IdentityProvider, ProviderError, Session};

/// A way of obtaining a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Use the session held in the identity provider's cache, if still fresh
    Cached,
    /// Renew without user interaction
    Silent,
    /// Renew interactively in a popup window
    Popup,
}

impl Strategy {
    /// The chain used when no other is requested
    pub const DEFAULT_CHAIN: [Strategy; 3] = [Strategy::Cached, Strategy::Silent, Strategy::Popup];

    /// Whether this strategy obtains a new session from the provider
    ///
    /// The cache must be cleared before any renewal is attempted.
    #[inline]
    pub fn is_renewal(self) -> bool {
        !matches!(self, Strategy::Cached)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Strategy::Cached => "cached",
            Strategy::Silent => "silent",
            Strategy::Popup => "popup",
        })
    }
}

/// The outcome of a single strategy
#[derive(Debug)]
pub enum Attempt {
    /// A session was obtained
    Acquired(Session),
    /// The strategy produced nothing usable; the next strategy should be tried
    Exhausted,
    /// The strategy failed
    ///
    /// Only fatal to the chain when this is the final strategy.
    Failed(ProviderError),
}

/// An error while acquiring a session
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The stale session could not be cleared before renewing
    #[error("unable to clear cached session before renewal")]
    Clear(#[source] ProviderError),
    /// The cached session could not be read, or the final strategy in the
    /// chain failed
    #[error("{strategy} session acquisition failed")]
    Strategy {
        /// The strategy that failed
        strategy: Strategy,
        /// The underlying provider error
        #[source]
        source: ProviderError,
    },
}

/// Obtains a usable session from an identity provider
///
/// Concurrent acquisitions are independent by default, so overlapping callers
/// may each clear and renew. Enabling coalescing allows only one acquisition
/// in flight; later callers wait for it and then re-run the chain, which
/// normally finds the freshly renewed session in the cache.
#[derive(Clone)]
pub struct SessionAcquirer<C = System> {
    provider: Arc<dyn IdentityProvider>,
    clock: C,
    in_flight: Option<Arc<Mutex<()>>>,
}

impl SessionAcquirer<System> {
    /// Constructs a new acquirer using the system clock
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            clock: System,
            in_flight: None,
        }
    }
}

impl<C> SessionAcquirer<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> SessionAcquirer<D> {
        SessionAcquirer {
            provider: self.provider,
            clock,
            in_flight: self.in_flight,
        }
    }

    /// Enables or disables coalescing of concurrent acquisitions
    pub fn with_coalescing(mut self, coalesce: bool) -> Self {
        self.in_flight = if coalesce {
            Some(Arc::new(Mutex::new(())))
        } else {
            None
        };
        self
    }

    /// The identity provider this acquirer draws from
    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// The clock used for freshness checks
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> SessionAcquirer<C> {
    /// Obtains a session using the default chain
    ///
    /// A fresh cached session is returned untouched. Otherwise the cache is
    /// cleared and a silent renewal is attempted, falling back to a popup.
    /// Returns `Ok(None)` if every strategy came up empty.
    pub async fn acquire(&self) -> Result<Option<Session>, AcquireError> {
        self.acquire_with(&Strategy::DEFAULT_CHAIN).await
    }

    /// Obtains a session by trying each strategy in order
    ///
    /// The first session obtained is returned. A failure is only returned if
    /// it came from the final strategy or from reading the cache; earlier
    /// renewal failures are logged and the next strategy is tried.
    #[tracing::instrument(skip(self), fields(coalescing = self.in_flight.is_some()))]
    pub async fn acquire_with(
        &self,
        chain: &[Strategy],
    ) -> Result<Option<Session>, AcquireError> {
        let _in_flight = match &self.in_flight {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let mut cleared = false;
        for (idx, &strategy) in chain.iter().enumerate() {
            let is_last = idx + 1 == chain.len();

            if strategy.is_renewal() && !cleared {
                tracing::debug!("clearing cached session before renewal");
                self.provider
                    .remove_session()
                    .await
                    .map_err(AcquireError::Clear)?;
                cleared = true;
            }

            match self.attempt(strategy).await {
                Attempt::Acquired(session) => {
                    tracing::debug!(%strategy, "session acquired");
                    return Ok(Some(session));
                }
                Attempt::Exhausted => {
                    tracing::debug!(%strategy, "no session from strategy, trying next");
                }
                // A cache that cannot be read must not be cleared and renewed
                // over.
                Attempt::Failed(source) if is_last || !strategy.is_renewal() => {
                    return Err(AcquireError::Strategy { strategy, source });
                }
                Attempt::Failed(error) => {
                    tracing::warn!(
                        %strategy,
                        error = (&error as &dyn error::Error),
                        "session strategy failed, trying next"
                    );
                }
            }
        }

        tracing::debug!("all strategies exhausted without a session");
        Ok(None)
    }

    /// Runs a single strategy
    pub async fn attempt(&self, strategy: Strategy) -> Attempt {
        let result = match strategy {
            Strategy::Cached => match self.provider.cached_session().await {
                Ok(Some(session)) => {
                    if freshness::is_fresh_with_clock(Some(&session), &self.clock) {
                        Ok(Some(session))
                    } else {
                        tracing::debug!("cached session is stale");
                        Ok(None)
                    }
                }
                other => other,
            },
            Strategy::Silent => self.provider.renew_silently().await,
            Strategy::Popup => self.provider.renew_via_popup().await,
        };

        match result {
            Ok(Some(session)) => Attempt::Acquired(session),
            Ok(None) => Attempt::Exhausted,
            Err(error) => Attempt::Failed(error),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for SessionAcquirer<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionAcquirer")
            .field("clock", &self.clock)
            .field("coalescing", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}
