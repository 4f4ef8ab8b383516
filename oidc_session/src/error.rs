//! Common errors

use std::error::Error as StdError;

use thiserror::Error;

use crate::acquire::AcquireError;

/// An error reported by an [`IdentityProvider`][crate::provider::IdentityProvider]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The identity provider has no active session to renew from
    #[error("identity provider has no active session")]
    NoActiveSession,
    /// An interactive window was closed before the flow completed
    #[error("interactive sign-in window was closed")]
    PopupClosed,
    /// The request to the identity provider could not be completed
    #[error("error communicating with identity provider")]
    Transport(#[source] Box<dyn StdError + Send + Sync + 'static>),
    /// Any other failure reported by the identity provider
    #[error("identity provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Wraps an arbitrary transport error
    pub fn transport(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::Transport(source.into())
    }
}

/// An error surfaced by the session facade
#[derive(Debug, Error)]
pub enum SessionError {
    /// The facade was used before an identity provider was configured
    #[error("identity provider has not been configured")]
    ProviderUnconfigured,
    /// No fresh session with an access token could be obtained
    #[error("user is not logged in")]
    NotAuthenticated,
    /// No fresh session could be obtained
    #[error("no user session")]
    NoSession,
    /// The sign-in callback did not produce a session
    #[error("login failed")]
    LoginFailed,
    /// Acquiring a session failed reading the cache or at the final strategy
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    /// A direct call to the identity provider failed
    #[error("identity provider call failed")]
    Provider(#[from] ProviderError),
}
