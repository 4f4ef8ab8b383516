//! The identity provider seam

use async_trait::async_trait;

use crate::{ProviderError, Session};

pub mod in_memory;

pub use in_memory::InMemoryProvider;

/// An identity provider's client
///
/// Implementations wrap whatever client library talks to the identity
/// provider. Renewals that produce a session are expected to store it in the
/// client's own session cache, as OpenID Connect client libraries do.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Reads the session currently held in the client's cache
    async fn cached_session(&self) -> Result<Option<Session>, ProviderError>;

    /// Removes the session from the client's cache
    async fn remove_session(&self) -> Result<(), ProviderError>;

    /// Attempts a non-interactive renewal using the provider-side session
    async fn renew_silently(&self) -> Result<Option<Session>, ProviderError>;

    /// Attempts an interactive renewal in a popup window
    async fn renew_via_popup(&self) -> Result<Option<Session>, ProviderError>;

    /// Navigates away to the provider's sign-in endpoint
    async fn redirect_to_sign_in(&self) -> Result<(), ProviderError>;

    /// Navigates away to the provider's sign-out endpoint
    async fn redirect_to_sign_out(&self) -> Result<(), ProviderError>;

    /// Revokes the current access token with the provider
    async fn revoke_access_token(&self) -> Result<(), ProviderError>;

    /// Stores a session in the client's cache
    async fn store_session(&self, session: &Session) -> Result<(), ProviderError>;

    /// Completes a sign-in after the provider redirects back to the application
    async fn handle_sign_in_callback(&self) -> Result<Option<Session>, ProviderError>;

    /// Clears any abandoned sign-in state left in local storage
    async fn clear_stale_state(&self) -> Result<(), ProviderError>;

    /// Remembers where the user was before being sent to sign in
    ///
    /// Must survive the full-page round trip through the provider, so this
    /// is kept alongside the client's own local state.
    async fn save_return_path(&self, path: &str) -> Result<(), ProviderError>;

    /// The location saved by the last [`save_return_path`][Self::save_return_path]
    async fn return_path(&self) -> Result<Option<String>, ProviderError>;
}
