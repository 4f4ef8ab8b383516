//! A process-wide session manager
//!
//! Code that cannot have a [`SessionManager`] passed to it, such as view
//! glue, can reach the one installed here. The installed manager is set at
//! most once unless it is explicitly replaced.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::{manager::Redirecting, AccessToken, Session, SessionError, SessionManager};

static MANAGER: ArcSwapOption<SessionManager> = ArcSwapOption::const_empty();

/// Installs a session manager unless one is already installed
///
/// `factory` is only invoked when nothing is installed. Returns the manager
/// that is installed after the call.
pub fn install_with<F>(factory: F) -> Arc<SessionManager>
where
    F: FnOnce() -> SessionManager,
{
    if let Some(existing) = MANAGER.load_full() {
        return existing;
    }

    let candidate = Arc::new(factory());
    let previous =
        MANAGER.compare_and_swap(&None::<Arc<SessionManager>>, Some(Arc::clone(&candidate)));

    match &*previous {
        Some(existing) => Arc::clone(existing),
        None => {
            tracing::debug!("installed global session manager");
            candidate
        }
    }
}

/// Replaces the installed session manager
pub fn replace(manager: SessionManager) -> Option<Arc<SessionManager>> {
    tracing::debug!("replacing global session manager");
    MANAGER.swap(Some(Arc::new(manager)))
}

/// Removes the installed session manager
pub fn uninstall() -> Option<Arc<SessionManager>> {
    MANAGER.swap(None)
}

/// The installed session manager
///
/// # Errors
///
/// Returns [`SessionError::ProviderUnconfigured`] if nothing is installed.
pub fn manager() -> Result<Arc<SessionManager>, SessionError> {
    MANAGER.load_full().ok_or(SessionError::ProviderUnconfigured)
}

/// Gets the access token of a fresh session from the installed manager
pub async fn token() -> Result<AccessToken, SessionError> {
    manager()?.token().await
}

/// Gets a fresh session from the installed manager
pub async fn user() -> Result<Session, SessionError> {
    manager()?.user().await
}

/// Redirects to sign in through the installed manager
pub async fn login() -> Result<Redirecting, SessionError> {
    manager()?.login().await
}

/// Redirects to sign out through the installed manager
pub async fn logout() -> Result<Redirecting, SessionError> {
    manager()?.logout().await
}

/// Renews the session through the installed manager
pub async fn force_refresh() -> Result<Option<Session>, SessionError> {
    manager()?.force_refresh().await
}
