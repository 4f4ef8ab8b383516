//! Session freshness tracking and background renewal for OpenID Connect clients
//!
//! Applications that sign users in through an OpenID Connect identity
//! provider need to know, at any moment, whether the identity they hold is
//! still usable, and to obtain a new one with as little disruption to the
//! user as possible when it is not. This crate sits between the application
//! and the identity provider's client library and takes care of both.
//!
//! * Freshness is decided by the provider's own expired flag when reported,
//!   and otherwise by decoding the `exp` claim of the session's tokens. A
//!   token whose expiry cannot be read is given the benefit of the doubt.
//! * A usable session is obtained through a chain of strategies: the cached
//!   session if fresh, then a silent renewal, then an interactive popup.
//!   Only the failure of the final strategy is reported to the caller.
//! * A background loop re-checks the session shortly before it expires and
//!   renews it silently, or revokes it and stops once it has lapsed.
//!
//! The identity provider's client is abstracted behind
//! [`IdentityProvider`][provider::IdentityProvider].
//!
//! # General Flow
//!
//! On application start-up, construct a [`SessionManager`] over the
//! provider client, gate the application on [`SessionManager::authenticate()`],
//! and start a refresh scheduler to keep the session alive.
//!
//! ```
//! use std::sync::Arc;
//! use oidc_session::{
//!     provider::InMemoryProvider, Authentication, SessionConfig, SessionManager,
//! };
//!
//! # async fn run() -> Result<(), oidc_session::SessionError> {
//! let provider = Arc::new(InMemoryProvider::new());
//! let manager = SessionManager::new(provider, SessionConfig::default());
//!
//! match manager.authenticate("/dashboard").await? {
//!     Authentication::Authenticated(session) => {
//!         let scheduler = manager.scheduler(|reason, _restart| {
//!             tracing::warn!(?reason, "session is no longer being renewed");
//!         });
//!         let _ = scheduler.start();
//!
//!         tracing::info!(token = ?session.access_token(), "signed in");
//!     }
//!     Authentication::Redirecting(_) => return Ok(()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Anywhere the application needs a bearer token, call
//! [`SessionManager::token()`]. Code that cannot be handed the manager can
//! use the process-wide accessor in [`global`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod acquire;
mod braids;
mod config;
pub mod decoder;
mod error;
pub mod freshness;
pub mod global;
mod manager;
pub mod provider;
pub mod scheduler;
mod session;
mod watcher;

pub use braids::*;
pub use config::{CheckMode, SessionConfig, View};
pub use error::{ProviderError, SessionError};
pub use manager::{Authentication, CompletedLogin, Redirecting, SessionManager};
pub use oidc_session_clock as clock;
pub use session::Session;
pub use watcher::{BorrowedSession, SessionPublisher, SessionPublisherQuit, SessionWatcher};
