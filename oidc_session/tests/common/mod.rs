#![allow(dead_code)]

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use oidc_session::{
    clock::{Clock, UnixMillis},
    AccessToken, IdToken, Session,
};

/// An arbitrary, whole-second starting point for test clocks
pub const T: UnixMillis = UnixMillis(1_700_000_000_000);

/// A wall clock driven by Tokio's (pausable) timer
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
    base: UnixMillis,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(base: UnixMillis) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> UnixMillis {
        self.base + self.start.elapsed()
    }
}

/// An unsigned JWT-shaped token whose `exp` claim is `expiry`
pub fn token_expiring_at(expiry: UnixMillis) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(
        r#"{{"sub":"test-user","exp":{}}}"#,
        expiry.as_secs()
    ));
    format!("{}.{}.", header, payload)
}

/// A session whose tokens expire at `expiry`
pub fn session_expiring_at(expiry: UnixMillis) -> Session {
    let token = token_expiring_at(expiry);
    Session::new()
        .with_access_token(AccessToken::new(token.clone()))
        .with_id_token(IdToken::new(token))
}

/// A session with opaque tokens and an expiry reported by the provider
pub fn opaque_session_expiring_at(expiry: UnixMillis) -> Session {
    Session::new()
        .with_access_token(AccessToken::from_static("opaque-access-token"))
        .with_expires_at(expiry)
}

pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}
