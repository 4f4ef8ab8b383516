//! Session freshness evaluation

use std::time::Duration;

use oidc_session_clock::{Clock, System, UnixMillis};

use crate::Session;

/// Determines whether a session is usable right now
#[inline]
pub fn is_fresh(session: Option<&Session>) -> bool {
    is_fresh_with_clock(session, &System)
}

/// Determines whether a session is usable at the current time as reported by
/// the provided clock
#[inline]
pub fn is_fresh_with_clock<C: Clock>(session: Option<&Session>, clock: &C) -> bool {
    is_fresh_at(session, clock.now())
}

/// Determines whether a session is usable as of the provided time
///
/// An explicit expired flag from the identity provider is authoritative.
/// Otherwise the expiry reported by the identity provider is used, falling
/// back to the session's decoded tokens. A session whose expiry cannot be
/// determined is considered fresh.
pub fn is_fresh_at(session: Option<&Session>, now: UnixMillis) -> bool {
    let session = match session {
        Some(s) => s,
        None => return false,
    };

    if let Some(expired) = session.explicitly_expired() {
        return !expired;
    }

    match session.expiry() {
        Some(expiry) => now < expiry,
        None => true,
    }
}

/// Where a session sits relative to its expiry and the renewal threshold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// The session has more than the renewal threshold remaining
    Fresh,
    /// The session is valid, but should be renewed
    Stale,
    /// The session is no longer valid
    Expired,
}

impl SessionStatus {
    /// Classifies a signed amount of remaining time against a renewal threshold
    pub fn classify(time_left_ms: i64, renew_threshold: Duration) -> Self {
        let threshold = i64::try_from(renew_threshold.as_millis()).unwrap_or(i64::MAX);
        if time_left_ms < 0 {
            SessionStatus::Expired
        } else if time_left_ms < threshold {
            SessionStatus::Stale
        } else {
            SessionStatus::Fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use oidc_session_clock::TestClock;

    use super::*;
    use crate::{AccessToken, IdToken};

    fn token_expiring_at(exp_secs: u64) -> String {
        let payload = format!(r#"{{"exp":{}}}"#, exp_secs);
        format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn missing_session_is_not_fresh() {
        assert!(!is_fresh_at(None, UnixMillis(0)));
    }

    #[test]
    fn explicit_flag_wins_over_token_content() {
        let far_future = token_expiring_at(4_000_000_000);
        let session = Session::new()
            .with_access_token(AccessToken::new(far_future))
            .with_explicitly_expired(true);
        assert!(!is_fresh_at(Some(&session), UnixMillis(0)));

        let long_gone = token_expiring_at(1);
        let session = Session::new()
            .with_access_token(AccessToken::new(long_gone))
            .with_explicitly_expired(false);
        assert!(is_fresh_at(Some(&session), UnixMillis::from_secs(1_000)));
    }

    #[test]
    fn decoded_expiry_is_compared_against_now() {
        let session = Session::new().with_access_token(AccessToken::new(token_expiring_at(100)));

        assert!(is_fresh_at(Some(&session), UnixMillis(99_999)));
        assert!(!is_fresh_at(Some(&session), UnixMillis(100_000)));
        assert!(!is_fresh_at(Some(&session), UnixMillis(100_001)));
    }

    #[test]
    fn id_token_is_decoded_in_preference() {
        let session = Session::new()
            .with_access_token(AccessToken::new(token_expiring_at(1_000)))
            .with_id_token(IdToken::new(token_expiring_at(10)));

        assert!(!is_fresh_at(Some(&session), UnixMillis::from_secs(500)));
    }

    #[test]
    fn reported_expiry_is_preferred_over_token_claims() {
        let session = Session::new()
            .with_access_token(AccessToken::from_static("opaque"))
            .with_expires_at(UnixMillis::from_secs(100));

        assert!(is_fresh_at(Some(&session), UnixMillis::from_secs(99)));
        assert!(!is_fresh_at(Some(&session), UnixMillis::from_secs(100)));

        let session = Session::new()
            .with_access_token(AccessToken::new(token_expiring_at(10_000)))
            .with_expires_at(UnixMillis::from_secs(100));
        assert!(!is_fresh_at(Some(&session), UnixMillis::from_secs(200)));
    }

    #[test]
    fn undecodable_tokens_are_permissively_fresh() {
        let session = Session::new().with_access_token(AccessToken::from_static("opaque"));
        assert!(is_fresh_at(Some(&session), UnixMillis(u64::MAX)));

        let session = Session::new();
        assert!(is_fresh_at(Some(&session), UnixMillis(u64::MAX)));
    }

    #[test]
    fn clock_is_consulted() {
        let clock = TestClock::new(UnixMillis::from_secs(50));
        let session = Session::new().with_access_token(AccessToken::new(token_expiring_at(100)));

        assert!(is_fresh_with_clock(Some(&session), &clock));
        clock.set(UnixMillis::from_secs(100));
        assert!(!is_fresh_with_clock(Some(&session), &clock));
    }

    #[test]
    fn classification_against_threshold() {
        let threshold = Duration::from_millis(5_000);
        assert_eq!(SessionStatus::classify(-1, threshold), SessionStatus::Expired);
        assert_eq!(SessionStatus::classify(0, threshold), SessionStatus::Stale);
        assert_eq!(SessionStatus::classify(4_999, threshold), SessionStatus::Stale);
        assert_eq!(SessionStatus::classify(5_000, threshold), SessionStatus::Fresh);
    }
}
