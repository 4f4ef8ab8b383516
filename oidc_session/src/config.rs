use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the refresh scheduler obtains the session it checks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Read the cached session directly
    ///
    /// A missing session stops the scheduler without contacting the identity
    /// provider, and never opens a popup from the background.
    #[default]
    CachedOnly,
    /// Run the full acquisition chain, including silent and popup renewal
    FullChain,
}

/// A view the application shows for a given path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    /// The identity provider redirected back after sign-in
    LoginComplete,
    /// The user is signing out
    Logout,
    /// Any other path; the application proper
    Application,
}

/// Configuration for session tracking and renewal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "renew_threshold_ms", with = "millis")]
    renew_threshold: Duration,
    #[serde(rename = "unknown_expiry_recheck_ms", with = "millis")]
    unknown_expiry_recheck: Duration,
    #[serde(rename = "min_recheck_interval_ms", with = "millis")]
    min_recheck_interval: Duration,
    check_mode: CheckMode,
    coalesce_acquisitions: bool,
    login_complete_path: String,
    logout_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    basename: Option<String>,
}

impl Default for SessionConfig {
    /// Default session configuration
    ///
    /// Sessions are renewed once less than 5 seconds remain. Sessions with no
    /// discernible expiry are re-checked every minute, and consecutive checks
    /// are spaced at least 500 ms apart. The scheduler reads the
    /// cached session directly and acquisitions are not coalesced.
    fn default() -> Self {
        Self {
            renew_threshold: Duration::from_millis(5_000),
            unknown_expiry_recheck: Duration::from_secs(60),
            min_recheck_interval: Duration::from_millis(500),
            check_mode: CheckMode::CachedOnly,
            coalesce_acquisitions: false,
            login_complete_path: String::from("/login_complete"),
            logout_path: String::from("/logout"),
            basename: None,
        }
    }
}

impl SessionConfig {
    /// Constructs a configuration with the given renewal threshold
    ///
    /// A session will be renewed in the background once less than
    /// `renew_threshold` remains before it expires.
    pub fn new(renew_threshold: Duration) -> Self {
        Self {
            renew_threshold,
            ..Self::default()
        }
    }

    /// Sets the renewal threshold
    pub fn with_renew_threshold(mut self, renew_threshold: Duration) -> Self {
        self.renew_threshold = renew_threshold;
        self
    }

    /// Sets how long to wait before re-checking a session with unknown expiry
    pub fn with_unknown_expiry_recheck(mut self, interval: Duration) -> Self {
        self.unknown_expiry_recheck = interval;
        self
    }

    /// Sets the minimum delay between consecutive checks
    pub fn with_min_recheck_interval(mut self, interval: Duration) -> Self {
        self.min_recheck_interval = interval;
        self
    }

    /// Sets how the scheduler obtains the session it checks
    pub fn with_check_mode(mut self, check_mode: CheckMode) -> Self {
        self.check_mode = check_mode;
        self
    }

    /// Enables or disables coalescing of concurrent acquisitions
    pub fn with_coalesced_acquisitions(mut self, coalesce: bool) -> Self {
        self.coalesce_acquisitions = coalesce;
        self
    }

    /// Sets the paths of the login-complete and logout views
    pub fn with_view_paths(
        mut self,
        login_complete_path: impl Into<String>,
        logout_path: impl Into<String>,
    ) -> Self {
        self.login_complete_path = login_complete_path.into();
        self.logout_path = logout_path.into();
        self
    }

    /// Sets the prefix the application is mounted under
    ///
    /// It is stripped from the location saved before sending the user to
    /// sign in, so that the user can be returned there afterwards.
    pub fn with_basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = Some(basename.into());
        self
    }

    /// The renewal threshold
    #[inline]
    pub fn renew_threshold(&self) -> Duration {
        self.renew_threshold
    }

    /// The re-check interval for sessions with unknown expiry
    #[inline]
    pub fn unknown_expiry_recheck(&self) -> Duration {
        self.unknown_expiry_recheck
    }

    /// The minimum delay between consecutive checks
    #[inline]
    pub fn min_recheck_interval(&self) -> Duration {
        self.min_recheck_interval
    }

    /// How the scheduler obtains the session it checks
    #[inline]
    pub fn check_mode(&self) -> CheckMode {
        self.check_mode
    }

    /// Whether concurrent acquisitions are coalesced
    #[inline]
    pub fn coalesce_acquisitions(&self) -> bool {
        self.coalesce_acquisitions
    }

    /// The path of the login-complete view
    #[inline]
    pub fn login_complete_path(&self) -> &str {
        &self.login_complete_path
    }

    /// The path of the logout view
    #[inline]
    pub fn logout_path(&self) -> &str {
        &self.logout_path
    }

    /// The prefix the application is mounted under, if any
    #[inline]
    pub fn basename(&self) -> Option<&str> {
        self.basename.as_deref()
    }

    /// The location to return to after signing in from `location`
    ///
    /// Only the first occurrence of the basename is removed.
    pub fn return_path_for(&self, location: &str) -> String {
        match self.basename.as_deref() {
            Some(basename) if !basename.is_empty() => location.replacen(basename, "", 1),
            _ => location.to_owned(),
        }
    }

    /// Determines which view handles a path
    pub fn view_for(&self, path: &str) -> View {
        if path.starts_with(&self.login_complete_path) {
            View::LoginComplete
        } else if path.starts_with(&self.logout_path) {
            View::Logout
        } else {
            View::Application
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
