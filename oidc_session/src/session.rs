use oidc_session_clock::UnixMillis;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{decoder, AccessToken, AccessTokenRef, IdToken, IdTokenRef};

/// One authenticated identity as reported by the identity provider
///
/// At least one of the access token or ID token is expected to be present.
/// The expiry instant and the expired flag are only populated when the
/// identity provider's client reports them; otherwise the tokens' own `exp`
/// claims are consulted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<IdToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<UnixMillis>,
    #[serde(
        default,
        rename = "expired",
        skip_serializing_if = "Option::is_none"
    )]
    explicitly_expired: Option<bool>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    profile: Map<String, Value>,
}

impl Session {
    /// Constructs an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the access token
    pub fn with_access_token(mut self, token: impl Into<AccessToken>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the ID token
    pub fn with_id_token(mut self, token: impl Into<IdToken>) -> Self {
        self.id_token = Some(token.into());
        self
    }

    /// Sets the authoritative expiry instant
    pub fn with_expires_at(mut self, expires_at: UnixMillis) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the authoritative expired flag
    pub fn with_explicitly_expired(mut self, expired: bool) -> Self {
        self.explicitly_expired = Some(expired);
        self
    }

    /// Sets the identity profile claims
    pub fn with_profile(mut self, profile: Map<String, Value>) -> Self {
        self.profile = profile;
        self
    }

    /// Gets the access token, if available
    #[inline]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access_token.as_deref()
    }

    /// Gets the ID token, if available
    #[inline]
    pub fn id_token(&self) -> Option<&IdTokenRef> {
        self.id_token.as_deref()
    }

    /// Gets the expiry instant reported by the identity provider
    #[inline]
    pub fn expires_at(&self) -> Option<UnixMillis> {
        self.expires_at
    }

    /// Gets the expired flag reported by the identity provider
    #[inline]
    pub fn explicitly_expired(&self) -> Option<bool> {
        self.explicitly_expired
    }

    /// Gets the identity profile claims
    #[inline]
    pub fn profile(&self) -> &Map<String, Value> {
        &self.profile
    }

    /// The token whose claims describe this session's expiry
    ///
    /// The ID token is preferred over the access token.
    pub fn bearer(&self) -> Option<&str> {
        self.id_token
            .as_deref()
            .map(IdTokenRef::as_str)
            .or_else(|| self.access_token.as_deref().map(AccessTokenRef::as_str))
    }

    /// The expiry instant as decoded from the session's tokens
    pub fn decoded_expiry(&self) -> Option<UnixMillis> {
        self.bearer().and_then(decoder::expiry_instant)
    }

    /// The best known expiry instant
    ///
    /// Uses the instant reported by the identity provider, falling back to
    /// the tokens' own claims.
    pub fn expiry(&self) -> Option<UnixMillis> {
        self.expires_at.or_else(|| self.decoded_expiry())
    }
}
