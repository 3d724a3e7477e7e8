//! Represents the bearer credential used against the remote storage API.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens expiring within this margin are treated as already expired.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::minutes(5);

/// Client identity plus the currently granted access token.
///
/// A credential is persisted as JSON by the caller (see the refresh
/// callback on [`crate::services::auth::Authenticator`]) and reloaded on
/// the next run, so every field round-trips through serde.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Credential {
    /// OAuth2 client identifier (also the assertion issuer).
    pub client_id: String,

    /// OAuth2 client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Refresh token issued by a previous authorization-code or refresh grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Current bearer token. Empty until the first refresh.
    #[serde(default)]
    pub access_token: String,

    /// When the access token stops being accepted by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Scope granted with the current token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Enterprise the service identity acts for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise_id: Option<String>,

    /// Signing key for the service identity (JWT-bearer grant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<ServiceKey>,
}

/// RSA key registered with the remote service for a service identity.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceKey {
    /// Public key id registered with the service; sent as the JWT `kid`.
    pub key_id: String,

    /// Unencrypted PKCS#8 or PKCS#1 PEM.
    pub private_key_pem: String,
}

impl std::fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceKey")
            .field("key_id", &self.key_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

impl Credential {
    /// True when the access token is present and outside the expiry margin.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expiry) => expiry - EXPIRY_SAFETY_MARGIN > now,
            None => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn has_enterprise(&self) -> bool {
        self.enterprise_id.as_deref().is_some_and(|e| !e.is_empty())
    }
}
