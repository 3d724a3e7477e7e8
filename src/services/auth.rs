//! Authenticator: keeps a bearer credential valid for long transfers.
//!
//! The grant used to obtain new tokens is chosen from whichever credential
//! fields are populated:
//! - refresh token present → OAuth2 refresh-token grant
//! - service key present → signed-assertion (JWT-bearer) grant
//! - enterprise id present → OAuth2 client-credentials grant
//!
//! Reads share a read lock; a refresh holds the write lock for the whole
//! token exchange so no caller observes a half-updated credential.

use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    errors::{AuthError, BoxError},
    models::credential::Credential,
    services::assertion::{AssertionClaims, AssertionSigner},
};

pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Invoked with the new credential after every successful refresh so the
/// caller can persist it.
pub type CredentialCallback = Box<dyn Fn(&Credential) -> Result<(), BoxError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    RefreshToken,
    ClientCredentials,
    SignedAssertion,
}

/// One way of asking the token endpoint for a new access token.
pub trait TokenGrant: Send + Sync {
    fn kind(&self) -> GrantKind;

    /// Form fields posted to the token endpoint.
    fn form(
        &self,
        credential: &Credential,
        token_url: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError>;
}

pub struct RefreshTokenGrant;

impl TokenGrant for RefreshTokenGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::RefreshToken
    }

    fn form(
        &self,
        credential: &Credential,
        _token_url: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Validation("refresh token missing".into()))?;
        Ok(vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
            ("client_id", credential.client_id.clone()),
            ("client_secret", credential.client_secret.clone()),
        ])
    }
}

pub struct ClientCredentialsGrant;

impl TokenGrant for ClientCredentialsGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::ClientCredentials
    }

    fn form(
        &self,
        credential: &Credential,
        _token_url: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let enterprise = credential
            .enterprise_id
            .clone()
            .ok_or_else(|| AuthError::Validation("enterprise id missing".into()))?;
        Ok(vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", credential.client_id.clone()),
            ("client_secret", credential.client_secret.clone()),
            ("box_subject_type", "enterprise".to_string()),
            ("box_subject_id", enterprise),
        ])
    }
}

pub struct SignedAssertionGrant {
    signer: AssertionSigner,
}

impl SignedAssertionGrant {
    pub fn new(signer: AssertionSigner) -> Self {
        Self { signer }
    }
}

impl TokenGrant for SignedAssertionGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::SignedAssertion
    }

    fn form(
        &self,
        credential: &Credential,
        token_url: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let enterprise = credential
            .enterprise_id
            .as_deref()
            .ok_or_else(|| AuthError::Validation("enterprise id missing".into()))?;
        let claims =
            AssertionClaims::new(&credential.client_id, enterprise, token_url, Utc::now());
        let assertion = self.signer.sign(&claims)?;
        Ok(vec![
            ("grant_type", JWT_BEARER_GRANT.to_string()),
            ("assertion", assertion),
            ("client_id", credential.client_id.clone()),
            ("client_secret", credential.client_secret.clone()),
        ])
    }
}

/// Pick the grant for a credential, validating the fields it needs.
pub fn select_grant(credential: &Credential) -> Result<Arc<dyn TokenGrant>, AuthError> {
    if credential.client_id.is_empty() {
        return Err(AuthError::Validation("client id is empty".into()));
    }
    if credential.has_refresh_token() {
        return Ok(Arc::new(RefreshTokenGrant));
    }
    if let Some(key) = &credential.service_key {
        if !credential.has_enterprise() {
            return Err(AuthError::Validation(
                "service key requires an enterprise id".into(),
            ));
        }
        let signer = AssertionSigner::from_service_key(key)?;
        return Ok(Arc::new(SignedAssertionGrant::new(signer)));
    }
    if credential.has_enterprise() {
        return Ok(Arc::new(ClientCredentialsGrant));
    }
    Err(AuthError::Validation(
        "credential has no refresh token, service key or enterprise id".into(),
    ))
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Token lifetime assumed when the endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

struct AuthState {
    credential: Credential,
    grant: Arc<dyn TokenGrant>,
}

pub struct Authenticator {
    http: Client,
    token_url: String,
    state: RwLock<AuthState>,
    on_update: Option<CredentialCallback>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        credential: Credential,
    ) -> Result<Self, AuthError> {
        let grant = select_grant(&credential)?;
        debug!(grant = ?grant.kind(), "authenticator configured");
        Ok(Self {
            http,
            token_url: token_url.into(),
            state: RwLock::new(AuthState { credential, grant }),
            on_update: None,
        })
    }

    pub fn with_update_callback(mut self, callback: CredentialCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    pub async fn access_token(&self) -> String {
        self.state.read().await.credential.access_token.clone()
    }

    pub async fn is_valid(&self) -> bool {
        self.state.read().await.credential.is_valid()
    }

    pub async fn credentials(&self) -> Credential {
        self.state.read().await.credential.clone()
    }

    pub async fn grant_kind(&self) -> GrantKind {
        self.state.read().await.grant.kind()
    }

    /// Replace the credential, re-selecting the grant it implies.
    pub async fn update_credentials(&self, credential: Credential) -> Result<(), AuthError> {
        let grant = select_grant(&credential)?;
        let mut state = self.state.write().await;
        state.credential = credential;
        state.grant = grant;
        Ok(())
    }

    /// Obtain a new access token with the configured grant.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        self.refresh_locked(&mut state).await
    }

    /// Refresh unless another caller already replaced `stale_token`.
    ///
    /// Concurrent requests that all hit a 401 with the same token end up
    /// performing one token exchange between them.
    pub async fn refresh_if_current(&self, stale_token: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if state.credential.access_token != stale_token && state.credential.is_valid() {
            debug!("token already refreshed by a concurrent caller");
            return Ok(());
        }
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut AuthState) -> Result<(), AuthError> {
        let form = state.grant.form(&state.credential, &self.token_url)?;
        debug!(grant = ?state.grant.kind(), "requesting access token");

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(AuthError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "token endpoint rejected grant");
            return Err(AuthError::Rejected { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access token".into()));
        }

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let credential = &mut state.credential;
        credential.access_token = token.access_token;
        credential.expires_at = Some(Utc::now() + Duration::seconds(lifetime));
        if let Some(refresh_token) = token.refresh_token.filter(|t| !t.is_empty()) {
            credential.refresh_token = Some(refresh_token);
        }
        if token.scope.is_some() {
            credential.scope = token.scope;
        }
        info!(expires_in = lifetime, "access token refreshed");

        if let Some(callback) = &self.on_update {
            callback(credential).map_err(AuthError::Persist)?;
        }
        Ok(())
    }
}
