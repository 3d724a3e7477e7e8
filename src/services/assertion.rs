//! Signed assertions for the JWT-bearer grant.
//!
//! A service identity authenticates without user interaction by posting a
//! short-lived RS256 JWT signed with its registered private key.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ring::{
    rand::SystemRandom,
    signature::{RSA_PKCS1_SHA256, RsaKeyPair},
};
use rustls_pemfile::Item;
use serde::Serialize;
use uuid::Uuid;

use crate::{errors::AuthError, models::credential::ServiceKey};

/// Lifetime of an assertion; the token endpoint rejects long-lived ones.
pub const ASSERTION_LIFETIME_SECS: i64 = 60;

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    kid: &'a str,
}

/// Claims of the assertion.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AssertionClaims {
    /// Client id.
    pub iss: String,
    /// Enterprise id the service acts for.
    pub sub: String,
    pub box_sub_type: String,
    /// Token endpoint URL.
    pub aud: String,
    /// Unique nonce so the endpoint can reject replays.
    pub jti: String,
    pub exp: i64,
}

impl AssertionClaims {
    pub fn new(client_id: &str, enterprise_id: &str, audience: &str, now: DateTime<Utc>) -> Self {
        Self {
            iss: client_id.to_string(),
            sub: enterprise_id.to_string(),
            box_sub_type: "enterprise".to_string(),
            aud: audience.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        }
    }
}

/// Holds the parsed service key and signs assertions with it.
pub struct AssertionSigner {
    key_id: String,
    key_pair: RsaKeyPair,
    random: SystemRandom,
}

impl std::fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl AssertionSigner {
    pub fn from_service_key(key: &ServiceKey) -> Result<Self, AuthError> {
        Ok(Self {
            key_id: key.key_id.clone(),
            key_pair: decode_first_rsa_key(&key.private_key_pem)?,
            random: SystemRandom::new(),
        })
    }

    /// DER-encoded `RSAPublicKey` of the signing key.
    pub fn public_key_der(&self) -> &[u8] {
        self.key_pair.public().as_ref()
    }

    /// Produce `header.payload.signature`.
    pub fn sign(&self, claims: &AssertionClaims) -> Result<String, AuthError> {
        let header = b64_encode_obj(&JwtHeader {
            alg: "RS256",
            typ: "JWT",
            kid: &self.key_id,
        })?;
        let payload = b64_encode_obj(claims)?;
        let message = format!("{header}.{payload}");

        let mut signature = vec![0; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &RSA_PKCS1_SHA256,
                &self.random,
                message.as_bytes(),
                &mut signature,
            )
            .map_err(|_| AuthError::Signing("RSA signing failed".into()))?;

        Ok(format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}

fn decode_first_rsa_key(pem: &str) -> Result<RsaKeyPair, AuthError> {
    let mut reader = pem.as_bytes();
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::Pkcs8Key(key))) => {
                return RsaKeyPair::from_pkcs8(key.secret_pkcs8_der())
                    .map_err(|e| AuthError::Validation(format!("invalid RSA key: {e}")));
            }
            Ok(Some(Item::Pkcs1Key(key))) => {
                return RsaKeyPair::from_der(key.secret_pkcs1_der())
                    .map_err(|e| AuthError::Validation(format!("invalid RSA key: {e}")));
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                return Err(AuthError::Validation(
                    "no RSA private key found in PEM".into(),
                ));
            }
            Err(e) => return Err(AuthError::Validation(format!("unreadable PEM: {e}"))),
        }
    }
}

fn b64_encode_obj<T: Serialize>(obj: &T) -> Result<String, AuthError> {
    let json = serde_json::to_vec(obj).map_err(|e| AuthError::Signing(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}
