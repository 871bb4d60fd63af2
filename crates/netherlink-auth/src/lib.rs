//! Bearer-token verification for relay logins.
//!
//! Tokens are HS256 JWTs carrying `{uid, iss, exp}`, the same claims the
//! account service signs at HTTP login.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use netherlink_core::ids::UserId;

/// Why a credential was refused.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token does not belong to {claimed}")]
    UidMismatch { claimed: String },
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid(e.to_string()),
        }
    }
}

/// Verifies a login credential and yields the authenticated user.
pub trait TokenVerifier: Send + Sync {
    /// `claimed_uid` is the uid the client says it is; the token must agree.
    fn verify(&self, claimed_uid: &str, token: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    uid: String,
    iss: String,
    exp: i64,
}

/// HMAC-SHA256 JWT signer and verifier sharing one secret.
#[derive(Clone)]
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl JwtAuth {
    pub fn new(secret: &str, issuer: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: issuer.to_owned(),
            ttl,
        }
    }

    /// Sign a token for `uid` valid for the configured ttl.
    pub fn issue(&self, uid: &UserId) -> Result<String, AuthError> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX / 2);
        self.issue_with_expiry(uid, Utc::now().timestamp().saturating_add(ttl))
    }

    fn issue_with_expiry(&self, uid: &UserId, exp: i64) -> Result<String, AuthError> {
        let claims = Claims {
            uid: uid.as_str().to_owned(),
            iss: self.issuer.clone(),
            exp,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

impl TokenVerifier for JwtAuth {
    fn verify(&self, claimed_uid: &str, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() || claimed_uid.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)?;
        if data.claims.uid != claimed_uid {
            debug!(claimed = claimed_uid, "token uid mismatch");
            return Err(AuthError::UidMismatch {
                claimed: claimed_uid.to_owned(),
            });
        }
        Ok(UserId::from_raw(data.claims.uid))
    }
}
