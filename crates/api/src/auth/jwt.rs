//! Signed session tokens (HS256 JWT)
//!
//! A token carries only the principal id, its role and the issue/expiry
//! timestamps. The HMAC covers the whole payload, so the role cannot be edited
//! client-side. Verification is stateless: no credential-store round trip.

use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::Role;

/// Default session lifetime
pub const DEFAULT_SESSION_TTL: Duration = Duration::days(7);

/// Minimum signing key length accepted at boot
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Principal id
    pub sub: Uuid,
    pub role: Role,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

/// An issued token together with the claims it encodes
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub claims: Claims,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for a principal, valid for the configured lifetime from now
    pub fn issue(&self, principal_id: Uuid, role: Role) -> Result<SessionToken, TokenError> {
        self.issue_at(principal_id, role, OffsetDateTime::now_utc())
    }

    /// Issue a token as if it had been created at `issued_at`
    pub fn issue_at(
        &self,
        principal_id: Uuid,
        role: Role,
        issued_at: OffsetDateTime,
    ) -> Result<SessionToken, TokenError> {
        let claims = Claims {
            sub: principal_id,
            role,
            iat: issued_at.unix_timestamp(),
            exp: (issued_at + self.ttl).unix_timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(SessionToken { token, claims })
    }

    /// Check signature and expiry and return the embedded claims.
    ///
    /// The signature is checked before anything in the payload is trusted, so a
    /// tampered token reports `InvalidSignature` even if it is also expired.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        // A token whose header cannot be read is not a token at all
        decode_header(token).map_err(|_| TokenError::Malformed)?;

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;

        // Clock source is the system clock; exp == now is still valid
        if OffsetDateTime::now_utc().unix_timestamp() > data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}
