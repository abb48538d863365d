//! Bearer-token verification for socket handshakes and REST calls.
//!
//! Tokens are HS256 JWTs issued by the marketplace auth service. The
//! gateway only verifies them; it never issues tokens in production
//! ([`issue_token`] exists for tests and local development).

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trocchat_proto::model::UserId;

/// Errors produced while authenticating a connection or request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is missing, malformed, expired, or has a bad signature.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token is valid but does not authorize the claimed user id.
    #[error("token subject does not match claimed user id")]
    ClaimedIdMismatch,
}

/// JWT claims carried by marketplace bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated user id.
    pub sub: Uuid,
    /// Display name, used for typing banners.
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry as seconds since the UNIX epoch.
    pub exp: u64,
}

/// Verifies bearer tokens against the shared HS256 secret.
///
/// Constructed once at server start and injected wherever authentication
/// happens (socket handshake, REST routes).
pub struct TokenVerifier {
    key: DecodingKey,
}

impl TokenVerifier {
    /// Creates a verifier from the shared secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Verifies a token and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for a malformed, expired, or
    /// badly-signed token.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &Validation::default())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(data.claims)
    }

    /// Verifies a token and checks that it authorizes the claimed user id.
    ///
    /// Used during the socket handshake, where the client states which
    /// user it is connecting as.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for a bad token, or
    /// [`AuthError::ClaimedIdMismatch`] if the subject differs from the
    /// claimed id.
    pub fn verify_claimed(&self, token: &str, claimed: UserId) -> Result<Claims, AuthError> {
        let claims = self.verify(token)?;
        if claims.sub != *claimed.as_uuid() {
            return Err(AuthError::ClaimedIdMismatch);
        }
        Ok(claims)
    }
}

/// Issues a short-lived token for a user. Test/dev helper only.
///
/// # Errors
///
/// Returns [`AuthError::InvalidToken`] if signing fails.
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    name: Option<&str>,
    ttl_secs: u64,
) -> Result<String, AuthError> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let claims = Claims {
        sub: *user_id.as_uuid(),
        name: name.map(ToString::to_string),
        exp: now + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::InvalidToken(e.to_string()))
}
