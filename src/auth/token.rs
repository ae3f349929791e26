use super::AuthError;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    /// Credential token version at issue time; bumped by revocation
    #[serde(default)]
    pub ver: u32,
}

/// Mints and verifies HS256 access tokens
#[derive(Clone)]
pub struct TokenSigner {
    key: Hmac<Sha256>,
    lifetime: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, lifetime_secs: i64) -> Result<Self, AuthError> {
        let key = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| AuthError::server_error(format!("Invalid signing key: {}", e)))?;
        Ok(Self {
            key,
            lifetime: Duration::seconds(lifetime_secs),
        })
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn mint(&self, user_id: &str, email: &str, version: u32) -> Result<String, AuthError> {
        self.mint_at(user_id, email, version, Utc::now())
    }

    pub fn mint_at(
        &self,
        user_id: &str,
        email: &str,
        version: u32,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = TokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.lifetime).timestamp(),
            ver: version,
        };
        claims
            .sign_with_key(&self.key)
            .map_err(|e| AuthError::server_error(format!("Failed to sign token: {}", e)))
    }

    /// Check the signature and expiry
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let claims: TokenClaims = token
            .verify_with_key(&self.key)
            .map_err(|_| AuthError::invalid_token())?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::expired_token());
        }
        Ok(claims)
    }
}

/// Token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
