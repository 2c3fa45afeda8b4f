//! Signed session tokens (HS256 JWT).
//!
//! Tokens are stateless: nothing is stored server-side, so a token stays
//! valid until its `exp` passes.

use super::AuthError;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the credential identifier.
    pub sub: String,
    pub role: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
}

/// Signs and verifies session tokens with one shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Sign a token issued now.
    pub fn issue(&self, subject: &str, role: &str) -> Result<(String, Claims), AuthError> {
        self.issue_at(subject, role, Utc::now().timestamp())
    }

    /// Sign a token with an explicit issue time.
    pub fn issue_at(
        &self,
        subject: &str,
        role: &str,
        issued_at: i64,
    ) -> Result<(String, Claims), AuthError> {
        let claims = Claims {
            sub: subject.to_string(),
            role: role.to_string(),
            iat: issued_at,
            exp: issued_at.saturating_add(self.ttl_secs),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!("Token signing failed: {e}");
            AuthError::Internal
        })?;
        Ok((token, claims))
    }

    /// Verify signature, structure and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => tracing::debug!("Rejected expired token"),
                    kind => tracing::debug!(?kind, "Rejected token"),
                }
                Err(AuthError::InvalidToken)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-unit-test-secret";

    #[test]
    fn issued_token_verifies_with_ttl_applied() {
        let codec = TokenCodec::new(SECRET, 3600);
        let (token, claims) = codec.issue("admin", "admin").unwrap();

        assert_eq!(claims.exp - claims.iat, 3600);
        let decoded = codec.verify(&token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn eight_hour_ttl_is_honoured() {
        let codec = TokenCodec::new(SECRET, 8 * 3600);
        let (_, claims) = codec.issue("admin", "admin").unwrap();
        assert_eq!(claims.exp - claims.iat, 28_800);
    }

    #[test]
    fn expired_token_is_invalid() {
        let codec = TokenCodec::new(SECRET, 60);
        let long_ago = Utc::now().timestamp() - 3600;
        let (token, _) = codec.issue_at("admin", "admin", long_ago).unwrap();
        assert_eq!(codec.verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn token_from_other_secret_is_invalid() {
        let ours = TokenCodec::new(SECRET, 60);
        let theirs = TokenCodec::new("some-other-secret-entirely-000000", 60);
        let (token, _) = theirs.issue("admin", "admin").unwrap();
        assert_eq!(ours.verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn garbage_and_tampered_tokens_are_invalid() {
        let codec = TokenCodec::new(SECRET, 60);
        assert_eq!(codec.verify("not.a.jwt"), Err(AuthError::InvalidToken));
        assert_eq!(codec.verify(""), Err(AuthError::InvalidToken));

        let (token, _) = codec.issue("admin", "admin").unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert_eq!(codec.verify(&tampered), Err(AuthError::InvalidToken));
    }

    #[test]
    fn debug_output_hides_keys() {
        let codec = TokenCodec::new(SECRET, 60);
        let rendered = format!("{codec:?}");
        assert!(!rendered.contains(SECRET));
    }
}
