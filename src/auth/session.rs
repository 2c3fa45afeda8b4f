//! Login (credential check, then sign) and request verification.

use super::password::{verify_against_dummy, verify_password};
use super::store::{CredentialStore, ADMIN_ROLE};
use super::token::{Claims, TokenCodec};
use super::AuthError;
use axum::http::{header, HeaderMap};
use chrono::Utc;
use std::sync::Arc;

/// A freshly signed session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: Claims,
}

/// Validates submitted credentials and issues signed tokens.
#[derive(Clone)]
pub struct SessionIssuer {
    store: Arc<dyn CredentialStore>,
    codec: TokenCodec,
}

impl SessionIssuer {
    pub fn new(store: Arc<dyn CredentialStore>, codec: TokenCodec) -> Self {
        Self { store, codec }
    }

    pub fn token_ttl_secs(&self) -> i64 {
        self.codec.ttl_secs()
    }

    /// Check `identifier` / `password` and sign a token on success.
    ///
    /// Unknown identifiers and wrong passwords produce the same error.
    pub fn login(&self, identifier: &str, password: &str) -> Result<IssuedSession, AuthError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || password.is_empty() {
            verify_against_dummy(password);
            return Err(AuthError::InvalidCredentials);
        }

        let credential = self.store.find(identifier).map_err(|e| {
            tracing::error!("Credential lookup failed: {e:#}");
            AuthError::Internal
        })?;

        let Some(credential) = credential else {
            verify_against_dummy(password);
            tracing::info!("Login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        let matches = verify_password(password, &credential.secret_hash).map_err(|e| {
            tracing::error!(identifier = %credential.identifier, "{e:#}");
            AuthError::Internal
        })?;
        if !matches {
            tracing::info!("Login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let (token, claims) = self.codec.issue(&credential.identifier, &credential.role)?;

        if let Err(e) = self.store.record_login(&credential.identifier, Utc::now()) {
            tracing::warn!(identifier = %credential.identifier, "Failed to record login: {e:#}");
        }
        tracing::info!(identifier = %credential.identifier, exp = claims.exp, "Admin logged in");

        Ok(IssuedSession { token, claims })
    }
}

/// Extracts and verifies the session token carried by a request.
#[derive(Clone, Debug)]
pub struct SessionVerifier {
    codec: TokenCodec,
    cookie_name: String,
}

impl SessionVerifier {
    pub fn new(codec: TokenCodec, cookie_name: &str) -> Self {
        Self {
            codec,
            cookie_name: cookie_name.to_string(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Verify the token in the session cookie or `Authorization` header.
    ///
    /// `MissingCredential` when neither carries a token; `InvalidToken`
    /// for anything present that fails verification, including expiry.
    pub fn verify_request(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let token = extract_cookie(headers, &self.cookie_name)
            .or_else(|| extract_bearer_token(headers))
            .ok_or(AuthError::MissingCredential)?;
        self.codec.verify(token)
    }

    /// As [`verify_request`](Self::verify_request), additionally requiring the admin role.
    pub fn require_admin(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let claims = self.verify_request(headers)?;
        if claims.role != ADMIN_ROLE {
            tracing::info!(subject = %claims.sub, role = %claims.role, "Non-admin token refused");
            return Err(AuthError::Forbidden);
        }
        Ok(claims)
    }
}

/// Extract bearer token from Authorization header. The scheme is matched
/// case-insensitively.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?
        .trim_start();
    let (scheme, token) = value.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

/// Find a cookie value by name across all `Cookie` headers.
pub fn extract_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(name: &str, token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie =
        format!("{name}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie(name: &str, secure: bool) -> String {
    session_cookie(name, "", 0, secure)
}
