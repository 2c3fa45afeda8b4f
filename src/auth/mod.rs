//! Admin authentication.
//!
//! Provides:
//! - Credential stores (fixed pair from config, or an SQLite `admins` table)
//! - Password hashing with argon2id
//! - Stateless HS256 session tokens with a fixed lifetime
//! - Request verification from the session cookie or a bearer header
//!
//! There is no revocation list. Logging out only clears the cookie; a copied
//! token remains valid until it expires.

pub mod password;
pub mod session;
pub mod store;
pub mod token;

pub use session::{IssuedSession, SessionIssuer, SessionVerifier};
pub use store::{
    Credential, CredentialStore, SqliteCredentialStore, StaticCredentialStore, ADMIN_ROLE,
};
pub use token::{Claims, TokenCodec};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No token in the cookie or `Authorization` header.
    #[error("Authentication token required")]
    MissingCredential,

    /// A token was present but its signature, shape or expiry is wrong.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// Unknown identifier or wrong password; deliberately not told apart.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Authentication failed")]
    Internal,
}

impl AuthError {
    /// Stable machine-readable code for response bodies.
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidToken => "invalid_token",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Forbidden => "forbidden",
            Self::Internal => "auth_failure",
        }
    }
}
