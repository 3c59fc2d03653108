pub mod jwt;
pub mod middleware;
pub mod password;
pub mod session;
pub mod verifier;

pub use verifier::{IdentityVerifier, JwtVerifier};

/// Why a credential could not be turned into a user identity.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no authentication token provided")]
    MissingCredential,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    InvalidToken(jsonwebtoken::errors::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(argon2::password_hash::Error),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(err),
        }
    }
}
