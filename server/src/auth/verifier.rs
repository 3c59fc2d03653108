//! Credential lookup for the socket upgrade.

use axum::http::{header, HeaderMap};

use super::{jwt, AuthError};
use crate::ws::protocol::UserId;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Maps a request credential to a user identity.
pub trait IdentityVerifier: Send + Sync {
    /// `query_token` is the `?token=` parameter, used by browser clients that
    /// cannot set headers on a WebSocket handshake.
    fn extract_identity(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<UserId, AuthError>;
}

/// Verifies HS256 access tokens issued by [`jwt::issue_access_token`].
pub struct JwtVerifier {
    secret: Vec<u8>,
}

impl JwtVerifier {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn extract_identity(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<UserId, AuthError> {
        let token = credential_from_headers(headers)
            .or_else(|| query_token.filter(|t| !t.is_empty()).map(str::to_string))
            .ok_or(AuthError::MissingCredential)?;

        let claims = jwt::validate_access_token(&self.secret, &token)?;
        Ok(claims.sub)
    }
}

/// Bearer token from `Authorization`, falling back to the access_token cookie.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    cookie_value(headers, ACCESS_TOKEN_COOKIE)
}

/// Value of the first non-empty cookie called `name`.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
