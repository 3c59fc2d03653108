//! Accounts: signup, profile and user search.

pub mod profile;
pub mod registration;

use axum::http::StatusCode;

use crate::db::StoreError;

/// Display names are 2 to 50 characters after trimming.
const NAME_LEN: std::ops::RangeInclusive<usize> = 2..=50;
const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 8..=128;
const MAX_EMAIL_LEN: usize = 254;

/// Log a persistence failure and hide it behind a 500.
pub(crate) fn store_failure(err: StoreError) -> (StatusCode, String) {
    match err {
        StoreError::EmailTaken => (StatusCode::CONFLICT, "Email already registered".to_string()),
        err => {
            tracing::error!(error = %err, "Store operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

/// Trimmed, lowercased email, or `None` when it is not shaped like one.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return None;
    }
    let (local, domain) = email.split_once('@')?;
    let domain_ok = domain.contains('.')
        && !domain.contains('@')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    (!local.is_empty() && domain_ok).then_some(email)
}

/// Trimmed display name, if its length is acceptable.
pub fn normalize_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    NAME_LEN
        .contains(&name.chars().count())
        .then(|| name.to_string())
}

pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if PASSWORD_LEN.contains(&password.chars().count()) {
        Ok(())
    } else {
        Err("Password must be between 8 and 128 characters")
    }
}
