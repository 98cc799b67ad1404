//! # Query Grammar Validator
//!
//! Rejects malformed and injection-shaped query strings before any
//! conversion happens. Rules run in a fixed order and the first failing
//! rule decides the error.
//!
//! The denylist is a plain substring scan over the whole lower-cased query.
//! It does not know where the field ends and the value begins, so a value
//! such as `selectron` is rejected as well.

use crate::query::ValidatedQuery;

pub const MIN_QUERY_LEN: usize = 3;
pub const MAX_QUERY_LEN: usize = 50;

/// Substrings that are never allowed anywhere in a query.
pub const FORBIDDEN_PATTERNS: &[&str] = &[
    ";", "--", "/*", "*/", "union", "select", "drop", "delete", "update", "insert", "exec",
    "execute", "declare", "create",
];

/// Field names a query may target (compared lower-cased).
pub const ALLOWED_FIELDS: &[&str] = &["hostname", "ip"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Query cannot be empty")]
    EmptyQuery,

    #[error("Query must be at least 3 characters long")]
    TooShort,

    #[error("Query must be at most 50 characters long")]
    TooLong,

    #[error("Query contains forbidden pattern: {0}")]
    ForbiddenPattern(&'static str),

    #[error("Invalid field name: {0}. Allowed fields are: hostname, ip")]
    InvalidField(String),
}

/// Validate a raw query string.
///
/// Lengths are counted in characters after trimming. On success the
/// trimmed string is returned untouched.
pub fn validate(raw: &str) -> Result<ValidatedQuery, ValidationError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();

    if len == 0 {
        return Err(ValidationError::EmptyQuery);
    }
    if len < MIN_QUERY_LEN {
        return Err(ValidationError::TooShort);
    }
    if len > MAX_QUERY_LEN {
        return Err(ValidationError::TooLong);
    }

    let lowered = trimmed.to_lowercase();
    if let Some(pattern) = FORBIDDEN_PATTERNS.iter().copied().find(|p| lowered.contains(*p)) {
        return Err(ValidationError::ForbiddenPattern(pattern));
    }

    // Text before the first '=' (or the whole query when there is none).
    let field = lowered
        .split_once('=')
        .map_or(lowered.as_str(), |(field, _)| field)
        .trim();
    if !is_allowed_field(field) {
        return Err(ValidationError::InvalidField(field.to_string()));
    }

    Ok(ValidatedQuery::new(trimmed))
}

pub fn is_allowed_field(name: &str) -> bool {
    let name = name.to_lowercase();
    ALLOWED_FIELDS.contains(&name.as_str())
}
