//! # Access Control
//!
//! Bearer-token authentication against the users listed in `[[auth.users]]`.
//! Tokens are never stored; each user carries the SHA-256 of theirs.

use crate::config::UserConfig;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// The authenticated caller, attached to the request as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

pub struct AuthLayer {
    users: Vec<UserConfig>,
}

impl AuthLayer {
    pub fn new(users: &[UserConfig]) -> Self {
        let users = users
            .iter()
            .map(|u| UserConfig {
                username: u.username.clone(),
                token_sha256: u.token_sha256.trim().to_ascii_lowercase(),
            })
            .collect();
        Self { users }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Resolve a raw bearer token to its user.
    pub fn authenticate(&self, token: &str) -> Option<Principal> {
        let hash = sha256_hex(token);
        self.users
            .iter()
            .find(|u| constant_time_eq(&u.token_sha256, &hash))
            .map(|u| Principal {
                username: u.username.clone(),
            })
    }
}

/// The token from an `Authorization: Bearer <token>` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

pub async fn auth_middleware(
    State(auth): State<Arc<AuthLayer>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path().to_string();

    let Some(token) = bearer_token(req.headers()) else {
        tracing::warn!("Missing bearer token for {}", path);
        return Err(StatusCode::FORBIDDEN);
    };

    match auth.authenticate(token) {
        Some(principal) => {
            req.extensions_mut().insert(principal);
            Ok(next.run(req).await)
        }
        None => {
            tracing::warn!("Invalid bearer token for {}", path);
            Err(StatusCode::FORBIDDEN)
        }
    }
}

pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{:x}", digest)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
