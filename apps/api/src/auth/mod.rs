//! Token verification and role checks.
//!
//! Sign-in happens at the OAuth gateway, which issues an HS256 token. The API
//! only verifies that token and maps its subject onto a persisted user row;
//! the row's role drives every authorization decision.

pub mod extractors;
pub mod handlers;

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use extractors::{AuthUser, Identity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject issued by the identity provider; stored as `users.external_id`.
    pub sub: String,
    pub email: String,
    pub name: String,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Extracts the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|auth| {
            let (scheme, token) = auth.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty())
}

pub fn decode_claims(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}
