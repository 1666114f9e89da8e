use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthError, AuthResult};

/// Session length requested at login
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenLifetime {
    #[default]
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1m")]
    OneMinute,
}

impl TokenLifetime {
    pub fn duration(&self) -> Duration {
        match self {
            TokenLifetime::OneDay => Duration::days(1),
            TokenLifetime::OneMinute => Duration::minutes(1),
        }
    }
}

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User document id
    #[serde(rename = "_id")]
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Sign a session token for `user_id` with `secret`
pub fn issue_token(secret: &str, user_id: &str, lifetime: TokenLifetime) -> AuthResult<String> {
    let now = Utc::now();
    let claims = SessionClaims {
        user_id: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + lifetime.duration()).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AuthError::TokenGenerationFailed)
}

/// Validate a session token against `secret` and return its claims
pub fn verify_token(secret: &str, token: &str) -> AuthResult<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    if data.claims.user_id.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok(data.claims)
}
