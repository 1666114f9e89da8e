//! Credentials and session tokens
//!
//! - `password`: argon2 hashing for stored user passwords
//! - `secret`: the token signing secret kept in the `metas` collection
//! - `token`: HS256 session tokens carrying the user id

pub mod password;
pub mod secret;
pub mod token;

pub use password::{hash_password, verify_password};
pub use secret::{generate_secret, SecretStore};
pub use token::{issue_token, verify_token, SessionClaims, TokenLifetime};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown login, wrong password or unreadable stored hash
    InvalidCredentials,
    HashingFailed,
    TokenGenerationFailed,
    TokenExpired,
    /// Bad signature, wrong algorithm or malformed token
    InvalidToken,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "invalid credentials"),
            AuthError::HashingFailed => write!(f, "password hashing failed"),
            AuthError::TokenGenerationFailed => write!(f, "token generation failed"),
            AuthError::TokenExpired => write!(f, "token expired"),
            AuthError::InvalidToken => write!(f, "invalid token"),
        }
    }
}

impl std::error::Error for AuthError {}

pub type AuthResult<T> = Result<T, AuthError>;
