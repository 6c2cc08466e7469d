//! Credential resolution errors.

use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {status} {body}")]
    TokenRequest { status: u16, body: String },

    #[error("token response invalid: {0}")]
    InvalidTokenResponse(String),

    #[error("auth config has no token_url")]
    MissingTokenUrl,

    #[error("vault lookup for '{name}' failed: {message}")]
    Vault { name: String, message: String },

    #[error("invalid auth header: {0}")]
    InvalidHeader(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
