//! Caller identity port.

/// Claims carried by a validated access token.
#[derive(Debug, Clone)]
pub struct TokenClaims {
    /// Id of the authenticated user.
    pub subject: String,
    pub exp: i64,
}

/// Token service trait - validates bearer tokens presented by callers.
pub trait TokenService: Send + Sync {
    /// Issue an access token for a user.
    fn generate_token(&self, subject: &str) -> Result<String, AuthError>;

    /// Validate and decode a token.
    fn validate_token(&self, token: &str) -> Result<TokenClaims, AuthError>;
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token generation failed: {0}")]
    Generation(String),
}
