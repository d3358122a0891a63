//! Token authentication interface.

use std::collections::HashMap;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is malformed or its signature does not verify.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token does not name a subject.
    #[error("Token has no subject")]
    MissingSubject,
}

/// Resolves a bearer token to a user identity.
pub trait Authenticator: Send + Sync {
    /// Authenticate a token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not valid.
    fn authenticate(&self, token: &str) -> Result<String, AuthError>;
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token for an identity.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }
}
