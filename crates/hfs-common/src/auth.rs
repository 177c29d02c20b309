//! ---
//! hfs_section: "01-shared"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Auth token resolution seam consumed by the harness."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::fmt;

use thiserror::Error;

pub const ENV_TOKEN: &str = "KB_AUTH_TOKEN";
pub const ENV_USER: &str = "KB_AUTH_USER";
const DEFAULT_USER: &str = "harness-admin";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("environment variable {0} is not set")]
    MissingToken(&'static str),
    #[error("token rejected: {0}")]
    Rejected(String),
}

/// A validated token together with the user it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    user_name: String,
    token: String,
}

impl AuthToken {
    pub fn new(user_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            token: token.into(),
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("user_name", &self.user_name)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Turns a raw token string into an [`AuthToken`].
pub trait TokenValidator: Send + Sync {
    fn validate(&self, raw: &str) -> Result<AuthToken, AuthError>;

    /// Validate the token held in `KB_AUTH_TOKEN`.
    fn validate_env(&self) -> Result<AuthToken, AuthError> {
        let raw = std::env::var(ENV_TOKEN).map_err(|_| AuthError::MissingToken(ENV_TOKEN))?;
        self.validate(&raw)
    }
}

/// Accepts any non-empty token. The user name is taken from `KB_AUTH_USER`
/// or, when that is unset, from the configured default.
#[derive(Debug, Clone)]
pub struct UnverifiedTokenValidator {
    user_name: String,
}

impl UnverifiedTokenValidator {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
        }
    }

    pub fn from_env() -> Self {
        let user = std::env::var(ENV_USER)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_owned());
        Self::new(user)
    }
}

impl Default for UnverifiedTokenValidator {
    fn default() -> Self {
        Self::new(DEFAULT_USER)
    }
}

impl TokenValidator for UnverifiedTokenValidator {
    fn validate(&self, raw: &str) -> Result<AuthToken, AuthError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(AuthError::Rejected("token is empty".into()));
        }
        Ok(AuthToken::new(self.user_name.clone(), token))
    }
}
