use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Claims carried by the identity token, keyed by claim type.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Tokens returned by a code exchange or a renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            id_token: None,
            expires_at,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn will_expire_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now + window >= self.expires_at
    }
}

/// Successful outcome of an authorization code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginSuccess {
    pub tokens: TokenSet,
    pub claims: Claims,
}

impl LoginSuccess {
    pub fn new(tokens: TokenSet, claims: Claims) -> Self {
        Self { tokens, claims }
    }

    /// Value of a string claim such as `sub` or `email`.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(|value| value.as_str())
    }
}

/// Error half of a [`LoginResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginError {
    pub code: String,
    pub description: String,
}

impl std::fmt::Display for LoginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.code, self.description)
    }
}

/// Result of one login attempt as delivered to the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginResult {
    Success(LoginSuccess),
    Error(LoginError),
}

impl LoginResult {
    pub fn error(code: impl Into<String>, description: impl Into<String>) -> Self {
        LoginResult::Error(LoginError {
            code: code.into(),
            description: description.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LoginResult::Error(_))
    }

    pub fn success(&self) -> Option<&LoginSuccess> {
        match self {
            LoginResult::Success(success) => Some(success),
            LoginResult::Error(_) => None,
        }
    }
}

/// Access token and expiry published together by the refresher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenSnapshot {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}
