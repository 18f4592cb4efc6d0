//! `OAuth2` token types.
//!
//! [`Token`] is what the provider hands back, [`TokenRecord`] is the only
//! thing written to disk, and [`SessionCredential`] is the in-memory view a
//! session works from.

use crate::error::{EndpointError, Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds before the real expiry at which a token is treated as expired.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Value of the `type` field of a persisted record.
pub const AUTHORIZED_USER: &str = "authorized_user";

/// `OAuth2` access token with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Access token string.
    pub access_token: String,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// Expiration time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Refresh token for obtaining new access tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope granted by authorization server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Token {
    /// Creates a token from a token endpoint response.
    #[must_use]
    pub fn from_response(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(i64::from(secs)));

        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            scope: response.scope,
        }
    }
}

/// Expired, or within the buffer of expiring.
fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|exp| Utc::now() + Duration::seconds(EXPIRY_BUFFER_SECS) >= exp)
}

/// Token response from the `OAuth2` server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u32>,
    /// Refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error response from the `OAuth2` server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an endpoint error.
    #[must_use]
    pub fn into_error(self) -> EndpointError {
        EndpointError::Provider {
            error: self.error,
            description: self.error_description,
        }
    }
}

/// Persisted refresh-token record.
///
/// Serialized as
/// `{"type":"authorized_user","clientId":…,"clientSecret":…,"refreshToken":…}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Record type, always `authorized_user`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Client id the refresh token was issued to.
    pub client_id: String,
    /// Matching client secret.
    pub client_secret: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
}

impl TokenRecord {
    /// Creates an `authorized_user` record.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            kind: AUTHORIZED_USER.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// In-memory credential held by a session. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    /// Long-lived refresh token.
    pub refresh_token: String,
    /// Current access token, if one has been minted.
    pub access_token: Option<String>,
    /// Expiry of `access_token`.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionCredential {
    /// Creates a credential that has not minted an access token yet.
    #[must_use]
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            access_token: None,
            expires_at: None,
        }
    }

    /// Builds a credential from a token response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRefreshToken`] if the token carries none.
    pub fn from_token(token: Token) -> Result<Self> {
        let refresh_token = token.refresh_token.ok_or(Error::MissingRefreshToken)?;
        Ok(Self {
            refresh_token,
            access_token: Some(token.access_token),
            expires_at: token.expires_at,
        })
    }

    /// Replaces the access token with a freshly minted one.
    ///
    /// A rotated refresh token replaces the stored one.
    pub fn apply(&mut self, token: Token) {
        if let Some(refresh) = token.refresh_token {
            self.refresh_token = refresh;
        }
        self.access_token = Some(token.access_token);
        self.expires_at = token.expires_at;
    }

    /// True when there is no usable access token.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.access_token.is_none() || is_expired(self.expires_at)
    }
}
