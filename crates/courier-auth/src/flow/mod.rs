//! `OAuth2` authorization flow and token endpoint calls.

mod callback;
mod code;

pub use callback::CALLBACK_PATH;
pub use code::{AuthorizationFlow, FlowState};

use crate::error::EndpointError;
use crate::provider::Provider;
use crate::token::{ErrorResponse, Token, TokenResponse};
use reqwest::{Client, Response};
use std::collections::HashMap;
use tracing::debug;

/// Result of a call against a provider endpoint.
pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

/// Common `OAuth2` client configuration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Client secret (optional for public clients).
    pub client_secret: Option<String>,
    /// Provider configuration.
    pub provider: Provider,
    /// HTTP client.
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            provider,
            http_client: Client::new(),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Shares an existing HTTP client (connection pool).
    #[must_use]
    pub fn with_http_client(mut self, http_client: Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Mints a new access token from a refresh token.
    ///
    /// The returned token carries `refresh_token` even when the provider
    /// did not rotate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the provider rejects the token.
    pub async fn refresh_token(&self, refresh_token: &str) -> EndpointResult<Token> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &self.client_id);

        if let Some(secret) = &self.client_secret {
            params.insert("client_secret", secret);
        }

        debug!(provider = %self.provider.name, "Refreshing access token");
        let mut token = self.post_token(&params).await?;

        // Preserve refresh token if not returned
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// `redirect_uri` must be exactly the one sent in the authorization URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> EndpointResult<Token> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", &self.client_id);
        params.insert("redirect_uri", redirect_uri);

        if let Some(secret) = &self.client_secret {
            params.insert("client_secret", secret);
        }

        debug!(provider = %self.provider.name, "Exchanging authorization code");
        self.post_token(&params).await
    }

    /// Revokes a token at the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider has no revocation endpoint or the
    /// request fails.
    pub async fn revoke_token(&self, token: &str) -> EndpointResult<()> {
        let Some(url) = self.provider.revoke_url.clone() else {
            return Err(EndpointError::InvalidResponse(format!(
                "provider {} has no revocation endpoint",
                self.provider.name
            )));
        };

        let response = self
            .http_client
            .post(url)
            .form(&[("token", token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }

    async fn post_token(&self, params: &HashMap<&str, &str>) -> EndpointResult<Token> {
        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await?;
        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| EndpointError::InvalidResponse(e.to_string()))?;
        Ok(Token::from_response(token_response))
    }
}

/// Turns a non-2xx response into an error, falling back to the status
/// when the body is not an `OAuth2` error document.
async fn error_from_response(response: Response) -> EndpointError {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return EndpointError::Http(e),
    };

    serde_json::from_str::<ErrorResponse>(&body).map_or_else(
        |_| EndpointError::Provider {
            error: status.as_u16().to_string(),
            description: status.canonical_reason().unwrap_or_default().to_string(),
        },
        ErrorResponse::into_error,
    )
}
