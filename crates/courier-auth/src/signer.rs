//! Handle that downstream API calls authenticate with.

use crate::error::{EndpointError, Error, Result};
use crate::flow::OAuthClient;
use crate::token::SessionCredential;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Produces bearer credentials on demand.
///
/// Cheap to clone; clones share one credential, so a refresh performed
/// through any clone is seen by all of them. Refreshing is lazy: it only
/// happens when a caller asks for a token and the current one is missing
/// or about to expire.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: OAuthClient,
    credential: Mutex<SessionCredential>,
}

impl RequestSigner {
    pub(crate) fn new(client: OAuthClient, credential: SessionCredential) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                credential: Mutex::new(credential),
            }),
        }
    }

    /// Returns a valid access token, refreshing it first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidatedToken`] if the provider refuses the
    /// refresh token.
    pub async fn bearer_token(&self) -> Result<String> {
        let mut credential = self.inner.credential.lock().await;
        if credential.needs_refresh() {
            self.refresh_locked(&mut credential).await?;
        }
        credential.access_token.clone().ok_or_else(|| {
            Error::InvalidatedToken(EndpointError::InvalidResponse(
                "no access token after refresh".to_string(),
            ))
        })
    }

    /// Adds an `Authorization: Bearer` header to `request`.
    ///
    /// # Errors
    ///
    /// Same as [`bearer_token`](Self::bearer_token).
    pub async fn sign(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.bearer_auth(self.bearer_token().await?))
    }

    /// Refreshes unconditionally; used to validate a stored refresh token.
    pub(crate) async fn force_refresh(&self) -> Result<()> {
        let mut credential = self.inner.credential.lock().await;
        self.refresh_locked(&mut credential).await
    }

    async fn refresh_locked(&self, credential: &mut SessionCredential) -> Result<()> {
        let token = self
            .inner
            .client
            .refresh_token(&credential.refresh_token)
            .await
            .map_err(Error::InvalidatedToken)?;
        credential.apply(token);
        debug!(expires_at = ?credential.expires_at, "Access token refreshed");
        Ok(())
    }

    /// Current access token, without refreshing.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.credential.lock().await.access_token.clone()
    }

    /// Expiry of the current access token.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.credential.lock().await.expires_at
    }

    /// Refresh token backing this handle.
    pub async fn refresh_token(&self) -> String {
        self.inner.credential.lock().await.refresh_token.clone()
    }

    /// OAuth client this handle refreshes through.
    #[must_use]
    pub fn client(&self) -> &OAuthClient {
        &self.inner.client
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::Provider;
    use chrono::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OAuthClient {
        let provider = Provider::new(
            "Stub",
            format!("{}/auth", server.uri()),
            format!("{}/token", server.uri()),
        )
        .unwrap();
        OAuthClient::new("cid", provider).with_client_secret("csecret")
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_without_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let credential = SessionCredential {
            refresh_token: "rt".to_string(),
            access_token: Some("at-live".to_string()),
            expires_at: Some(Utc::now() + Duration::seconds(3600)),
        };
        let signer = RequestSigner::new(client_for(&server), credential);
        assert_eq!(signer.bearer_token().await.unwrap(), "at-live");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("refresh_token=rt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-new",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = SessionCredential {
            refresh_token: "rt".to_string(),
            access_token: Some("at-old".to_string()),
            expires_at: Some(Utc::now() - Duration::seconds(10)),
        };
        let signer = RequestSigner::new(client_for(&server), credential);
        let clone = signer.clone();

        assert_eq!(signer.bearer_token().await.unwrap(), "at-new");
        assert_eq!(clone.bearer_token().await.unwrap(), "at-new");
        assert_eq!(clone.refresh_token().await, "rt");
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_invalidated_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
            })))
            .mount(&server)
            .await;

        let signer = RequestSigner::new(
            client_for(&server),
            SessionCredential::from_refresh_token("revoked"),
        );
        let err = signer.bearer_token().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidatedToken);
    }

    #[tokio::test]
    async fn test_sign_sets_bearer_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/profile"))
            .and(header("authorization", "Bearer at-live"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let credential = SessionCredential {
            refresh_token: "rt".to_string(),
            access_token: Some("at-live".to_string()),
            expires_at: None,
        };
        let signer = RequestSigner::new(client_for(&server), credential);
        let request = reqwest::Client::new().get(format!("{}/gmail/v1/users/me/profile", server.uri()));
        let response = signer.sign(request).await.unwrap().send().await.unwrap();
        assert!(response.status().is_success());
    }
}
