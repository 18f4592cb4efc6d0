//! End-to-end tests for `AuthSession`.
//!
//! The provider is a wiremock server and the "browser" is a scripted
//! `UserAgent` that follows the authorization URL straight to the
//! loopback redirect, so every test runs the real listener and token
//! exchange without a human.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_auth::credentials::{CLIENT_ID_VAR, CLIENT_SECRET_VAR};
use courier_auth::{
    AuthConfig, AuthSession, CallbackPort, CredentialSource, Error, ErrorKind, Provider,
    TokenRecord, TokenStore, UserAgent,
};
use tokio::task::JoinHandle;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// What the scripted browser does with the authorization URL.
#[derive(Clone, Copy)]
enum Consent {
    /// Redirect back with this code.
    Grant(&'static str),
    /// Redirect back with this error.
    Deny(&'static str),
    /// Never come back.
    Ignore,
}

struct ScriptedBrowser {
    consent: Consent,
    shown: AtomicUsize,
    launches: AtomicUsize,
    redirects: Mutex<Vec<JoinHandle<u16>>>,
}

impl ScriptedBrowser {
    fn new(consent: Consent) -> Arc<Self> {
        Arc::new(Self {
            consent,
            shown: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            redirects: Mutex::new(Vec::new()),
        })
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }

    /// HTTP statuses the callback listener answered with.
    async fn statuses(&self) -> Vec<u16> {
        let handles: Vec<_> = self.redirects.lock().unwrap().drain(..).collect();
        let mut statuses = Vec::new();
        for handle in handles {
            statuses.push(handle.await.unwrap());
        }
        statuses
    }
}

impl UserAgent for ScriptedBrowser {
    fn show_authorization_url(&self, _url: &Url) {
        self.shown.fetch_add(1, Ordering::SeqCst);
    }

    fn open_browser(&self, url: &Url) -> io::Result<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["access_type"], "offline");

        let mut redirect = Url::parse(&params["redirect_uri"]).unwrap();
        redirect.set_host(Some("127.0.0.1")).unwrap();
        {
            let mut query = redirect.query_pairs_mut();
            match self.consent {
                Consent::Grant(code) => query.append_pair("code", code),
                Consent::Deny(error) => query
                    .append_pair("error", error)
                    .append_pair("error_description", "The user denied access"),
                Consent::Ignore => return Ok(()),
            };
            query.append_pair("state", &params["state"]);
        }

        let handle = tokio::spawn(async move {
            reqwest::get(redirect).await.unwrap().status().as_u16()
        });
        self.redirects.lock().unwrap().push(handle);
        Ok(())
    }
}

fn app_env() -> CredentialSource {
    CredentialSource::new("/nonexistent/credentials.json").with_env(|key: &str| match key {
        CLIENT_ID_VAR => Some("cid".to_string()),
        CLIENT_SECRET_VAR => Some("csecret".to_string()),
        _ => None,
    })
}

fn stub_provider(server: &MockServer) -> Provider {
    Provider::new(
        "Stub",
        format!("{}/auth", server.uri()),
        format!("{}/token", server.uri()),
    )
    .unwrap()
    .with_revoke_url(format!("{}/revoke", server.uri()))
    .unwrap()
    .with_default_scopes(vec!["https://www.googleapis.com/auth/gmail.modify".to_string()])
}

fn session(dir: &Path, server: &MockServer, browser: &Arc<ScriptedBrowser>) -> AuthSession {
    session_with(AuthConfig::new(dir), stub_provider(server), browser)
}

fn session_with(
    config: AuthConfig,
    provider: Provider,
    browser: &Arc<ScriptedBrowser>,
) -> AuthSession {
    AuthSession::new(config, provider)
        .with_credential_source(app_env())
        .with_user_agent(Arc::clone(browser) as Arc<dyn UserAgent>)
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn mount_code_exchange(server: &MockServer, code: &str, refresh: &str, access: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={code}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .mount(server)
        .await;
}

fn read_token_file(dir: &Path) -> serde_json::Value {
    let contents = std::fs::read_to_string(dir.join("token.json")).unwrap();
    serde_json::from_str(&contents).unwrap()
}

#[tokio::test]
async fn cold_start_authorizes_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=code-xyz"))
        .and(body_string_contains("client_id=cid"))
        .and(body_string_contains("client_secret=csecret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Grant("code-xyz"));
    let session = session(dir.path(), &server, &browser);

    let signer = session.get_client().await.unwrap();
    assert_eq!(signer.access_token().await.as_deref(), Some("at-1"));
    assert_eq!(signer.refresh_token().await, "rt-1");
    assert_eq!(signer.bearer_token().await.unwrap(), "at-1");

    assert_eq!(
        read_token_file(dir.path()),
        serde_json::json!({
            "type": "authorized_user",
            "clientId": "cid",
            "clientSecret": "csecret",
            "refreshToken": "rt-1",
        })
    );
    assert_eq!(browser.shown(), 1);
    assert_eq!(browser.launches(), 1);
    assert_eq!(browser.statuses().await, vec![200]);

    // Cached: no second flow, no network.
    let again = session.get_client().await.unwrap();
    assert_eq!(again.access_token().await.as_deref(), Some("at-1"));
    assert_eq!(browser.launches(), 1);
}

#[tokio::test]
async fn warm_start_uses_stored_token() {
    let dir = tempfile::tempdir().unwrap();
    TokenStore::new(dir.path().join("token.json"))
        .save(&TokenRecord::new("cid", "csecret", "rt-stored"))
        .await
        .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-stored"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-warm",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Ignore);
    let session = session(dir.path(), &server, &browser);

    let signer = session.get_client().await.unwrap();
    assert_eq!(signer.access_token().await.as_deref(), Some("at-warm"));
    assert_eq!(signer.refresh_token().await, "rt-stored");
    assert_eq!(browser.shown(), 0);
    assert_eq!(browser.launches(), 0);
}

#[tokio::test]
async fn rejected_stored_token_falls_back_to_browser() {
    let dir = tempfile::tempdir().unwrap();
    TokenStore::new(dir.path().join("token.json"))
        .save(&TokenRecord::new("cid", "csecret", "rt-revoked"))
        .await
        .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked.",
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_code_exchange(&server, "code-new", "rt-new", "at-new").await;

    let browser = ScriptedBrowser::new(Consent::Grant("code-new"));
    let session = session(dir.path(), &server, &browser);

    let signer = session.get_client().await.unwrap();
    assert_eq!(signer.refresh_token().await, "rt-new");
    assert_eq!(browser.launches(), 1);
    assert_eq!(read_token_file(dir.path())["refreshToken"], "rt-new");
}

#[tokio::test]
async fn denied_consent_is_protocol_error_and_frees_port() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let port = free_port();
    let browser = ScriptedBrowser::new(Consent::Deny("access_denied"));
    let config = AuthConfig::new(dir.path()).with_callback_port(CallbackPort::Fixed(port));
    let session = session_with(config, stub_provider(&server), &browser);

    let err = session.get_client().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OAuthProtocol);
    assert!(matches!(err, Error::OAuthProtocol { ref error, .. } if error == "access_denied"));
    assert_eq!(browser.statuses().await, vec![400]);
    assert!(!dir.path().join("token.json").exists());

    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[tokio::test(start_paused = true)]
async fn no_callback_times_out_once_and_frees_port() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing is ever exchanged, so the endpoints need not exist.
    let provider = Provider::new(
        "Unreachable",
        "http://127.0.0.1:9/auth",
        "http://127.0.0.1:9/token",
    )
    .unwrap();

    let port = free_port();
    let browser = ScriptedBrowser::new(Consent::Ignore);
    let config = AuthConfig::new(dir.path())
        .with_callback_port(CallbackPort::Fixed(port))
        .with_timeout(Duration::from_secs(120));
    let session = session_with(config, provider, &browser);

    let err = session.get_client().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(120)));
    assert_eq!(browser.shown(), 1);

    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[tokio::test]
async fn occupied_port_is_port_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;

    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let browser = ScriptedBrowser::new(Consent::Grant("never-used"));
    let config = AuthConfig::new(dir.path()).with_callback_port(CallbackPort::Fixed(port));
    let session = session_with(config, stub_provider(&server), &browser);

    let err = session.get_client().await.unwrap_err();
    match err {
        Error::PortConflict { port: reported, .. } => assert_eq!(reported, port),
        other => panic!("expected PortConflict, got {other}"),
    }
    assert_eq!(browser.shown(), 0);
    assert_eq!(browser.launches(), 0);
}

#[tokio::test]
async fn failed_exchange_is_token_exchange_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Malformed auth code.",
        })))
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Grant("bad-code"));
    let session = session(dir.path(), &server, &browser);

    let err = session.get_client().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenExchange);
    assert_eq!(browser.statuses().await, vec![500]);
    assert!(!dir.path().join("token.json").exists());
}

#[tokio::test]
async fn missing_app_credentials_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let browser = ScriptedBrowser::new(Consent::Ignore);

    let session = AuthSession::new(AuthConfig::new(dir.path()), stub_provider(&server))
        .with_credential_source(
            CredentialSource::new(dir.path().join("credentials.json")).with_env(|_: &str| None),
        )
        .with_user_agent(Arc::clone(&browser) as Arc<dyn UserAgent>);

    let err = session.get_client().await.unwrap_err();
    assert!(matches!(err, Error::NotConfigured { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(browser.launches(), 0);
}

#[tokio::test]
async fn revoke_then_reauthorize() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_code_exchange(&server, "code-xyz", "rt-1", "at-1").await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string_contains("token=rt-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Grant("code-xyz"));
    let session = session(dir.path(), &server, &browser);

    session.get_client().await.unwrap();
    assert!(session.has_valid_token().await);
    assert_eq!(browser.launches(), 1);

    session.revoke().await.unwrap();
    assert!(!dir.path().join("token.json").exists());
    assert!(!session.has_valid_token().await);

    session.get_client().await.unwrap();
    assert_eq!(browser.launches(), 2);
    assert!(dir.path().join("token.json").exists());
}

#[tokio::test]
async fn revoke_survives_provider_failure() {
    let dir = tempfile::tempdir().unwrap();
    TokenStore::new(dir.path().join("token.json"))
        .save(&TokenRecord::new("cid", "csecret", "rt-stored"))
        .await
        .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Ignore);
    let session = session(dir.path(), &server, &browser);

    session.revoke().await.unwrap();
    assert!(!dir.path().join("token.json").exists());

    // Nothing left to revoke; still fine.
    session.revoke().await.unwrap();
}

#[tokio::test]
async fn has_valid_token_never_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let browser = ScriptedBrowser::new(Consent::Grant("code-xyz"));
    let session = session(dir.path(), &server, &browser);

    assert!(!session.has_valid_token().await);
    assert_eq!(browser.shown(), 0);

    // A corrupt token file reads as "no token", not a panic.
    std::fs::write(dir.path().join("token.json"), "{").unwrap();
    assert!(!session.has_valid_token().await);
}

#[tokio::test]
async fn warm_start_persists_rotated_refresh_token() {
    let dir = tempfile::tempdir().unwrap();
    TokenStore::new(dir.path().join("token.json"))
        .save(&TokenRecord::new("cid", "csecret", "rt-stored"))
        .await
        .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=rt-stored"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-warm",
            "refresh_token": "rt-rotated",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Ignore);
    let session = session(dir.path(), &server, &browser);

    let signer = session.get_client().await.unwrap();
    assert_eq!(signer.refresh_token().await, "rt-rotated");
    assert_eq!(
        read_token_file(dir.path()),
        serde_json::json!({
            "type": "authorized_user",
            "clientId": "cid",
            "clientSecret": "csecret",
            "refreshToken": "rt-rotated",
        })
    );
    assert_eq!(browser.launches(), 0);
}

#[tokio::test]
async fn concurrent_get_client_runs_one_flow() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "access_token": "at-1",
                    "refresh_token": "rt-1",
                    "expires_in": 3600,
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Grant("code-xyz"));
    let session = session(dir.path(), &server, &browser);

    let (first, second) = tokio::join!(session.get_client(), session.get_client());
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.access_token().await.as_deref(), Some("at-1"));
    assert_eq!(second.access_token().await.as_deref(), Some("at-1"));
    assert_eq!(browser.launches(), 1);
    assert_eq!(browser.statuses().await, vec![200]);
}

#[tokio::test]
async fn slow_exchange_completes_after_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=code-slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "access_token": "at-slow",
                    "refresh_token": "rt-slow",
                    "expires_in": 3600,
                }))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Grant("code-slow"));
    let config = AuthConfig::new(dir.path()).with_timeout(Duration::from_secs(1));
    let session = session_with(config, stub_provider(&server), &browser);

    let signer = session.get_client().await.unwrap();
    assert_eq!(signer.refresh_token().await, "rt-slow");
    assert_eq!(browser.statuses().await, vec![200]);
    assert_eq!(read_token_file(dir.path())["refreshToken"], "rt-slow");
}

#[tokio::test]
async fn failed_delete_still_signs_out() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_code_exchange(&server, "code-xyz", "rt-1", "at-1").await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let browser = ScriptedBrowser::new(Consent::Grant("code-xyz"));
    let session = session(dir.path(), &server, &browser);
    session.get_client().await.unwrap();

    // A directory where the token file should be cannot be removed as a file.
    let token_path = dir.path().join("token.json");
    std::fs::remove_file(&token_path).unwrap();
    std::fs::create_dir(&token_path).unwrap();
    std::fs::write(token_path.join("keep"), "x").unwrap();

    let err = session.revoke().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(!session.has_valid_token().await);

    std::fs::remove_dir_all(&token_path).unwrap();
    session.get_client().await.unwrap();
    assert_eq!(browser.launches(), 2);
}
