//! One-shot loopback HTTP listener for the authorization redirect.
//!
//! Connections are handled on their own tasks so an idle socket (browsers
//! like to pre-connect) cannot hold up the real redirect. The first request
//! for the callback path claims the attempt: the deadline is disarmed and no
//! further connections are accepted while that request finishes. Its outcome
//! comes back over a channel; dropping [`CallbackServer::serve`] closes the
//! listener and aborts every connection task.

use super::OAuthClient;
use crate::error::{EndpointError, Error, Result};
use crate::token::SessionCredential;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

/// Path the provider redirects to.
pub const CALLBACK_PATH: &str = "/oauth2callback";

/// Upper bound on how long a connection may take to send its request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the size of the request head.
const MAX_REQUEST_HEAD: u64 = 16 * 1024;

/// What a connection handler needs to finish the exchange.
#[derive(Debug)]
pub(crate) struct CallbackContext {
    pub client: OAuthClient,
    pub redirect_uri: String,
    pub state: String,
}

/// Shared between the serving loop and its connection tasks.
#[derive(Debug)]
struct Shared {
    context: CallbackContext,
    claimed: AtomicBool,
}

/// Progress reported by a connection task.
enum Event {
    /// A callback request arrived; the deadline no longer applies.
    Claimed,
    /// The attempt is over.
    Finished(Result<SessionCredential>),
}

/// Bound callback listener owned by a single authorization attempt.
///
/// Listens on `127.0.0.1` and, when available, on `::1` at the same port,
/// since `localhost` may resolve to either.
#[derive(Debug)]
pub(crate) struct CallbackServer {
    v4: TcpListener,
    v6: Option<TcpListener>,
    port: u16,
}

impl CallbackServer {
    /// Binds `127.0.0.1:<port>`, plus `[::1]:<port>` if it is free.
    pub(crate) async fn bind(port: u16) -> Result<Self> {
        let v4 = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .await
            .map_err(|source| Error::PortConflict { port, source })?;
        let v6 = match TcpListener::bind(SocketAddr::from((Ipv6Addr::LOCALHOST, port))).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                debug!(port, error = %e, "IPv6 loopback unavailable for callback");
                None
            }
        };
        debug!(port, ipv6 = v6.is_some(), "Callback listener bound");
        Ok(Self { v4, v6, port })
    }

    pub(crate) const fn port(&self) -> u16 {
        self.port
    }

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.v6 {
            Some(v6) => tokio::select! {
                accepted = self.v4.accept() => accepted,
                accepted = v6.accept() => accepted,
            },
            None => self.v4.accept().await,
        }
    }

    /// Serves requests until one of them ends the attempt, or `timeout`
    /// elapses with no callback received.
    ///
    /// Once a callback request arrives the deadline is disarmed and the
    /// request runs to completion, code exchange included.
    pub(crate) async fn serve(
        self,
        context: CallbackContext,
        timeout: Duration,
    ) -> Result<SessionCredential> {
        let shared = Arc::new(Shared {
            context,
            claimed: AtomicBool::new(false),
        });
        let (tx, mut rx) = mpsc::channel(4);
        let mut connections = JoinSet::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut claimed = false;

        loop {
            tokio::select! {
                biased;

                Some(event) = rx.recv() => match event {
                    Event::Claimed => {
                        claimed = true;
                        debug!(port = self.port, "Callback received; deadline cleared");
                    }
                    Event::Finished(outcome) => {
                        debug!(port = self.port, "Callback listener closing");
                        return outcome;
                    }
                },
                Some(joined) = connections.join_next() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Callback connection task failed");
                        return Err(Error::Callback(e.to_string()));
                    }
                }
                accepted = self.accept(), if !claimed => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Callback connection");
                        connections.spawn(handle_connection(stream, Arc::clone(&shared), tx.clone()));
                    }
                    Err(e) => warn!(error = %e, port = self.port, "Failed to accept callback connection"),
                },
                () = &mut deadline, if !claimed => {
                    debug!(port = self.port, "Authorization deadline reached");
                    return Err(Error::Timeout(timeout.as_secs()));
                }
            }
        }
    }
}

/// Status line, body and the outcome it carries (if terminal).
struct Reply {
    status: &'static str,
    body: String,
    outcome: Option<Result<SessionCredential>>,
}

impl Reply {
    fn not_terminal(status: &'static str, message: &str) -> Self {
        Self {
            status,
            body: page("Authorization", message),
            outcome: None,
        }
    }

    fn failed(status: &'static str, message: &str, error: Error) -> Self {
        Self {
            status,
            body: page("Authorization failed", message),
            outcome: Some(Err(error)),
        }
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>, events: mpsc::Sender<Event>) {
    let (reader, mut writer) = stream.into_split();

    let request = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request(reader)).await {
        Ok(Request::Empty) => {
            debug!("Callback connection closed without a request");
            return;
        }
        Ok(request) => request,
        Err(_) => {
            debug!("Callback connection idle, dropping");
            return;
        }
    };

    let reply = respond(request, &shared, &events).await;
    if let Err(e) = write_reply(&mut writer, reply.status, &reply.body).await {
        debug!(error = %e, "Failed to write callback response");
    }

    // Sent after the response is flushed: the receiver tears everything down.
    if let Some(outcome) = reply.outcome {
        let _ = events.send(Event::Finished(outcome)).await;
    }
}

/// What arrived on a connection.
enum Request {
    /// The peer closed (or failed) before sending anything.
    Empty,
    /// The request line is not `METHOD TARGET ...`.
    Malformed,
    /// The request line did not end within the size limit.
    TooLarge,
    /// Method and target, plus whatever went wrong reading the rest.
    Line {
        method: String,
        target: String,
        failure: Option<String>,
    },
}

/// Reads the request line and drains the headers.
async fn read_request<R>(reader: R) -> Request
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(tokio::io::AsyncReadExt::take(reader, MAX_REQUEST_HEAD));
    let mut failure = None;

    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line).await {
        Ok(0) => return Request::Empty,
        Ok(_) => {}
        Err(e) if line.is_empty() => {
            debug!(error = %e, "Failed to read callback request");
            return Request::Empty;
        }
        Err(e) => failure = Some(e.to_string()),
    }
    let line_complete = failure.is_none();
    if line_complete && !line.ends_with(b"\n") && line.len() as u64 >= MAX_REQUEST_HEAD {
        return Request::TooLarge;
    }

    let line = match String::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            if failure.is_none() {
                failure = Some("request line is not valid UTF-8".to_string());
            }
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    // Drain headers; nothing in them matters here.
    let mut header = Vec::new();
    while line_complete {
        header.clear();
        match reader.read_until(b'\n', &mut header).await {
            Ok(0) => break,
            Ok(_) if header == b"\r\n" || header == b"\n" => break,
            Ok(_) => {}
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e.to_string());
                }
                break;
            }
        }
    }

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => Request::Line {
            method: method.to_string(),
            target: target.to_string(),
            failure,
        },
        _ => Request::Malformed,
    }
}

async fn respond(request: Request, shared: &Shared, events: &mpsc::Sender<Event>) -> Reply {
    let (method, target, failure) = match request {
        Request::Line {
            method,
            target,
            failure,
        } => (method, target, failure),
        Request::TooLarge => return Reply::not_terminal("414 URI Too Long", "Request too large."),
        Request::Empty | Request::Malformed => {
            return Reply::not_terminal("400 Bad Request", "Malformed request.");
        }
    };

    // Only the path and query matter; the host is a placeholder.
    let Ok(url) = Url::parse("http://localhost").and_then(|base| base.join(&target)) else {
        return Reply::not_terminal("400 Bad Request", "Malformed request.");
    };

    if url.path() != CALLBACK_PATH {
        debug!(path = url.path(), "Ignoring request outside the callback path");
        return Reply::not_terminal("404 Not Found", "Not found.");
    }
    if method != "GET" {
        return Reply::not_terminal("405 Method Not Allowed", "Method not allowed.");
    }

    if shared.claimed.swap(true, Ordering::SeqCst) {
        return Reply::not_terminal("409 Conflict", "This sign-in is already being completed.");
    }
    let _ = events.send(Event::Claimed).await;

    if let Some(failure) = failure {
        warn!(error = %failure, "Failed to read the authorization redirect");
        return Reply::failed(
            "500 Internal Server Error",
            "The authorization redirect could not be read. Check the terminal for details.",
            Error::Callback(failure),
        );
    }

    let context = &shared.context;
    let params = CallbackParams::from_url(&url);
    let code = match params.into_code(&context.state) {
        Ok(code) => code,
        Err(e) => {
            warn!(error = %e, "Authorization redirect rejected");
            return Reply::failed(
                "400 Bad Request",
                "The authorization request was not completed. You can close this window.",
                e,
            );
        }
    };

    match exchange(context, &code).await {
        Ok(credential) => Reply {
            status: "200 OK",
            body: page(
                "Authorization complete",
                "You are signed in. You can close this window and return to the terminal.",
            ),
            outcome: Some(Ok(credential)),
        },
        Err(e) => {
            warn!(error = %e, "Token exchange failed");
            Reply::failed(
                "500 Internal Server Error",
                "Signing in failed while exchanging the authorization code. Check the terminal for details.",
                e,
            )
        }
    }
}

async fn exchange(context: &CallbackContext, code: &str) -> Result<SessionCredential> {
    let token = context
        .client
        .exchange_code(code, &context.redirect_uri)
        .await
        .map_err(Error::TokenExchange)?;

    SessionCredential::from_token(token).map_err(|_| {
        Error::TokenExchange(EndpointError::InvalidResponse(
            "provider did not issue a refresh token".to_string(),
        ))
    })
}

/// Query parameters the provider may send on the redirect.
#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    state: Option<String>,
}

impl CallbackParams {
    fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                "state" => &mut params.state,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        params
    }

    /// Checks the redirect in order: provider error, state, code.
    fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            return Err(Error::oauth_error(
                error,
                self.error_description.unwrap_or_default(),
            ));
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(Error::oauth_error(
                "state_mismatch",
                "redirect state does not match the authorization request",
            ));
        }
        self.code.filter(|c| !c.is_empty()).ok_or_else(|| {
            Error::oauth_error("missing_code", "redirect carried no authorization code")
        })
    }
}

async fn write_reply<W>(writer: &mut W, status: &str, body: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await
}

fn page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h2>{title}</h2><p>{}</p></body></html>",
        escape_html(message)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
