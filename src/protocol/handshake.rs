//! WebSocket opening handshake (RFC 6455 Section 4).
//!
//! The client half sends the upgrade request, follows redirects and checks
//! the accept key. The server half validates an upgrade request and answers
//! with 101, 400 or 404.

use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};

use super::crypto::{compute_accept_key, generate_key};
use super::http::{self, Headers, RequestHead, ResponseHead};
use super::uri::WsUri;

/// The only protocol version this implementation speaks.
pub const WS_VERSION: &str = "13";

/// Result of a successful client handshake.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    /// The URI that finally answered 101 (differs from the requested one
    /// after redirects).
    pub uri: WsUri,
    /// The key sent in `Sec-WebSocket-Key`.
    pub key: String,
    /// Headers of the 101 response.
    pub headers: Headers,
    /// Number of redirects followed.
    pub redirects: usize,
}

/// Serialize the client upgrade request for `uri`.
#[must_use]
pub fn client_request(uri: &WsUri, key: &str) -> Vec<u8> {
    let host = uri.host_header();
    http::write_request(
        "GET",
        &uri.request_target(),
        &[
            ("Host", host.as_str()),
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", key),
            ("Sec-WebSocket-Version", WS_VERSION),
        ],
    )
}

/// Check the `Sec-WebSocket-Accept` header of a 101 response.
///
/// # Errors
///
/// Returns `Error::InvalidHandshake` if the header is missing or does not
/// match the key.
pub fn verify_accept(headers: &Headers, key: &str) -> Result<()> {
    match headers.get("sec-websocket-accept") {
        Some(accept) if accept == compute_accept_key(key) => Ok(()),
        _ => Err(Error::InvalidHandshake(
            "Server did not handle the request correctly".into(),
        )),
    }
}

/// Run the client half of the handshake over `stream`.
///
/// A 3xx response re-sends the request (same key, same stream) to the
/// resolved `Location`, up to `limits.max_redirects` times.
///
/// # Errors
///
/// - `Error::HandshakeRejected` for a status of 400 or above
/// - `Error::TooManyRedirects` when the redirect budget runs out
/// - `Error::InvalidHandshake` for malformed responses or a bad accept key
/// - `Error::Io` / `Error::Stream` if the stream fails
pub async fn client<S>(stream: &mut S, mut uri: WsUri, limits: &Limits) -> Result<ClientHandshake>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let key = generate_key()?;
    let mut redirects = 0;

    loop {
        stream.write_all(&client_request(&uri, &key)).await?;
        stream.flush().await?;

        let head = http::read_head(stream, limits).await?;
        let response = ResponseHead::parse(&head)?;

        match response.status {
            101 => {
                verify_accept(&response.headers, &key)?;
                tracing::debug!(uri = %uri, redirects, "client handshake complete");
                return Ok(ClientHandshake {
                    uri,
                    key,
                    headers: response.headers,
                    redirects,
                });
            }
            300..=399 => {
                redirects += 1;
                limits.check_redirects(redirects)?;
                let location = response.headers.get("location").ok_or_else(|| {
                    Error::InvalidHandshake(format!(
                        "Redirect ({}) without a Location header",
                        response.status
                    ))
                })?;
                let next = uri.resolve(location)?;
                tracing::debug!(
                    status = response.status,
                    from = %uri,
                    to = %next,
                    "following handshake redirect"
                );
                uri = next;
            }
            status if status >= 400 => {
                tracing::debug!(uri = %uri, status, "upgrade request rejected");
                return Err(Error::HandshakeRejected { status });
            }
            status => {
                return Err(Error::InvalidHandshake(format!(
                    "Unexpected status: {} {}",
                    status, response.reason
                )));
            }
        }
    }
}

/// Why the server refused an upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The request path does not match the configured pattern (404).
    NotFound,
    /// The request is not a valid version-13 upgrade (400).
    BadRequest,
}

impl Rejection {
    /// HTTP status sent for this rejection.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Rejection::NotFound => 404,
            Rejection::BadRequest => 400,
        }
    }
}

/// Validate an upgrade request against the server's path pattern.
///
/// Checks run in order: path, method (`GET`, any case), version `13`,
/// presence of `Sec-WebSocket-Key`. Returns the accept key on success.
pub fn validate_request(
    request: &RequestHead,
    path: &Regex,
) -> std::result::Result<String, Rejection> {
    if !path.is_match(request.path()) {
        return Err(Rejection::NotFound);
    }
    if !request.method.eq_ignore_ascii_case("GET") {
        return Err(Rejection::BadRequest);
    }
    if request.headers.get("sec-websocket-version") != Some(WS_VERSION) {
        return Err(Rejection::BadRequest);
    }
    request
        .headers
        .get("sec-websocket-key")
        .map(compute_accept_key)
        .ok_or(Rejection::BadRequest)
}

/// Serialize the 101 response carrying `accept`.
#[must_use]
pub fn accept_response(accept: &str) -> Vec<u8> {
    http::write_response(
        101,
        &[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Accept", accept),
        ],
    )
}

/// Serialize an error response that tells the client the socket is closing.
#[must_use]
pub fn reject_response(rejection: Rejection) -> Vec<u8> {
    http::write_response(rejection.status(), &[("Connection", "close")])
}

/// Run the server half of the handshake over `stream`.
///
/// On success the 101 response has been written and the parsed request is
/// returned. On rejection the 400/404 response has been written and the
/// caller is expected to drop the stream.
///
/// # Errors
///
/// - `Error::HandshakeRejected` carrying the status that was sent
/// - `Error::HandshakeTooLarge` if the request head exceeds the limit
/// - `Error::Io` / `Error::InvalidHandshake` if the request cannot be read
pub async fn server<S>(stream: &mut S, path: &Regex, limits: &Limits) -> Result<RequestHead>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let head = http::read_head(stream, limits).await?;
    let request = match RequestHead::parse(&head) {
        Ok(request) => request,
        Err(err) => {
            // Best effort: the peer may already be gone.
            let _ = stream.write_all(&reject_response(Rejection::BadRequest)).await;
            let _ = stream.flush().await;
            return Err(err);
        }
    };

    match validate_request(&request, path) {
        Ok(accept) => {
            stream.write_all(&accept_response(&accept)).await?;
            stream.flush().await?;
            tracing::debug!(path = request.path(), "upgrade request accepted");
            Ok(request)
        }
        Err(rejection) => {
            stream.write_all(&reject_response(rejection)).await?;
            stream.flush().await?;
            let status = rejection.status();
            tracing::debug!(
                path = request.path(),
                method = %request.method,
                status,
                "upgrade request rejected"
            );
            Err(Error::HandshakeRejected { status })
        }
    }
}
