//! Minimal HTTP/1.1 head reading and writing for the opening handshake.
//!
//! Only the request/status line and the header block are handled; the
//! handshake never carries a body.

use std::collections::HashMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::config::Limits;
use crate::error::{Error, Result};

/// Case-insensitive header map.
///
/// A header name that appears more than once is folded into a single value
/// joined with `", "`, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: HashMap<String, String>,
}

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, folding it into an existing value of the same name.
    pub fn append(&mut self, name: &str, value: &str) {
        self.map
            .entry(name.trim().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns `true` if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn parse_headers<'a, I>(lines: I) -> Result<Headers>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .filter(|(name, _)| !name.trim().is_empty())
            .ok_or_else(|| Error::InvalidHandshake(format!("Invalid header field: {}", line)))?;
        headers.append(name, value.trim());
    }
    Ok(headers)
}

fn head_lines(data: &[u8]) -> Result<std::str::Lines<'_>> {
    std::str::from_utf8(data)
        .map(str::lines)
        .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))
}

/// A parsed HTTP request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method as sent (case preserved).
    pub method: String,
    /// Request target, e.g. `/chat?room=1`.
    pub target: String,
    /// Request headers.
    pub headers: Headers,
}

impl RequestHead {
    /// Parse a request head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the request line is not
    /// `<method> <target> HTTP/1.1` or a header line has no name.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut lines = head_lines(data)?;
        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        match parts.as_slice() {
            [method, target, version] if version.starts_with("HTTP/1.1") => Ok(Self {
                method: (*method).to_string(),
                target: (*target).to_string(),
                headers: parse_headers(lines)?,
            }),
            _ => Err(Error::InvalidHandshake(format!(
                "Invalid request line: {}",
                request_line
            ))),
        }
    }

    /// The path component of the target, `/` when empty.
    #[must_use]
    pub fn path(&self) -> &str {
        let path = self
            .target
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        if path.is_empty() { "/" } else { path }
    }
}

/// A parsed HTTP response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code.
    pub status: u16,
    /// Reason phrase (may be empty).
    pub reason: String,
    /// Response headers.
    pub headers: Headers,
}

impl ResponseHead {
    /// Parse a response head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the status line is not
    /// `HTTP/1.1 <code> [reason]` or a header line has no name.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut lines = head_lines(data)?;
        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid status line: {}",
                status_line
            )));
        }
        let status = parts
            .next()
            .and_then(|code| code.trim().parse::<u16>().ok())
            .filter(|code| (100..1000).contains(code))
            .ok_or_else(|| {
                Error::InvalidHandshake(format!("Invalid status line: {}", status_line))
            })?;
        let reason = parts.next().unwrap_or_default().trim().to_string();

        Ok(Self {
            status,
            reason,
            headers: parse_headers(lines)?,
        })
    }
}

/// Read an HTTP head (start line plus headers, through the blank line).
///
/// Bytes after the blank line stay buffered in `reader`, so frames sent
/// right behind the handshake are not lost. Never buffers more than one
/// byte past `limits.max_handshake_size`, even for a line with no newline.
///
/// # Errors
///
/// - `Error::HandshakeTooLarge` if the head exceeds `max_handshake_size`
/// - `Error::InvalidHandshake` if the stream ends before the blank line
/// - `Error::Io` on read failure
pub async fn read_head<R>(reader: &mut R, limits: &Limits) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    loop {
        let start = head.len();
        let budget = limits
            .max_handshake_size
            .saturating_add(1)
            .saturating_sub(start);
        let n = (&mut *reader)
            .take(budget as u64)
            .read_until(b'\n', &mut head)
            .await?;
        limits.check_handshake_size(head.len())?;
        if n == 0 {
            return Err(Error::InvalidHandshake(
                "Connection closed during handshake".into(),
            ));
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            return Ok(head);
        }
    }
}

/// Standard reason phrase for the status codes the handshake uses.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

fn write_headers(buf: &mut Vec<u8>, headers: &[(&str, &str)]) {
    for (name, value) in headers {
        buf.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    buf.extend_from_slice(b"\r\n");
}

/// Serialize a request head.
#[must_use]
pub fn write_request(method: &str, target: &str, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = format!("{} {} HTTP/1.1\r\n", method, target).into_bytes();
    write_headers(&mut buf, headers);
    buf
}

/// Serialize a response head.
#[must_use]
pub fn write_response(status: u16, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).into_bytes();
    write_headers(&mut buf, headers);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn head_limit(max_handshake_size: usize) -> Limits {
        Limits {
            max_handshake_size,
            ..Limits::default()
        }
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Sec-WebSocket-Key", "abc");
        assert_eq!(headers.get("sec-websocket-key"), Some("abc"));
        assert_eq!(headers.get("SEC-WEBSOCKET-KEY"), Some("abc"));
        assert!(headers.contains("Sec-Websocket-Key"));
        assert!(!headers.contains("Host"));
    }

    #[test]
    fn test_headers_fold_repeated_names() {
        let mut headers = Headers::new();
        headers.append("Sec-WebSocket-Protocol", "chat");
        headers.append("sec-websocket-protocol", "superchat");
        assert_eq!(headers.get("Sec-WebSocket-Protocol"), Some("chat, superchat"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_parse_request() {
        let request = b"GET /chat?room=1 HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        let head = RequestHead::parse(request).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "/chat?room=1");
        assert_eq!(head.path(), "/chat");
        assert_eq!(head.headers.get("host"), Some("server.example.com"));
        assert_eq!(head.headers.len(), 3);
    }

    #[test]
    fn test_parse_request_rejects_bad_lines() {
        assert!(RequestHead::parse(b"").is_err());
        assert!(RequestHead::parse(b"GET /chat\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET /chat HTTP/1.0\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n").is_err());
    }

    #[test]
    fn test_request_path_defaults_to_root() {
        let head = RequestHead::parse(b"GET ?x=1 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.path(), "/");
    }

    #[test]
    fn test_parse_response() {
        let response = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
            \r\n";
        let head = ResponseHead::parse(response).unwrap();
        assert_eq!(head.status, 101);
        assert_eq!(head.reason, "Switching Protocols");
        assert_eq!(
            head.headers.get("sec-websocket-accept"),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
    }

    #[test]
    fn test_parse_response_without_reason() {
        let head = ResponseHead::parse(b"HTTP/1.1 302\r\nLocation: /next\r\n\r\n").unwrap();
        assert_eq!(head.status, 302);
        assert_eq!(head.reason, "");
        assert_eq!(head.headers.get("location"), Some("/next"));
    }

    #[test]
    fn test_parse_response_rejects_bad_status() {
        assert!(ResponseHead::parse(b"HTTP/1.1 abc Nope\r\n\r\n").is_err());
        assert!(ResponseHead::parse(b"SIP/2.0 200 OK\r\n\r\n").is_err());
        assert!(ResponseHead::parse(b"HTTP/1.1 42 Short\r\n\r\n").is_err());
    }

    #[test]
    fn test_write_request_and_response() {
        let request = write_request("GET", "/chat", &[("Host", "example.com")]);
        assert_eq!(request, b"GET /chat HTTP/1.1\r\nHost: example.com\r\n\r\n");

        let response = write_response(404, &[("Connection", "close")]);
        assert_eq!(response, b"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n");
    }

    #[tokio::test]
    async fn test_read_head_leaves_trailing_bytes() {
        let data: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\nA: b\r\n\r\n\x81\x00";
        let mut reader = BufReader::new(data);
        let head = read_head(&mut reader, &head_limit(1024)).await.unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0x81, 0x00]);
    }

    #[tokio::test]
    async fn test_read_head_limits() {
        let data: &[u8] = b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n";
        let mut reader = BufReader::new(data);
        assert!(matches!(
            read_head(&mut reader, &head_limit(20)).await,
            Err(Error::HandshakeTooLarge { .. })
        ));

        let mut reader = BufReader::new(&b"GET / HTTP/1.1\r\nHost: x\r\n"[..]);
        assert!(matches!(
            read_head(&mut reader, &head_limit(1024)).await,
            Err(Error::InvalidHandshake(_))
        ));
    }

    #[tokio::test]
    async fn test_read_head_stops_on_endless_line() {
        let mut reader = BufReader::new(tokio::io::repeat(b'a'));
        let err = read_head(&mut reader, &head_limit(8192)).await.unwrap_err();
        assert_eq!(
            err,
            Error::HandshakeTooLarge {
                size: 8193,
                max: 8192
            }
        );
    }

    #[tokio::test]
    async fn test_read_head_bounds_total_size_across_lines() {
        let data = "X-Pad: 0123456789\r\n".repeat(100);
        let mut reader = BufReader::new(data.as_bytes());
        assert!(matches!(
            read_head(&mut reader, &head_limit(256)).await,
            Err(Error::HandshakeTooLarge { size: 257, max: 256 })
        ));
    }
}
