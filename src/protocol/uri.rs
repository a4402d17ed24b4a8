//! `ws://` and `wss://` target URIs.

use url::Url;

use crate::error::{Error, Result};

/// A validated WebSocket URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUri {
    url: Url,
}

impl WsUri {
    /// Parse a `ws://` or `wss://` URI.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUri` if the string does not parse, the scheme is
    /// not `ws`/`wss`, or the host is missing.
    pub fn parse(input: &str) -> Result<Self> {
        Self::from_url(Url::parse(input)?)
    }

    fn from_url(mut url: Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(Error::InvalidUri(format!("unsupported scheme: {}", other)));
            }
        };
        if url.scheme() != scheme {
            // http(s) -> ws(s) stays within the special schemes, which url allows.
            url.set_scheme(scheme)
                .map_err(|()| Error::InvalidUri(format!("cannot convert scheme of {}", url)))?;
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::InvalidUri(format!("missing host: {}", url)));
        }
        url.set_fragment(None);
        Ok(Self { url })
    }

    /// Resolve a redirect `Location` against this URI.
    ///
    /// Relative locations are joined to the current URI; absolute `http(s)`
    /// locations are mapped onto `ws(s)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUri` if the result is not a usable WebSocket URI.
    pub fn resolve(&self, location: &str) -> Result<Self> {
        Self::from_url(self.url.join(location.trim())?)
    }

    /// Returns `true` for `wss://`.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    /// Host name or address literal.
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Host suitable for a socket address lookup (IPv6 brackets removed).
    #[must_use]
    pub fn connect_host(&self) -> &str {
        self.host().trim_start_matches('[').trim_end_matches(']')
    }

    /// Port, falling back to 80 for `ws` and 443 for `wss`.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.url
            .port()
            .unwrap_or(if self.is_secure() { 443 } else { 80 })
    }

    /// Request target: path (or `/`) plus query.
    #[must_use]
    pub fn request_target(&self) -> String {
        let path = match self.url.path() {
            "" => "/",
            path => path,
        };
        match self.url.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        }
    }

    /// `Host` header value; the port is omitted when it is the scheme default.
    #[must_use]
    pub fn host_header(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    /// The underlying URL.
    #[must_use]
    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl std::str::FromStr for WsUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for WsUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.url.fmt(f)
    }
}
