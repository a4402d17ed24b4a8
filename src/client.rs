//! Dialing `ws://` and `wss://` URIs.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::config::Config;
use crate::connection::{Connection, EventObservers, Io, Role};
use crate::error::{Error, Result};
use crate::message::{CloseFrame, Message};
use crate::protocol::{WsUri, handshake};

#[cfg(feature = "tls-rustls")]
use crate::tls::TlsConnector;

/// Connect to `uri` with the default configuration and no observers.
///
/// # Errors
///
/// See [`ClientBuilder::connect`].
pub async fn connect(uri: &str) -> Result<Connection> {
    ClientBuilder::new(uri)?.connect().await
}

/// Builds a client connection.
///
/// Observers registered here are in place before the handshake runs, so
/// open observers fire and no early frame is missed.
pub struct ClientBuilder {
    uri: WsUri,
    config: Config,
    observers: EventObservers,
    #[cfg(feature = "tls-rustls")]
    tls: Option<TlsConnector>,
}

impl ClientBuilder {
    /// Start building a connection to `uri`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUri` unless `uri` is a `ws://` or `wss://` URI
    /// with a host.
    pub fn new(uri: &str) -> Result<Self> {
        WsUri::parse(uri).map(Self::from_uri)
    }

    /// Start building a connection to an already parsed URI.
    #[must_use]
    pub fn from_uri(uri: WsUri) -> Self {
        Self {
            uri,
            config: Config::default(),
            observers: EventObservers::default(),
            #[cfg(feature = "tls-rustls")]
            tls: None,
        }
    }

    /// Use `config` for the handshake limits and the connection.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use a custom TLS connector for `wss://` instead of the webpki roots.
    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn tls_connector(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    /// Register an open observer.
    #[must_use]
    pub fn on_open<F>(self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.observers.open.push(Arc::new(f));
        self
    }

    /// Register a message observer.
    #[must_use]
    pub fn on_message<F>(self, f: F) -> Self
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        self.observers.message.push(Arc::new(f));
        self
    }

    /// Register a ping observer.
    #[must_use]
    pub fn on_ping<F>(self, f: F) -> Self
    where
        F: Fn(&Connection, &[u8]) + Send + Sync + 'static,
    {
        self.observers.ping.push(Arc::new(f));
        self
    }

    /// Register a pong observer.
    #[must_use]
    pub fn on_pong<F>(self, f: F) -> Self
    where
        F: Fn(&Connection, &[u8]) + Send + Sync + 'static,
    {
        self.observers.pong.push(Arc::new(f));
        self
    }

    /// Register a close observer.
    #[must_use]
    pub fn on_close<F>(self, f: F) -> Self
    where
        F: Fn(&Connection, &CloseFrame) + Send + Sync + 'static,
    {
        self.observers.close.push(Arc::new(f));
        self
    }

    /// Open a TCP (or TLS for `wss://`) connection, run the client
    /// handshake, fire open observers and start the receive task.
    ///
    /// Redirects are followed over the same socket.
    ///
    /// # Errors
    ///
    /// - `Error::Io` if the TCP connection fails
    /// - `Error::Tls` if the TLS handshake fails
    /// - any handshake error from [`handshake::client`]
    pub async fn connect(self) -> Result<Connection> {
        let tcp = TcpStream::connect((self.uri.connect_host(), self.uri.port())).await?;
        let peer = tcp.peer_addr().ok();
        // Frames are written whole; Nagle only adds latency.
        let _ = tcp.set_nodelay(true);
        tracing::debug!(uri = %self.uri, peer = ?peer, "tcp connected");

        if self.uri.is_secure() {
            let stream = self.wrap_tls(tcp).await?;
            self.establish(stream, peer).await
        } else {
            self.establish(Box::new(tcp), peer).await
        }
    }

    /// Run the handshake over an existing stream instead of dialing.
    ///
    /// # Errors
    ///
    /// Any handshake error from [`handshake::client`].
    pub async fn connect_on<S: Io>(self, stream: S) -> Result<Connection> {
        self.establish(Box::new(stream), None).await
    }

    #[cfg(feature = "tls-rustls")]
    async fn wrap_tls(&self, tcp: TcpStream) -> Result<Box<dyn Io>> {
        let connector = match &self.tls {
            Some(connector) => connector.clone(),
            None => TlsConnector::with_webpki_roots()?,
        };
        let stream = connector.connect(self.uri.connect_host(), tcp).await?;
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "tls-rustls"))]
    async fn wrap_tls(&self, _tcp: TcpStream) -> Result<Box<dyn Io>> {
        Err(Error::Tls(
            "wss:// requires the `tls-rustls` feature".to_string(),
        ))
    }

    async fn establish(self, stream: Box<dyn Io>, peer: Option<SocketAddr>) -> Result<Connection> {
        let mut stream = BufReader::with_capacity(self.config.read_buffer_size, stream);
        let negotiated = handshake::client(&mut stream, self.uri, &self.config.limits).await?;

        let (conn, reader) = Connection::new(
            stream,
            Role::Client,
            self.config,
            peer,
            self.observers,
        );
        if !conn.mark_open() {
            return Err(Error::InvalidHandshake(format!(
                "connection left the connecting state early ({})",
                conn.state()
            )));
        }
        tracing::debug!(id = conn.id(), uri = %negotiated.uri, "connection open");
        conn.notify_open();
        tokio::spawn(conn.clone().run(reader));
        Ok(conn)
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("uri", &self.uri)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
