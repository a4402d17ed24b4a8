//! Accepting WebSocket connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::ListenerConfig;
use crate::connection::{
    Connection, ConnectionObserver, EventObservers, Io, Observers, Role, WeakConnection,
};
use crate::error::Result;
use crate::protocol::handshake;

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

struct Shared {
    config: ListenerConfig,
    connections: Mutex<HashMap<u64, WeakConnection>>,
    observers: Observers<dyn ConnectionObserver>,
}

impl Shared {
    fn track(&self, conn: &Connection) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn.id(), conn.downgrade());
    }

    fn untrack(&self, id: u64) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// A bound server socket accepting WebSocket upgrades.
///
/// Each accepted socket gets its own task that runs the server handshake
/// and then the connection's receive loop, so a slow client never holds up
/// the accept loop. Requests for paths that do not match the configured
/// pattern get 404; malformed upgrades get 400.
///
/// The listener only observes its connections: they stay alive as long as
/// their socket does, even after the listener is shut down.
pub struct Listener {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Listener {
    /// Bind `config.addr` and start accepting.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the address cannot be bound.
    pub async fn bind(config: ListenerConfig) -> Result<Self> {
        let socket = TcpListener::bind(config.addr).await?;
        let local_addr = socket.local_addr()?;
        let shared = Arc::new(Shared {
            config,
            connections: Mutex::new(HashMap::new()),
            observers: Observers::default(),
        });
        let accept_task = tokio::spawn(accept_loop(socket, Arc::clone(&shared)));
        tracing::debug!(addr = %local_addr, path = %shared.config.path, "listening");

        Ok(Self {
            shared,
            local_addr,
            accept_task,
        })
    }

    /// The bound address (useful after binding port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connections, in accept order.
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        let map = self
            .shared
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut live: Vec<Connection> = map
            .values()
            .filter_map(WeakConnection::upgrade)
            .filter(|conn| !conn.state().is_closed())
            .collect();
        live.sort_by_key(Connection::id);
        live
    }

    /// Register an observer called for every upgraded connection, before
    /// its receive loop starts. Observers registered on the connection from
    /// here see every frame.
    pub fn on_connection<F>(&self, f: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.add_connection_observer(Arc::new(f));
    }

    /// Register a typed connection observer.
    pub fn add_connection_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.shared.observers.push(observer);
    }

    /// Stop accepting. Established connections are not affected.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        tracing::debug!(addr = %self.local_addr, "listener shut down");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("path", &self.shared.config.path.as_str())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(socket: TcpListener, shared: Arc<Shared>) {
    loop {
        match socket.accept().await {
            Ok((tcp, peer)) => {
                let _ = tcp.set_nodelay(true);
                tracing::trace!(peer = %peer, "accepted tcp connection");
                tokio::spawn(serve(tcp, peer, Arc::clone(&shared)));
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Handshake, register, notify, then run the receive loop to completion.
async fn serve(tcp: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let config = &shared.config;
    let io: Box<dyn Io> = Box::new(tcp);
    let mut stream = BufReader::with_capacity(config.connection.read_buffer_size, io);

    if let Err(err) = handshake::server(&mut stream, &config.path, &config.connection.limits).await
    {
        tracing::debug!(peer = %peer, error = %err, "upgrade failed");
        return;
    }

    let (conn, reader) = Connection::new(
        stream,
        Role::Server,
        config.connection.clone(),
        Some(peer),
        EventObservers::default(),
    );
    let id = conn.id();
    shared.track(&conn);
    tracing::debug!(id, peer = %peer, "connection open");

    for observer in shared.observers.snapshot() {
        observer.on_connection(&conn);
    }
    conn.notify_open();
    conn.run(reader).await;

    shared.untrack(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::protocol::{ResponseHead, http};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn local(pattern: &str) -> Listener {
        let config = ListenerConfig::new(0)
            .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .with_path(pattern)
            .unwrap();
        Listener::bind(config).await.unwrap()
    }

    /// Send `request` over a fresh socket and return the parsed response.
    async fn exchange(addr: SocketAddr, request: &str) -> ResponseHead {
        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        tcp.read_to_end(&mut response).await.unwrap();
        ResponseHead::parse(&response).unwrap()
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let listener = local("/").await;
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.connections().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_path_gets_404() {
        let listener = local("^/chat$").await;
        let request = "GET /other HTTP/1.1\r\nHost: x\r\n\
            Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let response = exchange(listener.local_addr(), request).await;
        assert_eq!(response.status, 404);
        assert_eq!(response.headers.get("connection"), Some("close"));
    }

    #[tokio::test]
    async fn test_missing_key_gets_400() {
        let listener = local("/").await;
        let request = "GET /chat HTTP/1.1\r\nHost: x\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let response = exchange(listener.local_addr(), request).await;
        assert_eq!(response.status, 400);
        assert!(listener.connections().is_empty());
    }

    /// Run a valid upgrade over a fresh socket and return the status.
    async fn upgrade_status(addr: SocketAddr) -> u16 {
        let request = http::write_request(
            "GET",
            "/",
            &[
                ("Host", "x"),
                ("Sec-WebSocket-Version", "13"),
                ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ],
        );
        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(&request).await.unwrap();
        let mut stream = BufReader::new(tcp);
        let head = http::read_head(&mut stream, &Limits::default()).await.unwrap();
        let response = ResponseHead::parse(&head).unwrap();
        if response.status == 101 {
            assert_eq!(
                response.headers.get("sec-websocket-accept"),
                Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
            );
        }
        response.status
    }

    #[tokio::test]
    async fn test_accept_loop_survives_bad_clients() {
        let listener = local("/").await;
        let addr = listener.local_addr();

        // A client that disconnects mid-request must not stop the listener.
        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        drop(tcp);

        assert_eq!(upgrade_status(addr).await, 101);
    }

    #[tokio::test]
    async fn test_oversized_request_head_is_dropped() {
        let listener = local("/").await;
        let addr = listener.local_addr();

        let mut tcp = TcpStream::connect(addr).await.unwrap();
        let mut flood = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        flood.resize(64 * 1024, b'a');
        // The server may hang up before the whole flood is written.
        let _ = tcp.write_all(&flood).await;
        let mut response = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), tcp.read_to_end(&mut response)).await;
        assert!(!response.starts_with(b"HTTP/1.1 101"));
        assert!(listener.connections().is_empty());

        assert_eq!(upgrade_status(addr).await, 101);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let listener = local("/").await;
        let addr = listener.local_addr();
        listener.shutdown();
        // Give the runtime a chance to drop the aborted accept task.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
