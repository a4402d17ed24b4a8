use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, watch};

use crate::config::Config;
use crate::connection::fragmenter::Fragmenter;
use crate::connection::observer::{
    CloseObserver, EventObservers, MessageObserver, OpenObserver, PingObserver, PongObserver,
};
use crate::connection::state::AtomicState;
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::crypto::mask_key;
use crate::protocol::{Frame, MAX_CONTROL_FRAME_PAYLOAD, OpCode};

/// Byte stream a connection can run over.
///
/// Implemented for every `AsyncRead + AsyncWrite` type that can move
/// between tasks: `TcpStream`, TLS streams, `tokio::io::DuplexStream`.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased, buffered stream. The buffer is created before the handshake
/// so bytes read past the HTTP head stay available to the frame decoder.
pub(crate) type Stream = BufReader<Box<dyn Io>>;
pub(crate) type Reader = ReadHalf<Stream>;
type Writer = WriteHalf<Stream>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Write side of the socket plus the outbound fragmentation state.
///
/// The lock guarding this is held for the whole `write_all` + `flush` of a
/// frame so concurrent senders never interleave bytes on the wire. It is
/// never held across a read, so a stalled peer can block senders but not
/// the receive loop's frame decoding.
struct Outbound {
    writer: Option<Writer>,
    fragmenting: bool,
}

impl Outbound {
    async fn write(&mut self, frame: &Frame) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::ConnectionClosed)?;
        writer.write_all(&frame.encode()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}

struct Inner {
    id: u64,
    role: Role,
    peer_addr: Option<SocketAddr>,
    config: Config,
    state: AtomicState,
    outbound: Mutex<Outbound>,
    observers: EventObservers,
    close_notified: AtomicBool,
    closed: watch::Sender<bool>,
}

/// One full-duplex WebSocket session.
///
/// `Connection` is a cheap handle: clones share the same socket, state and
/// observers. A dedicated task reads frames, reassembles fragmented messages
/// and dispatches events to observers in arrival order. The send methods
/// may be called from any task, concurrently with the receive task.
///
/// ```rust,ignore
/// let conn = ClientBuilder::new("ws://localhost:9001/chat")?
///     .on_message(|_, msg| println!("{:?}", msg))
///     .connect()
///     .await?;
/// conn.send_text("hello").await?;
/// conn.close(CloseCode::Normal, "done").await?;
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Non-owning reference kept by a [`Listener`](crate::Listener).
#[derive(Clone)]
pub(crate) struct WeakConnection(Weak<Inner>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|inner| Connection { inner })
    }
}

impl Connection {
    /// Split `stream` and build the connection. The caller owns the returned
    /// read half and must eventually drive it with [`Connection::run`].
    pub(crate) fn new(
        stream: Stream,
        role: Role,
        config: Config,
        peer_addr: Option<SocketAddr>,
        observers: EventObservers,
    ) -> (Self, Reader) {
        let (reader, writer) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        let inner = Inner {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            role,
            peer_addr,
            config,
            state: AtomicState::new(role.initial_state()),
            outbound: Mutex::new(Outbound {
                writer: Some(writer),
                fragmenting: false,
            }),
            observers,
            close_notified: AtomicBool::new(false),
            closed,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            reader,
        )
    }

    /// Wrap an already-upgraded stream, skipping the handshake.
    ///
    /// The connection starts `Open` and its receive task is spawned
    /// immediately, so this must be called inside a tokio runtime. Frames
    /// that arrive before an observer is registered are not replayed to it.
    pub fn from_upgraded<S: Io>(stream: S, role: Role, config: Config) -> Self {
        let stream: Box<dyn Io> = Box::new(stream);
        let stream = BufReader::with_capacity(config.read_buffer_size, stream);
        let (conn, reader) = Self::new(stream, role, config, None, EventObservers::default());
        conn.inner.state.store(ConnectionState::Open);
        tokio::spawn(conn.clone().run(reader));
        conn
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }

    /// Process-unique connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Which side of the handshake this connection was.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Remote address, when the connection runs over a TCP socket.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    /// Returns `true` while data can be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().can_send()
    }

    /// The configuration this connection runs with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Wait until the connection is closed and close observers have run.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Register an open observer.
    pub fn on_open<F>(&self, f: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.add_open_observer(Arc::new(f));
    }

    /// Register a message observer.
    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        self.add_message_observer(Arc::new(f));
    }

    /// Register a ping observer.
    pub fn on_ping<F>(&self, f: F)
    where
        F: Fn(&Connection, &[u8]) + Send + Sync + 'static,
    {
        self.add_ping_observer(Arc::new(f));
    }

    /// Register a pong observer.
    pub fn on_pong<F>(&self, f: F)
    where
        F: Fn(&Connection, &[u8]) + Send + Sync + 'static,
    {
        self.add_pong_observer(Arc::new(f));
    }

    /// Register a close observer.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&Connection, &CloseFrame) + Send + Sync + 'static,
    {
        self.add_close_observer(Arc::new(f));
    }

    /// Register a typed open observer.
    pub fn add_open_observer(&self, observer: Arc<dyn OpenObserver>) {
        self.inner.observers.open.push(observer);
    }

    /// Register a typed message observer.
    pub fn add_message_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.inner.observers.message.push(observer);
    }

    /// Register a typed ping observer.
    pub fn add_ping_observer(&self, observer: Arc<dyn PingObserver>) {
        self.inner.observers.ping.push(observer);
    }

    /// Register a typed pong observer.
    pub fn add_pong_observer(&self, observer: Arc<dyn PongObserver>) {
        self.inner.observers.pong.push(observer);
    }

    /// Register a typed close observer.
    pub fn add_close_observer(&self, observer: Arc<dyn CloseObserver>) {
        self.inner.observers.close.push(observer);
    }

    /// Move a client connection from `Connecting` to `Open`.
    pub(crate) fn mark_open(&self) -> bool {
        self.inner
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Open)
    }

    pub(crate) fn notify_open(&self) {
        for observer in self.inner.observers.open.snapshot() {
            observer.on_open(self);
        }
    }

    /// Send a complete message as a single final frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` if the connection is not open
    /// - `Error::MessageTooLarge` if the payload exceeds `max_message_size`
    /// - `Error::Io` if the write fails
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.send_data(message.as_bytes(), true, message.is_binary())
            .await
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_data(text.as_bytes(), true, false).await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send_data(data, true, true).await
    }

    /// Send one data frame.
    ///
    /// `fin = false` starts (or continues) an outbound fragmentation run:
    /// the first frame of a run uses Text or Binary, every later frame of
    /// the run uses Continuation regardless of `binary`, and the frame with
    /// `fin = true` ends the run. Frames are masked when the role requires.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` if the connection is not open
    /// - `Error::MessageTooLarge` if the payload exceeds `max_message_size`
    /// - `Error::Io` if the write fails
    pub async fn send_data(&self, payload: &[u8], fin: bool, binary: bool) -> Result<()> {
        self.inner.config.limits.check_message_size(payload.len())?;
        let mut out = self.inner.outbound.lock().await;
        self.ensure_open()?;

        let opcode = if out.fragmenting {
            OpCode::Continuation
        } else if binary {
            OpCode::Binary
        } else {
            OpCode::Text
        };
        let frame = self.outgoing(Frame::new(fin, opcode, payload.to_vec()))?;
        out.write(&frame).await?;
        out.fragmenting = !fin;
        Ok(())
    }

    /// Send a message split into frames of `config.fragment_size` bytes.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` if a [`send_data`](Self::send_data) run
    ///   is still open
    /// - the errors of [`Connection::send`]
    pub async fn send_fragmented(&self, message: &Message) -> Result<()> {
        let payload = message.as_bytes();
        self.inner.config.limits.check_message_size(payload.len())?;
        let mut out = self.inner.outbound.lock().await;
        self.ensure_open()?;
        if out.fragmenting {
            return Err(Error::ProtocolViolation(
                "A fragmented message is already in progress".into(),
            ));
        }

        let opcode = if message.is_binary() {
            OpCode::Binary
        } else {
            OpCode::Text
        };
        for frame in Fragmenter::new(payload, opcode, self.inner.config.fragment_size) {
            let frame = self.outgoing(frame)?;
            out.write(&frame).await?;
        }
        Ok(())
    }

    /// Send a Ping; an empty payload sends a ping without application data.
    ///
    /// # Errors
    ///
    /// - `Error::ControlFrameTooLarge` if the payload exceeds 125 bytes
    /// - `Error::ConnectionClosed` if the connection is not open
    pub async fn ping(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send_control(Frame::ping(payload)).await
    }

    /// Send a Pong.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::ping`].
    pub async fn pong(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send_control(Frame::pong(payload)).await
    }

    /// Start the close handshake.
    ///
    /// Writes a Close frame carrying `code` and `reason` and returns without
    /// waiting; the receive task shuts the socket down when the peer's Close
    /// arrives. Does nothing if a Close was already sent.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for codes a Close frame must not carry:
    ///   anything outside 1000-1003, 1007-1014 and 3000-4999
    /// - `Error::ControlFrameTooLarge` if the reason is longer than 123 bytes
    pub async fn close(&self, code: impl Into<CloseCode>, reason: &str) -> Result<()> {
        let close = CloseFrame::new(code, reason);
        let raw = close.code.as_u16();
        if !close.code.is_sendable() {
            return Err(Error::InvalidCloseCode(raw));
        }
        self.send_close(Frame::close(&close)).await
    }

    /// Start the close handshake with an empty Close frame (no status code).
    ///
    /// # Errors
    ///
    /// `Error::Io` if the write fails.
    pub async fn close_without_status(&self) -> Result<()> {
        self.send_close(Frame::new(true, OpCode::Close, Vec::new()))
            .await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state().can_send() {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Apply the role's masking rule.
    fn outgoing(&self, frame: Frame) -> Result<Frame> {
        let mask = if self.inner.role.masks_outgoing() {
            Some(mask_key()?)
        } else {
            None
        };
        Ok(frame.with_mask(mask))
    }

    async fn send_control(&self, frame: Frame) -> Result<()> {
        frame.validate()?;
        let frame = self.outgoing(frame)?;
        let mut out = self.inner.outbound.lock().await;
        self.ensure_open()?;
        out.write(&frame).await
    }

    async fn send_close(&self, frame: Frame) -> Result<()> {
        frame.validate()?;
        let frame = self.outgoing(frame)?;
        let mut out = self.inner.outbound.lock().await;
        if !self
            .inner
            .state
            .transition(ConnectionState::Open, ConnectionState::Closing)
        {
            return Ok(());
        }
        tracing::debug!(id = self.inner.id, role = %self.inner.role, "close frame sent");
        out.write(&frame).await
    }

    /// Drive the receive loop until the connection is closed.
    pub(crate) async fn run(self, mut reader: Reader) {
        match self.receive(&mut reader).await {
            Ok(payload) => {
                let close = CloseFrame::parse(&payload);
                // Echo the status code; an empty Close, or one whose code must
                // not be sent, is answered with an empty Close.
                let reply = match payload.len() {
                    0 | 1 => Frame::new(true, OpCode::Close, Vec::new()),
                    _ if !close.code.is_sendable() => Frame::new(true, OpCode::Close, Vec::new()),
                    _ => Frame::close(&CloseFrame::new(close.code, "")),
                };
                tracing::debug!(
                    id = self.inner.id,
                    code = close.code.as_u16(),
                    reason = %close.reason,
                    "close frame received"
                );
                self.shutdown(reply, close).await;
            }
            Err(err) => {
                let close = match close_code_for(&err) {
                    Some(code) => {
                        tracing::warn!(
                            id = self.inner.id,
                            peer = ?self.inner.peer_addr,
                            code = code.as_u16(),
                            error = %err,
                            "closing connection after protocol error"
                        );
                        CloseFrame::new(code, close_reason(&err))
                    }
                    None => {
                        tracing::debug!(id = self.inner.id, error = %err, "receive loop ended");
                        CloseFrame::default()
                    }
                };
                self.shutdown(Frame::close(&close), close).await;
            }
        }
    }

    /// Read frames until a Close arrives; returns its unmasked payload.
    async fn receive(&self, reader: &mut Reader) -> Result<Vec<u8>> {
        let limits = &self.inner.config.limits;
        let mut run: Option<(OpCode, Vec<u8>)> = None;

        loop {
            let frame = Frame::read_from(reader, limits).await?;
            tracing::trace!(
                id = self.inner.id,
                opcode = %frame.opcode,
                fin = frame.fin,
                len = frame.payload().len(),
                "frame received"
            );
            frame.validate()?;
            if frame.rsv1 || frame.rsv2 || frame.rsv3 {
                return Err(Error::ProtocolViolation(
                    "Reserved bits set without a negotiated extension".into(),
                ));
            }

            let (opcode, fin) = (frame.opcode, frame.fin);
            let payload = frame.into_decoded();

            match opcode {
                OpCode::Close => return Ok(payload),
                OpCode::Ping => self.handle_ping(&payload).await,
                OpCode::Pong => {
                    for observer in self.inner.observers.pong.snapshot() {
                        observer.on_pong(self, &payload);
                    }
                }
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    let (start, mut buffer) = match (opcode, run.take()) {
                        (OpCode::Continuation, Some(run)) => run,
                        (OpCode::Continuation, None) => {
                            return Err(Error::ProtocolViolation(
                                "Continuation frame without a message in progress".into(),
                            ));
                        }
                        (_, Some(_)) => {
                            return Err(Error::ProtocolViolation(format!(
                                "{} frame while a fragmented message is in progress",
                                opcode
                            )));
                        }
                        (_, None) => (opcode, Vec::new()),
                    };

                    if buffer.is_empty() {
                        buffer = payload;
                    } else {
                        buffer.extend_from_slice(&payload);
                    }
                    limits.check_message_size(buffer.len())?;

                    if fin {
                        let message = Message::from_payload(start, buffer)?;
                        for observer in self.inner.observers.message.snapshot() {
                            observer.on_message(self, &message);
                        }
                    } else {
                        run = Some((start, buffer));
                    }
                }
            }
        }
    }

    async fn handle_ping(&self, payload: &[u8]) {
        if self.inner.config.auto_pong {
            if let Err(err) = self.send_control(Frame::pong(payload.to_vec())).await {
                tracing::debug!(id = self.inner.id, error = %err, "automatic pong failed");
            }
        }
        for observer in self.inner.observers.ping.snapshot() {
            observer.on_ping(self, payload);
        }
    }

    /// Best-effort `reply` (skipped if this side already sent a Close), then
    /// close the socket, fire close observers once and release them.
    async fn shutdown(&self, reply: Frame, close: CloseFrame) {
        {
            let mut out = self.inner.outbound.lock().await;
            if self
                .inner
                .state
                .transition(ConnectionState::Open, ConnectionState::Closing)
            {
                if let Ok(reply) = self.outgoing(reply) {
                    let _ = out.write(&reply).await;
                }
            }
            out.shutdown().await;
        }
        self.inner.state.store(ConnectionState::Closed);

        if !self.inner.close_notified.swap(true, Ordering::AcqRel) {
            for observer in self.inner.observers.close.snapshot() {
                observer.on_close(self, &close);
            }
        }
        self.inner.observers.release();
        self.inner.closed.send_replace(true);
        tracing::debug!(
            id = self.inner.id,
            code = close.code.as_u16(),
            "connection closed"
        );
    }
}

/// Close code to send for an error that ended the receive loop; `None` for
/// stream failures, which close normally.
fn close_code_for(err: &Error) -> Option<CloseCode> {
    match err {
        Error::ProtocolViolation(_) | Error::ReservedOpcode(_) | Error::ControlFrameTooLarge(_) => {
            Some(CloseCode::ProtocolError)
        }
        Error::InvalidUtf8 => Some(CloseCode::InvalidPayload),
        Error::FrameTooLarge { .. } | Error::MessageTooLarge { .. } => {
            Some(CloseCode::MessageTooBig)
        }
        _ => None,
    }
}

/// The error text, cut to fit a Close frame payload.
fn close_reason(err: &Error) -> String {
    let mut reason = err.to_string();
    let max = MAX_CONTROL_FRAME_PAYLOAD - 2;
    if reason.len() > max {
        let mut end = max;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("peer_addr", &self.inner.peer_addr)
            .finish()
    }
}
