//! Typed observers for connection events.
//!
//! Each event kind has its own trait, implemented for any matching closure,
//! so `conn.on_message(|conn, msg| ...)` works without boxing by hand.
//! Observers run synchronously on the connection's receive task, in
//! registration order. Registration is additive and may happen before or
//! after the connection opens.

use std::sync::{Arc, PoisonError, RwLock};

use crate::message::{CloseFrame, Message};

use super::Connection;

/// Called once the connection is open.
pub trait OpenObserver: Send + Sync {
    /// Handle the open event.
    fn on_open(&self, conn: &Connection);
}

/// Called for every complete Text or Binary message.
pub trait MessageObserver: Send + Sync {
    /// Handle a reassembled message.
    fn on_message(&self, conn: &Connection, message: &Message);
}

/// Called for every Ping frame, with its payload.
pub trait PingObserver: Send + Sync {
    /// Handle a ping.
    fn on_ping(&self, conn: &Connection, payload: &[u8]);
}

/// Called for every Pong frame, with its payload.
pub trait PongObserver: Send + Sync {
    /// Handle a pong.
    fn on_pong(&self, conn: &Connection, payload: &[u8]);
}

/// Called exactly once when the connection closes.
pub trait CloseObserver: Send + Sync {
    /// Handle the close event.
    fn on_close(&self, conn: &Connection, frame: &CloseFrame);
}

/// Called by a [`Listener`](crate::Listener) for every upgraded connection,
/// before the connection's open observers.
pub trait ConnectionObserver: Send + Sync {
    /// Handle a new connection.
    fn on_connection(&self, conn: &Connection);
}

impl<F> OpenObserver for F
where
    F: Fn(&Connection) + Send + Sync,
{
    fn on_open(&self, conn: &Connection) {
        self(conn)
    }
}

impl<F> MessageObserver for F
where
    F: Fn(&Connection, &Message) + Send + Sync,
{
    fn on_message(&self, conn: &Connection, message: &Message) {
        self(conn, message)
    }
}

impl<F> PingObserver for F
where
    F: Fn(&Connection, &[u8]) + Send + Sync,
{
    fn on_ping(&self, conn: &Connection, payload: &[u8]) {
        self(conn, payload)
    }
}

impl<F> PongObserver for F
where
    F: Fn(&Connection, &[u8]) + Send + Sync,
{
    fn on_pong(&self, conn: &Connection, payload: &[u8]) {
        self(conn, payload)
    }
}

impl<F> CloseObserver for F
where
    F: Fn(&Connection, &CloseFrame) + Send + Sync,
{
    fn on_close(&self, conn: &Connection, frame: &CloseFrame) {
        self(conn, frame)
    }
}

impl<F> ConnectionObserver for F
where
    F: Fn(&Connection) + Send + Sync,
{
    fn on_connection(&self, conn: &Connection) {
        self(conn)
    }
}

/// Ordered, append-only set of observers.
///
/// Dispatch works on a snapshot, so the lock is never held while an
/// observer runs and an observer may register further observers.
pub(crate) struct Observers<T: ?Sized> {
    list: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for Observers<T> {
    fn default() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Observers<T> {
    pub(crate) fn push(&self, observer: Arc<T>) {
        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.list.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn clear(&self) {
        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// The per-connection observer sets.
#[derive(Default)]
pub(crate) struct EventObservers {
    pub(crate) open: Observers<dyn OpenObserver>,
    pub(crate) message: Observers<dyn MessageObserver>,
    pub(crate) ping: Observers<dyn PingObserver>,
    pub(crate) pong: Observers<dyn PongObserver>,
    pub(crate) close: Observers<dyn CloseObserver>,
}

impl EventObservers {
    /// Drop every observer; called once the connection is closed.
    pub(crate) fn release(&self) {
        self.open.clear();
        self.message.clear();
        self.ping.clear();
        self.pong.clear();
        self.close.clear();
    }
}
