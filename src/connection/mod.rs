//! WebSocket sessions: lifecycle state, observers and the receive loop.
//!
//! ## Connection Lifecycle
//!
//! 1. **Connecting** - client handshake in flight (client role only)
//! 2. **Open** - frames flow both ways; server connections start here
//! 3. **Closing** - a Close frame has been sent or received
//! 4. **Closed** - socket shut down, close observers have run

mod fragmenter;
mod observer;
mod role;
mod state;

#[allow(clippy::module_inception)]
mod connection;

pub(crate) use connection::{Reader, Stream, WeakConnection};
pub use connection::{Connection, Io};
pub use fragmenter::Fragmenter;
pub(crate) use observer::EventObservers;
pub use observer::{
    CloseObserver, ConnectionObserver, MessageObserver, OpenObserver, PingObserver, PongObserver,
};
pub(crate) use observer::Observers;
pub use role::Role;
pub use state::ConnectionState;
