//! Which end of the connection this side is.

use super::ConnectionState;

/// Connection role.
///
/// Decides outbound masking: clients mask every frame they send, servers
/// never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dialed out and ran the client handshake.
    Client,
    /// Accepted by a [`Listener`](crate::Listener).
    Server,
}

impl Role {
    /// Returns `true` if frames sent in this role carry a mask.
    #[inline]
    #[must_use]
    pub const fn masks_outgoing(self) -> bool {
        matches!(self, Role::Client)
    }

    /// State a connection starts in.
    ///
    /// Server connections are built after the handshake has already been
    /// validated, so they start open.
    #[must_use]
    pub const fn initial_state(self) -> ConnectionState {
        match self {
            Role::Client => ConnectionState::Connecting,
            Role::Server => ConnectionState::Open,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Client => "client",
            Role::Server => "server",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_by_role() {
        assert!(Role::Client.masks_outgoing());
        assert!(!Role::Server.masks_outgoing());
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(Role::Client.initial_state(), ConnectionState::Connecting);
        assert_eq!(Role::Server.initial_state(), ConnectionState::Open);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.to_string(), "server");
    }
}
