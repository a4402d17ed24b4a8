//! Configuration and limits for WebSocket connections and listeners.

use std::net::SocketAddr;

use regex::Regex;

use crate::error::{Error, Result};

/// Configuration limits for WebSocket connections.
///
/// These limits bound the memory a single peer can make us allocate and the
/// work a misbehaving server can make a client do during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes.
    ///
    /// This applies to the total size after reassembling all fragments.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of the HTTP head exchanged during the handshake.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,

    /// Maximum number of 3xx redirects a client follows.
    ///
    /// Default: 5
    pub max_redirects: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_handshake_size: 8192,
            max_redirects: 5,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_handshake_size: usize,
        max_redirects: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_handshake_size,
            max_redirects,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that another redirect may be followed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyRedirects`] if `count` exceeds the configured maximum.
    pub const fn check_redirects(&self, count: usize) -> Result<()> {
        if count > self.max_redirects {
            Err(Error::TooManyRedirects {
                count,
                max: self.max_redirects,
            })
        } else {
            Ok(())
        }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size used by [`Connection::send_fragmented`](crate::Connection::send_fragmented).
    ///
    /// Default: 16 KB (16 * 1024)
    pub fragment_size: usize,

    /// Capacity of the buffered reader placed in front of the socket.
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,

    /// Answer every received Ping with a Pong carrying the same payload,
    /// before ping observers run.
    ///
    /// Default: true
    pub auto_pong: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            read_buffer_size: 8192,
            auto_pong: true,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set fragment size for outgoing messages.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Enable or disable automatic Pong replies.
    #[must_use]
    pub const fn with_auto_pong(mut self, enabled: bool) -> Self {
        self.auto_pong = enabled;
        self
    }
}

/// Configuration for a [`Listener`](crate::Listener).
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address the listening socket binds to.
    pub addr: SocketAddr,

    /// Pattern request paths must match for the upgrade to proceed.
    ///
    /// Matching uses [`Regex::is_match`], so an unanchored pattern matches
    /// anywhere in the path. Default: `/`
    pub path: Regex,

    /// Configuration handed to every accepted connection.
    pub connection: Config,
}

impl ListenerConfig {
    /// Listen on all interfaces at `port`, accepting every path.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            path: Regex::new("/").expect("static pattern"),
            connection: Config::default(),
        }
    }

    /// Listen on an explicit address.
    #[must_use]
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Restrict upgrades to paths matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if `pattern` is not a valid regex.
    pub fn with_path(mut self, pattern: &str) -> Result<Self> {
        self.path = Regex::new(pattern)
            .map_err(|e| Error::InvalidHandshake(format!("Invalid path pattern: {}", e)))?;
        Ok(self)
    }

    /// Set the per-connection configuration.
    #[must_use]
    pub fn with_connection_config(mut self, config: Config) -> Self {
        self.connection = config;
        self
    }
}
