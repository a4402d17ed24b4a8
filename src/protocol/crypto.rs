//! Randomness and digests used by the opening handshake and by frame masking.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The GUID appended to the client key in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Fill a fresh buffer of `len` bytes from the operating system's CSPRNG.
///
/// # Errors
///
/// Returns `Error::Io` if the system random source is unavailable.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf)
        .map_err(|e| Error::Io(format!("random source unavailable: {}", e)))?;
    Ok(buf)
}

/// Generate a random 4-byte masking key.
///
/// # Errors
///
/// Returns `Error::Io` if the system random source is unavailable.
pub fn mask_key() -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key)
        .map_err(|e| Error::Io(format!("random source unavailable: {}", e)))?;
    Ok(key)
}

/// Generate a Sec-WebSocket-Key: base64 of 16 random bytes.
///
/// # Errors
///
/// Returns `Error::Io` if the system random source is unavailable.
pub fn generate_key() -> Result<String> {
    random_bytes(16).map(|bytes| BASE64.encode(bytes))
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use cubesocket::protocol::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}
