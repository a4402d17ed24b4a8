//! WebSocket protocol core (RFC 6455): framing, masking and the opening
//! handshake.

pub mod crypto;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod mask;
pub mod opcode;
pub mod uri;

pub use crypto::{WS_GUID, compute_accept_key, generate_key};
pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{ClientHandshake, Rejection};
pub use http::{Headers, RequestHead, ResponseHead};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
pub use uri::WsUri;
