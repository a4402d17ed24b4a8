//! WebSocket frame encoding and streaming decoding (RFC 6455 Section 5.2).

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::CloseFrame;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// A WebSocket frame as defined in RFC 6455.
///
/// ## Frame Structure
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode |M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)   |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                         Masking key (if present)              |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
///
/// A frame built for sending holds its logical payload and masks it while
/// encoding. A frame read off the wire holds the payload exactly as received,
/// still masked when a key is present; call [`Frame::decode`] for the
/// logical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Reserved bit 1. Always false here since no extension is negotiated.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    /// Masking key, present on client-to-server frames.
    pub mask: Option<[u8; 4]>,
    payload: Vec<u8>,
}

impl Frame {
    /// Create an unmasked frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Create a close frame carrying `close`'s code and reason.
    #[must_use]
    pub fn close(close: &CloseFrame) -> Self {
        Self::new(true, OpCode::Close, close.to_payload())
    }

    /// Set the masking key applied when encoding.
    #[must_use]
    pub fn with_mask(mut self, mask: Option<[u8; 4]>) -> Self {
        self.mask = mask;
        self
    }

    /// The stored payload bytes (masked if this frame was read with a key).
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The logical payload: the stored bytes XORed with the cyclic mask if
    /// one is present, otherwise the stored bytes unchanged.
    #[must_use]
    pub fn decode(&self) -> Vec<u8> {
        self.clone().into_decoded()
    }

    /// Consume the frame and return its logical payload.
    #[must_use]
    pub fn into_decoded(self) -> Vec<u8> {
        let mut payload = self.payload;
        if let Some(mask) = self.mask {
            apply_mask_fast(&mut payload, mask);
        }
        payload
    }

    /// Check the invariants a frame must satisfy before it is sent.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control frame payload > 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::ProtocolViolation(
                    "Control frames cannot be fragmented".into(),
                ));
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Calculate the number of bytes [`Frame::encode`] produces.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask_size = if self.mask.is_some() { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }

    /// Append the wire form of this frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let payload_len = self.payload.len();
        buf.reserve(self.wire_size());

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        buf.put_u8(byte0);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        if payload_len <= 125 {
            buf.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(payload_len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(payload_len as u64);
        }

        match self.mask {
            Some(mask) => {
                buf.put_slice(&mask);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask_fast(&mut buf[start..], mask);
            }
            None => buf.put_slice(&self.payload),
        }
    }

    /// Encode this frame to its wire form.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Read exactly one frame from `reader`.
    ///
    /// Blocks until the whole frame has arrived. The returned frame keeps the
    /// payload as it appeared on the wire. An 8-byte extended length is
    /// truncated to its low 32 bits.
    ///
    /// # Errors
    ///
    /// - `Error::Stream` if the stream ends before the frame is complete
    /// - `Error::ReservedOpcode` if the opcode is reserved
    /// - `Error::FrameTooLarge` if the payload length exceeds
    ///   `limits.max_frame_size` (checked before the payload is allocated)
    /// - `Error::Io` for any other read failure
    pub async fn read_from<R>(reader: &mut R, limits: &Limits) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 2];
        read_exact_or(reader, &mut head, "invalid byte").await?;

        let byte0 = head[0];
        let byte1 = head[1];
        let fin = (byte0 & 0x80) != 0;
        let rsv1 = (byte0 & 0x40) != 0;
        let rsv2 = (byte0 & 0x20) != 0;
        let rsv3 = (byte0 & 0x10) != 0;
        let masked = (byte1 & 0x80) != 0;

        let payload_len = match byte1 & 0x7F {
            127 => {
                let mut ext = [0u8; 8];
                read_exact_or(reader, &mut ext, "truncated length").await?;
                u32::from_be_bytes([ext[4], ext[5], ext[6], ext[7]]) as usize
            }
            126 => {
                let mut ext = [0u8; 2];
                read_exact_or(reader, &mut ext, "truncated length").await?;
                u16::from_be_bytes(ext) as usize
            }
            len => len as usize,
        };

        let mask = if masked {
            let mut key = [0u8; 4];
            read_exact_or(reader, &mut key, "truncated mask").await?;
            Some(key)
        } else {
            None
        };

        // Opcode legality is checked only after the header is consumed so a
        // caller that keeps reading stays aligned on frame boundaries.
        let opcode = OpCode::from_u8(byte0)?;

        limits.check_frame_size(payload_len)?;

        let mut payload = vec![0u8; payload_len];
        read_exact_or(reader, &mut payload, "truncated payload").await?;

        Ok(Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask,
            payload,
        })
    }
}

async fn read_exact_or<R>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::Stream(what.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_LIMIT: Limits = Limits::new(usize::MAX, usize::MAX, usize::MAX, 0);
    const RFC_MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    async fn read(bytes: &[u8]) -> Result<Frame> {
        let mut reader = bytes;
        Frame::read_from(&mut reader, &NO_LIMIT).await
    }

    // RFC 6455 Section 5.7 examples

    #[test]
    fn test_encode_unmasked_hello() {
        let frame = Frame::text("Hello");
        assert_eq!(
            frame.encode().as_ref(),
            &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]
        );
    }

    #[test]
    fn test_encode_masked_hello() {
        let frame = Frame::text("Hello").with_mask(Some(RFC_MASK));
        assert_eq!(
            frame.encode().as_ref(),
            &[
                0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58
            ]
        );
    }

    #[test]
    fn test_encode_unmasked_fragments() {
        let first = Frame::new(false, OpCode::Text, b"Hel".to_vec());
        let last = Frame::new(true, OpCode::Continuation, b"lo".to_vec());
        assert_eq!(first.encode().as_ref(), &[0x01, 0x03, 0x48, 0x65, 0x6c]);
        assert_eq!(last.encode().as_ref(), &[0x80, 0x02, 0x6c, 0x6f]);
    }

    #[test]
    fn test_encode_ping_and_masked_pong() {
        assert_eq!(
            Frame::ping("Hello").encode().as_ref(),
            &[0x89, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]
        );
        assert_eq!(
            Frame::pong("Hello").with_mask(Some(RFC_MASK)).encode().as_ref(),
            &[
                0x8a, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58
            ]
        );
    }

    #[test]
    fn test_encode_reserved_bits() {
        let mut frame = Frame::binary(vec![]);
        frame.rsv1 = true;
        frame.rsv3 = true;
        assert_eq!(frame.encode()[0], 0x80 | 0x40 | 0x10 | 0x02);
    }

    #[test]
    fn test_length_field_boundaries() {
        // (payload length, indicator, header length)
        let cases = [
            (0usize, 0u8, 2usize),
            (125, 125, 2),
            (126, 126, 4),
            (65535, 126, 4),
            (65536, 127, 10),
        ];
        for (len, indicator, header_len) in cases {
            let frame = Frame::binary(vec![0xab; len]);
            let encoded = frame.encode();
            assert_eq!(encoded[1] & 0x7f, indicator, "indicator for {}", len);
            assert_eq!(encoded.len(), header_len + len, "size for {}", len);
            assert_eq!(frame.wire_size(), encoded.len());
        }

        let encoded = Frame::binary(vec![0; 65535]).encode();
        assert_eq!(&encoded[2..4], &[0xff, 0xff]);

        let encoded = Frame::binary(vec![0; 65536]).encode();
        assert_eq!(&encoded[2..10], &[0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_masked_size_includes_key() {
        let frame = Frame::binary(vec![1; 200]).with_mask(Some([1, 2, 3, 4]));
        assert_eq!(frame.encode().len(), 2 + 2 + 4 + 200);
    }

    #[tokio::test]
    async fn test_read_unmasked() {
        let frame = read(&[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f])
            .await
            .unwrap();
        assert!(frame.fin);
        assert!(!frame.rsv1 && !frame.rsv2 && !frame.rsv3);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.mask, None);
        assert_eq!(frame.payload(), b"Hello");
        assert_eq!(frame.decode(), b"Hello");
    }

    #[tokio::test]
    async fn test_read_masked_keeps_wire_payload() {
        let frame = read(&[
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ])
        .await
        .unwrap();
        assert_eq!(frame.mask, Some(RFC_MASK));
        assert_eq!(frame.payload(), &[0x7f, 0x9f, 0x4d, 0x51, 0x58]);
        assert_eq!(frame.decode(), b"Hello");
        assert_eq!(frame.into_decoded(), b"Hello");
    }

    #[tokio::test]
    async fn test_read_extended_lengths() {
        let mut data = vec![0x82, 0x7e, 0x01, 0x00];
        data.extend(vec![0xab; 256]);
        let frame = read(&data).await.unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload().len(), 256);

        let mut data = vec![0x82, 0x7f];
        data.extend(65536u64.to_be_bytes());
        data.extend(vec![0xcd; 65536]);
        let frame = read(&data).await.unwrap();
        assert_eq!(frame.payload().len(), 65536);
        assert!(frame.payload().iter().all(|&b| b == 0xcd));
    }

    #[tokio::test]
    async fn test_read_64bit_length_uses_low_word() {
        // High word set: only the low 32 bits (3) are honored.
        let data = [0x82, 0x7f, 0, 0, 0, 1, 0, 0, 0, 3, 7, 8, 9];
        let frame = read(&data).await.unwrap();
        assert_eq!(frame.payload(), &[7, 8, 9]);
    }

    #[tokio::test]
    async fn test_read_empty_stream_fails() {
        assert_eq!(read(&[]).await, Err(Error::Stream("invalid byte".into())));
    }

    #[tokio::test]
    async fn test_read_single_byte_fails() {
        assert_eq!(
            read(&[0x81]).await,
            Err(Error::Stream("invalid byte".into()))
        );
    }

    #[tokio::test]
    async fn test_read_truncated_parts_fail() {
        assert!(matches!(read(&[0x82, 0x7e, 0x01]).await, Err(Error::Stream(_))));
        assert!(matches!(
            read(&[0x81, 0x85, 0x37, 0xfa]).await,
            Err(Error::Stream(_))
        ));
        assert!(matches!(
            read(&[0x81, 0x05, 0x48, 0x65]).await,
            Err(Error::Stream(_))
        ));
    }

    #[tokio::test]
    async fn test_read_reserved_opcode() {
        assert_eq!(read(&[0x83, 0x00]).await, Err(Error::ReservedOpcode(0x3)));
    }

    #[tokio::test]
    async fn test_read_over_limit() {
        let mut reader: &[u8] = &[0x82, 0x7e, 0x01, 0x00];
        let limits = Limits::new(255, 1024, 1024, 0);
        let result = Frame::read_from(&mut reader, &limits).await;
        assert_eq!(result, Err(Error::FrameTooLarge { size: 256, max: 255 }));
    }

    #[tokio::test]
    async fn test_read_consecutive_frames() {
        let mut data = Frame::new(false, OpCode::Text, b"Hel".to_vec())
            .encode()
            .to_vec();
        data.extend_from_slice(&Frame::new(true, OpCode::Continuation, b"lo".to_vec()).encode());

        let mut reader = data.as_slice();
        let first = Frame::read_from(&mut reader, &NO_LIMIT).await.unwrap();
        let second = Frame::read_from(&mut reader, &NO_LIMIT).await.unwrap();
        assert!(!first.fin);
        assert_eq!(first.opcode, OpCode::Text);
        assert!(second.fin);
        assert_eq!(second.opcode, OpCode::Continuation);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_validate_control_frames() {
        let mut ping = Frame::ping(b"test".to_vec());
        assert!(ping.validate().is_ok());
        ping.fin = false;
        assert!(matches!(ping.validate(), Err(Error::ProtocolViolation(_))));

        let big = Frame::pong(vec![0u8; 126]);
        assert_eq!(big.validate(), Err(Error::ControlFrameTooLarge(126)));

        let data = Frame::new(false, OpCode::Binary, vec![0u8; 1000]);
        assert!(data.validate().is_ok());
    }

    #[test]
    fn test_close_frame_payload() {
        let frame = Frame::close(&CloseFrame::new(1001, "bye"));
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(frame.payload(), &[0x03, 0xe9, b'b', b'y', b'e']);
    }
}
