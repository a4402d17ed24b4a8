//! Splitting an outgoing payload into a fragmentation run.

use std::iter::Peekable;
use std::slice::Chunks;

use crate::protocol::{Frame, OpCode};

/// Iterator over the frames of one fragmented message.
///
/// The first frame carries the message opcode, the rest use
/// `OpCode::Continuation`, and only the last has `fin` set. An empty payload
/// still yields one (final) frame.
pub struct Fragmenter<'a> {
    chunks: Peekable<Chunks<'a, u8>>,
    opcode: OpCode,
    emitted: usize,
}

impl<'a> Fragmenter<'a> {
    /// Split `payload` into frames of at most `fragment_size` bytes.
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            chunks: payload.chunks(fragment_size.max(1)).peekable(),
            opcode,
            emitted: 0,
        }
    }
}

impl Iterator for Fragmenter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let opcode = if self.emitted == 0 {
            self.opcode
        } else {
            OpCode::Continuation
        };
        let frame = match self.chunks.next() {
            Some(chunk) => Frame::new(self.chunks.peek().is_none(), opcode, chunk.to_vec()),
            None if self.emitted == 0 => Frame::new(true, opcode, Vec::new()),
            None => return None,
        };
        self.emitted += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(frames: &[Frame]) -> Vec<(bool, OpCode, usize)> {
        frames
            .iter()
            .map(|f| (f.fin, f.opcode, f.payload().len()))
            .collect()
    }

    #[test]
    fn test_single_frame_when_payload_fits() {
        let frames: Vec<_> = Fragmenter::new(b"Hello", OpCode::Text, 1024).collect();
        assert_eq!(shape(&frames), vec![(true, OpCode::Text, 5)]);
        assert_eq!(frames[0].payload(), b"Hello");
    }

    #[test]
    fn test_uneven_split() {
        let payload = vec![0xCD; 25];
        let frames: Vec<_> = Fragmenter::new(&payload, OpCode::Binary, 10).collect();
        assert_eq!(
            shape(&frames),
            vec![
                (false, OpCode::Binary, 10),
                (false, OpCode::Continuation, 10),
                (true, OpCode::Continuation, 5),
            ]
        );
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let payload = vec![0xAB; 20];
        let frames: Vec<_> = Fragmenter::new(&payload, OpCode::Text, 10).collect();
        assert_eq!(
            shape(&frames),
            vec![(false, OpCode::Text, 10), (true, OpCode::Continuation, 10)]
        );
    }

    #[test]
    fn test_empty_payload_yields_one_frame() {
        let frames: Vec<_> = Fragmenter::new(b"", OpCode::Text, 16).collect();
        assert_eq!(shape(&frames), vec![(true, OpCode::Text, 0)]);
    }

    #[test]
    fn test_zero_fragment_size_is_clamped() {
        let frames: Vec<_> = Fragmenter::new(b"abc", OpCode::Binary, 0).collect();
        assert_eq!(frames.len(), 3);
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload().to_vec()).collect();
        assert_eq!(joined, b"abc");
    }
}
