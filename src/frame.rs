use bytes::{Bytes, BytesMut};

use crate::OpCode;

/// A WebSocket frame.
///
/// Inbound frames keep their payload masked until [`Frame::unmask`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    fin: bool,
    /// The opcode of the frame.
    opcode: OpCode,
    /// The masking key of the frame, if any.
    mask: Option<[u8; 4]>,
    /// The payload of the frame.
    payload: Bytes,
}

impl Frame {
    /// Creates a new `Frame` instance.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: Bytes) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload,
        }
    }

    /// Returns whether this is the final frame in a message.
    pub const fn is_final(&self) -> bool {
        self.fin
    }

    /// Returns the opcode of the frame.
    pub const fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Returns the masking key of the frame, if any.
    pub const fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Returns the payload of the frame.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Removes the mask from the payload. No-op for unmasked frames.
    pub fn unmask(&mut self) {
        let Some(mask) = self.mask.take() else {
            return;
        };

        let mut payload = match core::mem::take(&mut self.payload).try_into_mut() {
            Ok(payload) => payload,
            Err(shared) => BytesMut::from(&shared[..]),
        };

        crate::mask::apply(&mut payload, mask);

        self.payload = payload.freeze();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmask_clears_key() {
        let mut payload = *b"ping";
        crate::mask::apply(&mut payload, [9, 8, 7, 6]);

        let mut frame = Frame::new(
            true,
            OpCode::Ping,
            Some([9, 8, 7, 6]),
            Bytes::copy_from_slice(&payload),
        );
        frame.unmask();

        assert_eq!(frame.mask(), None);
        assert_eq!(&frame.payload()[..], b"ping");

        frame.unmask();
        assert_eq!(&frame.payload()[..], b"ping");
    }

    #[test]
    fn unmask_shared_payload() {
        let shared = Bytes::from_static(&[1, 1, 1, 1]);

        let mut frame = Frame::new(true, OpCode::Binary, Some([1, 1, 1, 1]), shared.clone());
        frame.unmask();

        assert_eq!(&frame.payload()[..], &[0, 0, 0, 0]);
        assert_eq!(&shared[..], &[1, 1, 1, 1]);
    }
}
