use bytes::{Bytes, BytesMut};

use crate::{OpCode, error::ProtocolError};

/// Splits a payload into `(fin, opcode, payload)` fragments.
///
/// The first fragment carries the message opcode, the rest are continuations.
/// An empty payload still yields one final fragment.
#[derive(Debug)]
pub(crate) struct Fragments {
    opcode: OpCode,
    data: Bytes,
    fragment_size: usize,
    first: bool,
}

impl Fragments {
    pub(crate) fn new(opcode: OpCode, data: Bytes, fragment_size: usize) -> Self {
        Self {
            opcode,
            data,
            fragment_size: fragment_size.max(1),
            first: true,
        }
    }
}

impl Iterator for Fragments {
    type Item = (bool, OpCode, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.first && self.data.is_empty() {
            return None;
        }

        let opcode = if self.first {
            self.opcode
        } else {
            OpCode::Continuation
        };

        self.first = false;

        let payload = self.data.split_to(self.fragment_size.min(self.data.len()));

        Some((self.data.is_empty(), opcode, payload))
    }
}

#[derive(Debug)]
struct Partial {
    opcode: OpCode,
    buffer: BytesMut,
}

/// Reassembles fragmented inbound messages.
#[derive(Debug)]
pub(crate) struct Assembler {
    max_len: usize,
    partial: Option<Partial>,
}

impl Assembler {
    pub(crate) fn new(max_len: usize) -> Self {
        Self {
            max_len,
            partial: None,
        }
    }

    /// Feeds one data frame.
    ///
    /// Returns the complete message once its final fragment arrived.
    pub(crate) fn push(
        &mut self,
        fin: bool,
        opcode: OpCode,
        payload: Bytes,
    ) -> Result<Option<(OpCode, Bytes)>, ProtocolError> {
        match opcode {
            OpCode::Continuation => {
                let Some(partial) = self.partial.as_mut() else {
                    return Err(ProtocolError::InvalidContinuationFrame);
                };

                if partial.buffer.len() + payload.len() > self.max_len {
                    self.partial = None;

                    return Err(ProtocolError::MessageTooLarge);
                }

                partial.buffer.extend_from_slice(&payload);

                if !fin {
                    return Ok(None);
                }

                Ok(self
                    .partial
                    .take()
                    .map(|partial| (partial.opcode, partial.buffer.freeze())))
            }
            _ => {
                if self.partial.is_some() {
                    self.partial = None;

                    return Err(ProtocolError::InvalidFragment);
                }

                if fin {
                    return Ok(Some((opcode, payload)));
                }

                self.partial = Some(Partial {
                    opcode,
                    buffer: BytesMut::from(&payload[..]),
                });

                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_into_fragments() {
        let fragments: Vec<_> =
            Fragments::new(OpCode::Text, Bytes::from_static(b"Hello, world"), 5).collect();

        assert_eq!(
            fragments,
            [
                (false, OpCode::Text, Bytes::from_static(b"Hello")),
                (false, OpCode::Continuation, Bytes::from_static(b", wor")),
                (true, OpCode::Continuation, Bytes::from_static(b"ld")),
            ]
        );
    }

    #[test]
    fn empty_payload_is_one_final_fragment() {
        let fragments: Vec<_> = Fragments::new(OpCode::Binary, Bytes::new(), 5).collect();

        assert_eq!(fragments, [(true, OpCode::Binary, Bytes::new())]);
    }

    #[test]
    fn reassemble() {
        let mut assembler = Assembler::new(64);

        assert_eq!(
            assembler
                .push(false, OpCode::Binary, Bytes::from_static(b"ab"))
                .unwrap(),
            None
        );
        assert_eq!(
            assembler
                .push(false, OpCode::Continuation, Bytes::from_static(b"cd"))
                .unwrap(),
            None
        );
        assert_eq!(
            assembler
                .push(true, OpCode::Continuation, Bytes::from_static(b"e"))
                .unwrap(),
            Some((OpCode::Binary, Bytes::from_static(b"abcde")))
        );
    }

    #[test]
    fn unfragmented_passes_through() {
        let mut assembler = Assembler::new(64);

        assert_eq!(
            assembler
                .push(true, OpCode::Text, Bytes::from_static(b"whole"))
                .unwrap(),
            Some((OpCode::Text, Bytes::from_static(b"whole")))
        );
    }

    #[test]
    fn continuation_without_start() {
        let mut assembler = Assembler::new(64);

        assert_eq!(
            assembler
                .push(true, OpCode::Continuation, Bytes::new())
                .unwrap_err(),
            ProtocolError::InvalidContinuationFrame
        );
    }

    #[test]
    fn new_message_inside_fragmented_one() {
        let mut assembler = Assembler::new(64);

        assembler
            .push(false, OpCode::Text, Bytes::from_static(b"a"))
            .unwrap();

        assert_eq!(
            assembler
                .push(true, OpCode::Binary, Bytes::new())
                .unwrap_err(),
            ProtocolError::InvalidFragment
        );
    }

    #[test]
    fn too_large() {
        let mut assembler = Assembler::new(3);

        assembler
            .push(false, OpCode::Binary, Bytes::from_static(b"ab"))
            .unwrap();

        assert_eq!(
            assembler
                .push(true, OpCode::Continuation, Bytes::from_static(b"cd"))
                .unwrap_err(),
            ProtocolError::MessageTooLarge
        );
    }
}
