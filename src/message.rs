use bytes::Bytes;

use crate::{OpCode, Role, frame::Frame, fragments::Fragments};

/// An application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text WebSocket message.
    Text(String),
    /// A binary WebSocket message.
    Binary(Bytes),
}

impl Message {
    /// Indicates whether a message is a text message.
    pub fn is_text(&self) -> bool {
        matches!(*self, Message::Text(_))
    }

    /// Indicates whether a message is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(*self, Message::Binary(_))
    }

    /// The opcode of the frame carrying this message.
    pub const fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        }
    }

    /// Get the length of the WebSocket message.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(payload) => payload.len(),
            Message::Binary(payload) => payload.len(),
        }
    }

    /// Returns true if the WebSocket message has no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the message and returns its payload.
    pub fn into_payload(self) -> Bytes {
        match self {
            Message::Text(payload) => Bytes::from(payload),
            Message::Binary(payload) => payload,
        }
    }

    pub(crate) fn into_frame(self, role: Role) -> Frame {
        role.frame(self.opcode(), self.into_payload())
    }

    /// Splits the message into frames of at most `fragment_size` payload bytes.
    pub(crate) fn into_fragments(self, role: Role, fragment_size: usize) -> Vec<Frame> {
        Fragments::new(self.opcode(), self.into_payload(), fragment_size)
            .map(|(fin, opcode, payload)| Frame::new(fin, opcode, role.mask_key(), payload))
            .collect()
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Message::Binary(payload)
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(payload))
    }
}

impl From<&[u8]> for Message {
    fn from(payload: &[u8]) -> Self {
        Message::Binary(Bytes::copy_from_slice(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Message::from("hi"), Message::Text(String::from("hi")));
        assert_eq!(
            Message::from(vec![1u8, 2]),
            Message::Binary(Bytes::from_static(&[1, 2]))
        );
        assert!(Message::from(&b""[..]).is_empty());
    }

    #[test]
    fn server_frame_is_final_and_unmasked() {
        let frame = Message::from("hi").into_frame(Role::Server);

        assert!(frame.is_final());
        assert_eq!(frame.opcode(), OpCode::Text);
        assert_eq!(frame.mask(), None);
        assert_eq!(&frame.payload()[..], b"hi");
    }

    #[test]
    fn fragments_are_masked_individually() {
        let frames = Message::from("Hello, world").into_fragments(Role::Client, 5);

        let shape: Vec<_> = frames.iter().map(|f| (f.is_final(), f.opcode())).collect();

        assert_eq!(
            shape,
            [
                (false, OpCode::Text),
                (false, OpCode::Continuation),
                (true, OpCode::Continuation),
            ]
        );
        assert!(frames.iter().all(|f| f.mask().is_some()));
    }
}
