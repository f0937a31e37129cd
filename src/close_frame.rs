use bytes::{BufMut, Bytes, BytesMut};

use crate::{CloseCode, error::ProtocolError};

/// The parsed payload of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The reason as a code.
    code: CloseCode,
    /// The reason as text string.
    reason: String,
}

impl CloseFrame {
    /// Creates a new [`CloseFrame`].
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a [`CloseFrame`] with an empty reason.
    pub fn no_reason(code: CloseCode) -> Self {
        Self::new(code, "")
    }

    /// Returns the close code.
    pub const fn code(&self) -> CloseCode {
        self.code
    }

    /// Returns the reason as a string slice.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Parses a close payload.
    ///
    /// An empty payload carries no status and yields `None`.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>, ProtocolError> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(ProtocolError::InvalidCloseFrame),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));

                if !code.is_allowed() {
                    return Err(ProtocolError::InvalidCloseCode { code });
                }

                let reason = core::str::from_utf8(&payload[2..])
                    .map_err(|_| ProtocolError::InvalidCloseFrame)?;

                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Encodes the frame into a close payload.
    pub fn to_payload(&self) -> Bytes {
        let mut payload = BytesMut::with_capacity(2 + self.reason.len());

        payload.put_u16(self.code.into_u16());
        payload.put_slice(self.reason.as_bytes());

        payload.freeze()
    }
}

impl From<CloseFrame> for Bytes {
    fn from(frame: CloseFrame) -> Self {
        frame.to_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_has_no_status() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);
    }

    #[test]
    fn single_byte_payload_is_invalid() {
        assert_eq!(
            CloseFrame::parse(&[0x03]).unwrap_err(),
            ProtocolError::InvalidCloseFrame
        );
    }

    #[test]
    fn code_and_reason() {
        let payload = CloseFrame::new(CloseCode::Away, "bye").to_payload();

        assert_eq!(&payload[..], b"\x03\xe9bye");

        let frame = CloseFrame::parse(&payload).unwrap().unwrap();

        assert_eq!(frame.code(), CloseCode::Away);
        assert_eq!(frame.reason(), "bye");
    }

    #[test]
    fn reserved_code_is_rejected() {
        let payload = 1006u16.to_be_bytes();

        assert_eq!(
            CloseFrame::parse(&payload).unwrap_err(),
            ProtocolError::InvalidCloseCode {
                code: CloseCode::Abnormal
            }
        );
    }

    #[test]
    fn reason_must_be_utf8() {
        assert_eq!(
            CloseFrame::parse(&[0x03, 0xe8, 0xff, 0xfe]).unwrap_err(),
            ProtocolError::InvalidCloseFrame
        );
    }
}
