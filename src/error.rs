//! Error types.

use embedded_io_async::ErrorKind;
use framez::{ReadError, WriteError};

use crate::{CloseCode, ConnectionState, Role};

/// Errors produced while decoding a frame header.
///
/// The codec skips the offending frame, so decoding can resume with the next one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// One of the RSV bits is set without a negotiated extension.
    #[error("Reserved bits must be zero")]
    ReservedBitsNotZero,
    /// The opcode is reserved.
    #[error("Invalid opcode: {opcode:#x}")]
    InvalidOpCode {
        /// The raw opcode.
        opcode: u8,
    },
    /// A close, ping or pong frame without the fin bit.
    #[error("Control frame fragmented")]
    ControlFrameFragmented,
    /// A control frame with a payload above 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,
    /// The payload exceeds the configured maximum.
    #[error("Payload too large: {len} bytes")]
    PayloadTooLarge {
        /// The announced payload length.
        len: u64,
    },
}

/// Errors produced while encoding into the write buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The encoded item does not fit the write buffer.
    #[error("Buffer too small")]
    BufferTooSmall,
}

/// Errors produced by the opening handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The target URI could not be parsed.
    #[error("Invalid URI")]
    InvalidUri,
    /// The response status is not `101 Switching Protocols`.
    #[error("Invalid status code: {code:?}")]
    InvalidStatusCode {
        /// The received status code.
        code: Option<u16>,
    },
    /// The `Upgrade` header is missing or is not `websocket`.
    #[error("Missing or invalid upgrade header")]
    MissingOrInvalidUpgrade,
    /// The `Connection` header is missing or does not contain `upgrade`.
    #[error("Missing or invalid connection header")]
    MissingOrInvalidConnection,
    /// The `Sec-WebSocket-Accept` header is missing or does not match the sent key.
    #[error("Missing or invalid accept header")]
    MissingOrInvalidAccept,
    /// The request method is not `GET`.
    #[error("Wrong http method")]
    WrongHttpMethod,
    /// The request is not HTTP/1.1.
    #[error("Wrong http version")]
    WrongHttpVersion,
    /// The `Sec-WebSocket-Version` header is missing or is not `13`.
    #[error("Missing or invalid sec version header")]
    MissingOrInvalidSecVersion,
    /// The `Sec-WebSocket-Key` header is missing.
    #[error("Missing sec key header")]
    MissingSecKey,
    /// The HTTP head does not fit the read buffer.
    #[error("Handshake head too large")]
    HeadTooLarge,
    /// The peer closed the transport before the exchange completed.
    #[error("Connection closed during handshake")]
    ConnectionClosed,
    /// The HTTP head could not be parsed.
    #[error("Http parse error: {0}")]
    Http(
        #[source]
        #[from]
        httparse::Error,
    ),
}

/// Invalid frames reported to the error listener.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The codec rejected the frame.
    #[error("Invalid frame: {0}")]
    Decode(
        #[source]
        #[from]
        DecodeError,
    ),
    /// A text payload is not valid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUtf8,
    /// A server received an unmasked frame.
    #[error("Frame from client is not masked")]
    MissingMask,
    /// A client received a masked frame.
    #[error("Frame from server is masked")]
    UnexpectedMask,
    /// A close payload of one byte, or with a non-UTF-8 reason.
    #[error("Invalid close frame")]
    InvalidCloseFrame,
    /// A close code that must not appear on the wire.
    #[error("Invalid close code: {code:?}")]
    InvalidCloseCode {
        /// The received code.
        code: CloseCode,
    },
    /// A new text or binary frame arrived while a fragmented message was open.
    #[error("Invalid fragment")]
    InvalidFragment,
    /// A continuation frame arrived with no fragmented message open.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,
    /// A reassembled message exceeds the configured maximum.
    #[error("Message too large")]
    MessageTooLarge,
}

impl ProtocolError {
    /// The close code used when a protocol error fails the connection.
    pub const fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::InvalidUtf8 => CloseCode::Invalid,
            ProtocolError::MessageTooLarge
            | ProtocolError::Decode(DecodeError::PayloadTooLarge { .. }) => CloseCode::Size,
            _ => CloseCode::Protocol,
        }
    }
}

/// Top level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The opening handshake failed.
    #[error("Handshake error: {0}")]
    Handshake(
        #[source]
        #[from]
        HandshakeError,
    ),
    /// An inbound frame was invalid.
    #[error("Protocol error: {0}")]
    Protocol(
        #[source]
        #[from]
        ProtocolError,
    ),
    /// The transport failed.
    #[error("Transport error: {0:?}")]
    Transport(ErrorKind),
    /// An outbound item does not fit the write buffer.
    #[error("Encode error: {0}")]
    Encode(
        #[source]
        #[from]
        EncodeError,
    ),
    /// An inbound frame does not fit the read buffer.
    #[error("Read buffer too small")]
    BufferTooSmall,
    /// The outbound channel is closed or the connection was torn down.
    #[error("Connection closed")]
    ConnectionClosed,
    /// The operation is not allowed in the current connection state.
    #[error("Operation not allowed in state {0:?}")]
    InvalidState(ConnectionState),
    /// The operation belongs to the other role.
    #[error("Operation not supported for role {0:?}")]
    WrongRole(Role),
    /// A close payload above 125 bytes.
    #[error("Control payload too large")]
    ControlPayloadTooLarge,
}

impl Error {
    pub(crate) fn transport<E: embedded_io_async::Error>(err: E) -> Self {
        Error::Transport(err.kind())
    }

    pub(crate) fn write<E: embedded_io_async::Error>(err: WriteError<E, EncodeError>) -> Self {
        match err {
            WriteError::IO(err) => Error::transport(err),
            WriteError::Encode(err) => Error::Encode(err),
            _ => Error::Transport(ErrorKind::Other),
        }
    }

    /// Maps a failure to read a handshake head.
    pub(crate) fn handshake_read<E: embedded_io_async::Error>(
        err: ReadError<E, httparse::Error>,
    ) -> Self {
        match err {
            ReadError::IO(err) => Error::transport(err),
            ReadError::Decode(err) => HandshakeError::Http(err).into(),
            ReadError::BufferTooSmall => HandshakeError::HeadTooLarge.into(),
            // Eof in the middle of the head.
            _ => HandshakeError::ConnectionClosed.into(),
        }
    }
}
