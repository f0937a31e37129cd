//! Connection configuration.

use crate::http::Header;

/// Options for a [`WebSocket`](crate::WebSocket).
///
/// The defaults follow the plain connection core: every frame is demasked,
/// continuation frames are delivered as binary messages and protocol errors
/// are reported without closing the connection.
#[derive(Debug, Clone)]
pub struct Options {
    /// Capacity of the outbound frame channel.
    pub outbound_capacity: usize,
    /// Capacity of each broadcast subscription.
    pub subscriber_capacity: usize,
    /// Size of the read buffer. Handshake heads and inbound frames must fit in it.
    pub read_buffer_len: usize,
    /// Size of the write buffer. Handshake heads and outbound frames must fit in it.
    pub write_buffer_len: usize,
    /// Largest accepted frame payload, also the largest reassembled message.
    ///
    /// Frame payloads are further bounded by the read buffer.
    pub max_payload_len: usize,
    /// Maximum number of headers parsed from a handshake head.
    pub max_headers: usize,
    /// Headers appended to the handshake request or response.
    pub headers: Vec<Header>,
    /// Answer pings with pongs.
    pub auto_pong: bool,
    /// Answer a received close frame with a close frame.
    pub auto_close: bool,
    /// Reject unmasked frames on a server and masked frames on a client.
    pub strict_masking: bool,
    /// Reassemble fragmented messages instead of delivering every fragment.
    pub reassemble_fragments: bool,
    /// Fail the connection with a close frame on the first protocol error.
    pub close_on_protocol_error: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    /// Creates the default options.
    pub const fn new() -> Self {
        Self {
            outbound_capacity: 64,
            subscriber_capacity: 64,
            read_buffer_len: 64 * 1024,
            write_buffer_len: 64 * 1024,
            max_payload_len: 16 * 1024 * 1024,
            max_headers: 32,
            headers: Vec::new(),
            auto_pong: true,
            auto_close: true,
            strict_masking: false,
            reassemble_fragments: false,
            close_on_protocol_error: false,
        }
    }

    /// Sets the capacity of the outbound frame channel. Values below 1 are raised to 1.
    pub const fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Sets the capacity of each broadcast subscription. Values below 1 are raised to 1.
    pub const fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Sets the size of the read buffer.
    pub const fn with_read_buffer_len(mut self, len: usize) -> Self {
        self.read_buffer_len = len;
        self
    }

    /// Sets the size of the write buffer.
    pub const fn with_write_buffer_len(mut self, len: usize) -> Self {
        self.write_buffer_len = len;
        self
    }

    /// Sets the largest accepted payload.
    pub const fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Sets the maximum number of headers parsed from a handshake head.
    pub const fn with_max_headers(mut self, max_headers: usize) -> Self {
        self.max_headers = max_headers;
        self
    }

    /// Sets the headers appended to the handshake request or response.
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = Header>) -> Self {
        self.headers = headers.into_iter().collect();
        self
    }

    /// Sets whether to automatically send a pong response.
    pub const fn with_auto_pong(mut self, auto_pong: bool) -> Self {
        self.auto_pong = auto_pong;
        self
    }

    /// Sets whether to automatically answer a close frame.
    pub const fn with_auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = auto_close;
        self
    }

    /// Sets whether inbound mask presence is validated against the role.
    pub const fn with_strict_masking(mut self, strict: bool) -> Self {
        self.strict_masking = strict;
        self
    }

    /// Sets whether fragmented messages are reassembled.
    pub const fn with_reassemble_fragments(mut self, reassemble: bool) -> Self {
        self.reassemble_fragments = reassemble;
        self
    }

    /// Sets whether a protocol error fails the connection.
    pub const fn with_close_on_protocol_error(mut self, close: bool) -> Self {
        self.close_on_protocol_error = close;
        self
    }
}
