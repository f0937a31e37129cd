//! Owned read buffer shared by the handshake and frame stages.

use embedded_io_async::Read;
use framez::{FramedRead, ReadError, decode::Decoder, state::ReadState};

/// Where the unconsumed bytes of a [`ReadBuffer`] are.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    index: usize,
    total_consumed: usize,
    eof: bool,
    is_framable: bool,
    shift: bool,
}

impl Cursor {
    fn save(state: &ReadState<'_>) -> Self {
        Self {
            index: state.index,
            total_consumed: state.total_consumed,
            eof: state.eof,
            is_framable: state.is_framable,
            shift: state.shift,
        }
    }

    fn restore(self, buffer: &mut [u8]) -> ReadState<'_> {
        let mut state = ReadState::new(buffer);

        state.index = self.index;
        state.total_consumed = self.total_consumed;
        state.eof = self.eof;
        state.is_framable = self.is_framable;
        state.shift = self.shift;

        state
    }
}

/// A fixed size read buffer owned by a connection.
///
/// Bytes that follow one decoded item stay buffered for the next codec,
/// e.g. a frame that arrived in the same read as the handshake response.
#[derive(Debug)]
pub(crate) struct ReadBuffer {
    buffer: Box<[u8]>,
    cursor: Cursor,
}

impl ReadBuffer {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            buffer: vec![0; len].into_boxed_slice(),
            cursor: Cursor::default(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next item with `codec` and maps it out of the buffer.
    pub(crate) async fn next<C, R, U>(
        &mut self,
        codec: C,
        reader: R,
        map: fn(<C as Decoder<'_>>::Item) -> U,
    ) -> Option<Result<U, ReadError<R::Error, C::Error>>>
    where
        U: 'static,
        C: for<'a> Decoder<'a>,
        R: Read,
    {
        let state = self.cursor.restore(&mut self.buffer);
        let mut framed = FramedRead::from_parts(codec, reader, state);

        let item = framed.next(map).await;

        let (_, _, state) = framed.into_parts();
        self.cursor = Cursor::save(&state);

        item
    }

    /// Hands the buffer over to a reader that decodes with `codec` from now on.
    pub(crate) fn framed<C, R>(&mut self, codec: C, reader: R) -> FramedRead<'_, C, R> {
        FramedRead::from_parts(codec, reader, self.cursor.restore(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::http::RequestCodec;

    #[tokio::test]
    async fn leftover_bytes_reach_the_next_codec() {
        let mut wire = VecDeque::from(b"GET / HTTP/1.1\r\nHost: a\r\n\r\nafter".to_vec());
        let mut buffer = ReadBuffer::new(64);

        let request = buffer
            .next(RequestCodec::new(4), &mut wire, |request| request)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(request.path(), "/");

        let framed = buffer.framed((), &mut wire);

        assert_eq!(framed.framable(), 5);
    }

    #[tokio::test]
    async fn head_larger_than_the_buffer() {
        let head = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(64));
        let mut wire = VecDeque::from(head.into_bytes());
        let mut buffer = ReadBuffer::new(32);

        let result = buffer
            .next(RequestCodec::new(4), &mut wire, |request| request)
            .await;

        assert!(matches!(result, Some(Err(ReadError::BufferTooSmall))));
    }
}
