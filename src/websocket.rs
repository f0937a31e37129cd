use std::{pin::pin, sync::Arc};

use bytes::Bytes;
use embedded_io_async::{Read, Write};
use futures::future::{Either, select};
use parking_lot::Mutex;
use framez::FramedWrite;
use tokio::sync::mpsc;

use crate::{
    CloseFrame, Frame, Message, OpCode, PendingPing, Role, Subscription,
    buffer::ReadBuffer,
    codec::{self, FramesCodec, MAX_HEADER_SIZE},
    dispatcher::Dispatcher,
    error::{EncodeError, Error, HandshakeError},
    handshake,
    http::{RequestCodec, ResponseCodec},
    listeners::Listeners,
    options::Options,
    ping::PingTracker,
};

/// Smallest buffer that holds any control frame.
const MIN_BUFFER_LEN: usize = MAX_HEADER_SIZE + 125;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, the opening handshake has not completed.
    Handshaking,
    /// Frames flow in both directions.
    Open,
    /// A close frame was sent. Inbound frames are still dispatched.
    Closing,
    /// Torn down. Nothing is sent or delivered anymore.
    Closed,
}

/// An item of the outbound channel.
///
/// The frames of a fragmented message travel as one item, so no other frame
/// can be interleaved between them.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame),
    Fragments(Vec<Frame>),
}

impl Outbound {
    /// Whether every frame fits a write buffer of `len` bytes.
    fn fits(&self, len: usize) -> bool {
        match self {
            Outbound::Frame(frame) => codec::encoded_len(frame) <= len,
            Outbound::Fragments(frames) => frames.iter().all(|f| codec::encoded_len(f) <= len),
        }
    }
}

/// State shared by a [`WebSocket`], its handles and its dispatcher.
#[derive(Debug)]
pub(crate) struct Shared {
    role: Role,
    state: Mutex<ConnectionState>,
    /// `None` once the outbound side is closed.
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    write_buffer_len: usize,
    pub(crate) pings: Arc<PingTracker>,
    pub(crate) listeners: Listeners,
}

impl Shared {
    pub(crate) const fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Moves to `state`. `Closed` is final.
    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();

        if *current == ConnectionState::Closed {
            return;
        }

        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "Connection state changed");

            *current = state;
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Outbound>, Error> {
        self.outbound.lock().clone().ok_or(Error::ConnectionClosed)
    }

    /// Queues `item` for the writer, waiting for room in the channel.
    pub(crate) async fn enqueue(&self, item: Outbound) -> Result<(), Error> {
        if !item.fits(self.write_buffer_len) {
            return Err(EncodeError::BufferTooSmall.into());
        }

        let sender = self.sender()?;

        sender
            .send(item)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Takes the outbound sender, so that every later send fails.
    ///
    /// Frames already queued are still written.
    pub(crate) fn close_outbound(&self) -> Option<mpsc::Sender<Outbound>> {
        self.outbound.lock().take()
    }

    /// Closes the connection for good.
    ///
    /// Pending pings fail, subscriptions end and the outbound side closes.
    pub(crate) fn teardown(&self) {
        self.set_state(ConnectionState::Closed);
        self.pings.close();
        self.listeners.close_broadcasts();
        self.close_outbound();
    }
}

/// A cloneable handle to a connection.
///
/// Every operation that does not need the transport is available here,
/// so that a handle can be moved into other tasks while the connection runs.
#[derive(Debug, Clone)]
pub struct WebSocketHandle {
    shared: Arc<Shared>,
}

impl WebSocketHandle {
    /// The role of the connection.
    pub fn role(&self) -> Role {
        self.shared.role()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Number of pings still waiting for their pong.
    pub fn pending_pings(&self) -> usize {
        self.shared.pings.pending_count()
    }

    /// Queues a message as a single final frame.
    ///
    /// Waits while the outbound channel is full. Completes once the frame is queued,
    /// not once it is written. Fails with [`Error::ConnectionClosed`] after close or teardown,
    /// and with [`Error::Encode`] if the frame does not fit the write buffer.
    pub async fn send(&self, message: impl Into<Message>) -> Result<(), Error> {
        let frame = message.into().into_frame(self.role());

        self.shared.enqueue(Outbound::Frame(frame)).await
    }

    /// Queues a message split into frames of at most `fragment_size` payload bytes.
    ///
    /// The fragments are written back to back.
    pub async fn send_fragmented(
        &self,
        message: impl Into<Message>,
        fragment_size: usize,
    ) -> Result<(), Error> {
        let frames = message.into().into_fragments(self.role(), fragment_size);

        self.shared.enqueue(Outbound::Fragments(frames)).await
    }

    /// Sends a ping carrying a fresh random nonce.
    ///
    /// The returned [`PendingPing`] resolves when a pong echoes the nonce.
    pub async fn ping(&self) -> Result<PendingPing, Error> {
        let ping = self.shared.pings.register()?;
        let frame = self.role().frame(OpCode::Ping, ping.nonce().to_vec());

        // Dropping the ping on failure forgets it.
        self.shared.enqueue(Outbound::Frame(frame)).await?;

        tracing::trace!("Ping queued");

        Ok(ping)
    }

    /// Sends a close frame with an empty payload and closes the outbound side.
    ///
    /// Use [`WebSocketHandle::close_with`] to send a close code and reason.
    pub async fn close(&self) -> Result<(), Error> {
        self.close_with(Bytes::new()).await
    }

    /// Sends a close frame with `payload` and closes the outbound side.
    ///
    /// `payload` is usually a [`CloseFrame`].
    /// Inbound frames keep being dispatched until the peer closes.
    pub async fn close_with(&self, payload: impl Into<Bytes>) -> Result<(), Error> {
        let payload = payload.into();

        if payload.len() > 125 {
            return Err(Error::ControlPayloadTooLarge);
        }

        let sender = self
            .shared
            .close_outbound()
            .ok_or(Error::ConnectionClosed)?;

        self.shared.set_state(ConnectionState::Closing);

        let frame = self.role().frame(OpCode::Close, payload);

        sender
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Registers the text handler, replacing the previous one.
    pub fn on_text(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.listeners.text.set(Arc::new(handler));
    }

    /// Registers the binary handler, replacing the previous one.
    ///
    /// Continuation frames are delivered here unless fragments are reassembled.
    pub fn on_binary(&self, handler: impl Fn(&Bytes) + Send + Sync + 'static) {
        self.shared.listeners.binary.set(Arc::new(handler));
    }

    /// Registers the error handler, replacing the previous one.
    pub fn on_error(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        self.shared.listeners.error.set(Arc::new(handler));
    }

    /// Registers the close handler, replacing the previous one.
    ///
    /// The handler receives the raw close payload, see [`CloseFrame::parse`].
    pub fn on_close(&self, handler: impl Fn(&Bytes) + Send + Sync + 'static) {
        self.shared.listeners.close.set(Arc::new(handler));
    }

    /// Subscribes to text messages received from now on.
    pub fn subscribe_text(&self) -> Subscription<String> {
        self.shared.listeners.texts.subscribe()
    }

    /// Subscribes to binary messages received from now on.
    pub fn subscribe_binary(&self) -> Subscription<Bytes> {
        self.shared.listeners.binaries.subscribe()
    }
}

/// A WebSocket connection over a pair of transport halves.
///
/// Created in [`ConnectionState::Handshaking`] by [`WebSocket::client`] or [`WebSocket::server`],
/// or already open by [`WebSocket::after_handshake`]. Frames only flow while [`WebSocket::run`] is polled.
#[derive(Debug)]
pub struct WebSocket<R, W> {
    handle: WebSocketHandle,
    reader: R,
    writer: W,
    read_buffer: ReadBuffer,
    write_buffer: Box<[u8]>,
    outbound: mpsc::Receiver<Outbound>,
    options: Options,
}

impl<R, W> WebSocket<R, W> {
    fn new(role: Role, state: ConnectionState, reader: R, writer: W, options: Options) -> Self {
        let (sender, outbound) = mpsc::channel(options.outbound_capacity.max(1));
        let write_buffer_len = options.write_buffer_len.max(MIN_BUFFER_LEN);

        let shared = Shared {
            role,
            state: Mutex::new(state),
            outbound: Mutex::new(Some(sender)),
            write_buffer_len,
            pings: Arc::new(PingTracker::new()),
            listeners: Listeners::new(options.subscriber_capacity.max(1)),
        };

        Self {
            handle: WebSocketHandle {
                shared: Arc::new(shared),
            },
            reader,
            writer,
            read_buffer: ReadBuffer::new(options.read_buffer_len.max(MIN_BUFFER_LEN)),
            write_buffer: vec![0; write_buffer_len].into_boxed_slice(),
            outbound,
            options,
        }
    }

    /// Creates a client connection. Call [`WebSocket::upgrade`] before [`WebSocket::run`].
    pub fn client(reader: R, writer: W, options: Options) -> Self {
        Self::new(
            Role::Client,
            ConnectionState::Handshaking,
            reader,
            writer,
            options,
        )
    }

    /// Creates a server connection. Call [`WebSocket::accept`] before [`WebSocket::run`].
    pub fn server(reader: R, writer: W, options: Options) -> Self {
        Self::new(
            Role::Server,
            ConnectionState::Handshaking,
            reader,
            writer,
            options,
        )
    }

    /// Creates an open connection whose handshake was performed elsewhere.
    pub fn after_handshake(role: Role, reader: R, writer: W, options: Options) -> Self {
        Self::new(role, ConnectionState::Open, reader, writer, options)
    }

    /// Returns a cloneable handle to this connection.
    pub fn handle(&self) -> WebSocketHandle {
        self.handle.clone()
    }

    /// The role of the connection.
    pub fn role(&self) -> Role {
        self.handle.role()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    fn expect_handshake(&self, role: Role) -> Result<(), Error> {
        if self.role() != role {
            return Err(Error::WrongRole(self.role()));
        }

        match self.state() {
            ConnectionState::Handshaking => Ok(()),
            state => Err(Error::InvalidState(state)),
        }
    }

    fn finish_handshake(&self, result: Result<(), Error>) -> Result<(), Error> {
        match result {
            Ok(()) => {
                self.handle.shared.set_state(ConnectionState::Open);

                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "Handshake failed");

                self.handle.shared.teardown();

                Err(err)
            }
        }
    }
}

impl<R, W> WebSocket<R, W>
where
    R: Read,
    W: Write,
{
    /// Performs the client side of the opening handshake against `uri`.
    ///
    /// Bytes the server sends right after its response are kept for [`WebSocket::run`].
    pub async fn upgrade(&mut self, uri: &str) -> Result<(), Error> {
        self.expect_handshake(Role::Client)?;

        let result = self.client_handshake(uri).await;

        self.finish_handshake(result)
    }

    async fn client_handshake(&mut self, uri: &str) -> Result<(), Error> {
        let (request, sec_key) = handshake::client_request(uri, &self.options.headers)?;

        tracing::debug!(path = request.path(), "Sending upgrade request");

        FramedWrite::new(
            RequestCodec::new(self.options.max_headers),
            &mut self.writer,
            &mut self.write_buffer[..],
        )
        .send(&request)
        .await
        .map_err(Error::write)?;

        let response = match self
            .read_buffer
            .next(
                ResponseCodec::new(self.options.max_headers),
                &mut self.reader,
                |response| response,
            )
            .await
        {
            Some(Ok(response)) => response,
            Some(Err(err)) => return Err(Error::handshake_read(err)),
            None => return Err(HandshakeError::ConnectionClosed.into()),
        };

        handshake::validate_response(&response, &sec_key)?;

        tracing::debug!("Upgrade accepted");

        Ok(())
    }

    /// Performs the server side of the opening handshake.
    pub async fn accept(&mut self) -> Result<(), Error> {
        self.expect_handshake(Role::Server)?;

        let result = self.server_handshake().await;

        self.finish_handshake(result)
    }

    async fn server_handshake(&mut self) -> Result<(), Error> {
        let request = match self
            .read_buffer
            .next(
                RequestCodec::new(self.options.max_headers),
                &mut self.reader,
                |request| request,
            )
            .await
        {
            Some(Ok(request)) => request,
            Some(Err(err)) => return Err(Error::handshake_read(err)),
            None => return Err(HandshakeError::ConnectionClosed.into()),
        };

        tracing::debug!(path = request.path(), "Received upgrade request");

        let response = handshake::server_response(&request, &self.options.headers)?;

        FramedWrite::new(
            ResponseCodec::new(self.options.max_headers),
            &mut self.writer,
            &mut self.write_buffer[..],
        )
        .send(&response)
        .await
        .map_err(Error::write)
    }

    /// Drives the connection until it closes.
    ///
    /// Reads and dispatches inbound frames while writing queued outbound frames,
    /// both on the calling task. Returns once the transport ends or a close frame
    /// was received and every queued frame was written.
    pub async fn run(self) -> Result<(), Error> {
        let Self {
            handle,
            reader,
            writer,
            mut read_buffer,
            mut write_buffer,
            outbound,
            options,
        } = self;

        let shared = &*handle.shared;

        match shared.state() {
            ConnectionState::Open | ConnectionState::Closing => {}
            state => return Err(Error::InvalidState(state)),
        }

        tracing::debug!(role = ?shared.role(), "Running connection");

        // A frame must fit the read buffer as a whole.
        let max_payload_len = options
            .max_payload_len
            .min(read_buffer.len().saturating_sub(MAX_HEADER_SIZE));

        let reader = read_buffer.framed(FramesCodec::new(max_payload_len), reader);
        let writer = FramedWrite::new(
            FramesCodec::new(max_payload_len),
            writer,
            &mut write_buffer[..],
        );

        let dispatch = pin!(Dispatcher::new(shared, &options, reader).run());
        let write = pin!(write_loop(writer, outbound));

        match select(dispatch, write).await {
            Either::Left((Ok(()), write)) => write.await,
            Either::Left((Err(err), _)) => Err(err),
            Either::Right((Ok(()), dispatch)) => dispatch.await,
            Either::Right((Err(err), _)) => {
                tracing::warn!(%err, "Write failed");

                shared.listeners.error(&err);
                shared.teardown();

                Err(err)
            }
        }
    }

    /// Queues a message as a single final frame. See [`WebSocketHandle::send`].
    pub async fn send(&self, message: impl Into<Message>) -> Result<(), Error> {
        self.handle.send(message).await
    }

    /// Queues a fragmented message. See [`WebSocketHandle::send_fragmented`].
    pub async fn send_fragmented(
        &self,
        message: impl Into<Message>,
        fragment_size: usize,
    ) -> Result<(), Error> {
        self.handle.send_fragmented(message, fragment_size).await
    }

    /// Sends a ping. See [`WebSocketHandle::ping`].
    pub async fn ping(&self) -> Result<PendingPing, Error> {
        self.handle.ping().await
    }

    /// Sends an empty close frame. See [`WebSocketHandle::close`].
    pub async fn close(&self) -> Result<(), Error> {
        self.handle.close().await
    }

    /// Sends a close frame with `payload`. See [`WebSocketHandle::close_with`].
    pub async fn close_with(&self, payload: impl Into<Bytes>) -> Result<(), Error> {
        self.handle.close_with(payload).await
    }

    /// Registers the text handler. See [`WebSocketHandle::on_text`].
    pub fn on_text(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.handle.on_text(handler);
    }

    /// Registers the binary handler. See [`WebSocketHandle::on_binary`].
    pub fn on_binary(&self, handler: impl Fn(&Bytes) + Send + Sync + 'static) {
        self.handle.on_binary(handler);
    }

    /// Registers the error handler. See [`WebSocketHandle::on_error`].
    pub fn on_error(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        self.handle.on_error(handler);
    }

    /// Registers the close handler. See [`WebSocketHandle::on_close`].
    pub fn on_close(&self, handler: impl Fn(&Bytes) + Send + Sync + 'static) {
        self.handle.on_close(handler);
    }

    /// Subscribes to text messages. See [`WebSocketHandle::subscribe_text`].
    pub fn subscribe_text(&self) -> Subscription<String> {
        self.handle.subscribe_text()
    }

    /// Subscribes to binary messages. See [`WebSocketHandle::subscribe_binary`].
    pub fn subscribe_binary(&self) -> Subscription<Bytes> {
        self.handle.subscribe_binary()
    }
}

/// Writes queued frames in order until every sender is gone or a close frame was written.
///
/// Nothing follows a close frame on the wire.
async fn write_loop<W: Write>(
    mut framed: FramedWrite<'_, FramesCodec, W>,
    mut outbound: mpsc::Receiver<Outbound>,
) -> Result<(), Error> {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                let opcode = frame.opcode();

                tracing::trace!(?opcode, len = frame.payload().len(), "Writing frame");

                framed.send(frame).await.map_err(Error::write)?;

                if opcode == OpCode::Close {
                    tracing::debug!("Close frame written");

                    return Ok(());
                }
            }
            Outbound::Fragments(frames) => {
                tracing::trace!(fragments = frames.len(), "Writing fragments");

                for frame in frames {
                    framed.send(frame).await.map_err(Error::write)?;
                }
            }
        }
    }

    tracing::debug!("Outbound closed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::Noop;

    #[test]
    fn closed_is_final() {
        let websocket = WebSocket::after_handshake(Role::Client, Noop, Noop, Options::default());
        let shared = &websocket.handle.shared;

        shared.teardown();
        shared.set_state(ConnectionState::Closing);

        assert_eq!(websocket.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn close_after_teardown_keeps_closed() {
        let websocket = WebSocket::after_handshake(Role::Client, Noop, Noop, Options::default());

        websocket.handle.shared.teardown();

        assert!(matches!(websocket.close().await, Err(Error::ConnectionClosed)));
        assert_eq!(websocket.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn nothing_is_written_after_a_close_frame() {
        let (sender, outbound) = mpsc::channel(4);

        let close = Role::Server.frame(OpCode::Close, Bytes::new());
        let text = Role::Server.frame(OpCode::Text, "late");

        sender.send(Outbound::Frame(close)).await.unwrap();
        sender.send(Outbound::Frame(text)).await.unwrap();

        let mut wire = Vec::new();
        let mut buffer = [0; 64];
        let framed = FramedWrite::new(FramesCodec::new(64), &mut wire, &mut buffer);

        write_loop(framed, outbound).await.unwrap();

        assert_eq!(wire, [0x88, 0x00]);
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn frame_larger_than_the_write_buffer() {
        let options = Options::default().with_write_buffer_len(256);
        let websocket = WebSocket::after_handshake(Role::Server, Noop, Noop, options);

        let result = websocket.send(vec![0u8; 512]).await;

        assert!(matches!(
            result,
            Err(Error::Encode(EncodeError::BufferTooSmall))
        ));
    }
}
