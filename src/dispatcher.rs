//! Inbound frame dispatch.

use bytes::Bytes;
use embedded_io_async::Read;
use framez::{FramedRead, ReadError};

use crate::{
    CloseCode, CloseFrame, Frame, OpCode,
    codec::{FramesCodec, Inbound},
    error::{Error, ProtocolError},
    fragments::Assembler,
    options::Options,
    websocket::{Outbound, Shared},
};

/// Whether the dispatcher keeps reading.
enum Flow {
    Continue,
    Stop,
}

/// Pulls frames from the transport one at a time and routes them.
///
/// The next frame is only requested once the current one was handled,
/// including waiting for room in every subscription.
pub(crate) struct Dispatcher<'a, 'buf, R> {
    shared: &'a Shared,
    options: &'a Options,
    framed: FramedRead<'buf, FramesCodec, R>,
    assembler: Option<Assembler>,
}

impl<'a, 'buf, R: Read> Dispatcher<'a, 'buf, R> {
    pub(crate) fn new(
        shared: &'a Shared,
        options: &'a Options,
        framed: FramedRead<'buf, FramesCodec, R>,
    ) -> Self {
        Self {
            shared,
            options,
            framed,
            assembler: options
                .reassemble_fragments
                .then(|| Assembler::new(options.max_payload_len)),
        }
    }

    /// Dispatches until eof, a close frame, a fatal protocol error or a transport failure.
    ///
    /// The connection is torn down on every exit.
    pub(crate) async fn run(mut self) -> Result<(), Error> {
        let result = loop {
            let frame = match self.framed.next(Inbound::owned).await {
                Some(Ok(Inbound::Frame(frame))) => frame,
                Some(Ok(Inbound::Skipped)) => continue,
                Some(Ok(Inbound::Rejected(err))) => match self.protocol_error(err.into()).await {
                    Flow::Continue => continue,
                    Flow::Stop => break Ok(()),
                },
                Some(Err(ReadError::IO(err))) => {
                    let err = Error::transport(err);

                    tracing::warn!(%err, "Read failed");

                    self.shared.listeners.error(&err);

                    break Err(err);
                }
                Some(Err(ReadError::BufferTooSmall)) => {
                    tracing::error!("Frame does not fit the read buffer");

                    self.shared.listeners.error(&Error::BufferTooSmall);

                    break Err(Error::BufferTooSmall);
                }
                Some(Err(ReadError::Decode(never))) => match never {},
                Some(Err(_)) => {
                    tracing::debug!("Transport ended inside a frame");

                    break Ok(());
                }
                None => {
                    tracing::debug!("Transport ended");

                    break Ok(());
                }
            };

            let flow = match self.on_frame(frame).await {
                Ok(flow) => flow,
                Err(err) => self.protocol_error(err).await,
            };

            if let Flow::Stop = flow {
                break Ok(());
            }
        };

        self.shared.teardown();

        result
    }

    async fn on_frame(&mut self, mut frame: Frame) -> Result<Flow, ProtocolError> {
        if self.options.strict_masking {
            match (self.shared.role().expects_masked(), frame.mask().is_some()) {
                (true, false) => return Err(ProtocolError::MissingMask),
                (false, true) => return Err(ProtocolError::UnexpectedMask),
                _ => {}
            }
        }

        frame.unmask();

        tracing::trace!(
            opcode = ?frame.opcode(),
            fin = frame.is_final(),
            len = frame.payload().len(),
            "Received frame"
        );

        match frame.opcode() {
            OpCode::Close => {
                self.on_close(frame.into_payload()).await;

                return Ok(Flow::Stop);
            }
            OpCode::Ping => {
                if self.options.auto_pong {
                    let pong = self.shared.role().frame(OpCode::Pong, frame.into_payload());

                    self.reply(pong).await;
                }
            }
            OpCode::Pong => {
                if !self.shared.pings.resolve(frame.payload()) {
                    tracing::trace!("Ignoring unsolicited pong");
                }
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                let fin = frame.is_final();
                let opcode = frame.opcode();
                let payload = frame.into_payload();

                let (opcode, payload) = match self.assembler.as_mut() {
                    Some(assembler) => match assembler.push(fin, opcode, payload)? {
                        Some(message) => message,
                        None => return Ok(Flow::Continue),
                    },
                    None => (opcode, payload),
                };

                self.deliver(opcode, payload).await?;
            }
        }

        Ok(Flow::Continue)
    }

    async fn deliver(&self, opcode: OpCode, payload: Bytes) -> Result<(), ProtocolError> {
        match opcode {
            OpCode::Text => {
                let text =
                    String::from_utf8(payload.into()).map_err(|_| ProtocolError::InvalidUtf8)?;

                self.shared.listeners.text(text).await;
            }
            // Continuation frames that are not reassembled are delivered as binary.
            _ => self.shared.listeners.binary(payload).await,
        }

        Ok(())
    }

    async fn on_close(&self, payload: Bytes) {
        tracing::debug!(len = payload.len(), "Received close frame");

        self.shared.listeners.close(&payload);

        let Some(sender) = self.shared.close_outbound() else {
            // Our close frame was already sent.
            return;
        };

        if !self.options.auto_close {
            return;
        }

        let echo = match CloseFrame::parse(&payload) {
            Ok(_) => payload,
            Err(err) => {
                tracing::warn!(%err, "Invalid close payload");

                self.shared.listeners.error(&Error::Protocol(err));

                CloseFrame::no_reason(CloseCode::Protocol).to_payload()
            }
        };

        let frame = self.shared.role().frame(OpCode::Close, echo);

        if sender.send(Outbound::Frame(frame)).await.is_err() {
            tracing::debug!("Writer gone, close not echoed");
        }
    }

    /// Queues a control reply unless the outbound side is already closed.
    async fn reply(&self, frame: Frame) {
        if self.shared.enqueue(Outbound::Frame(frame)).await.is_err() {
            tracing::trace!("Outbound closed, dropping reply");
        }
    }

    /// Reports `err` and decides whether the connection survives it.
    async fn protocol_error(&self, err: ProtocolError) -> Flow {
        tracing::warn!(%err, "Protocol error");

        let code = err.close_code();

        self.shared.listeners.error(&Error::Protocol(err));

        if !self.options.close_on_protocol_error {
            return Flow::Continue;
        }

        if let Some(sender) = self.shared.close_outbound() {
            let frame = self
                .shared
                .role()
                .frame(OpCode::Close, CloseFrame::no_reason(code));

            if sender.send(Outbound::Frame(frame)).await.is_err() {
                tracing::debug!("Writer gone, close not sent");
            }
        }

        Flow::Stop
    }
}
