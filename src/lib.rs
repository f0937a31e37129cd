//! An `async` [`RFC 6455`](https://datatracker.ietf.org/doc/html/rfc6455) `websocket` connection core
//! over any pair of [`embedded_io_async`] transport halves.

#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Examples
//!
//! In the following examples, `Noop` is a mock type that implements the required traits for using a [`WebSocket`].
//! - A `reader` is anything that implements [`embedded_io_async::Read`].
//! - A `writer` is anything that implements [`embedded_io_async::Write`].
//!
//! ## Client
//! ```no_run
//! # async fn client() {
//! # use wsduplex::mock::Noop;
//! use wsduplex::{WebSocket, http::Header, options::Options};
//!
//! // The halves of an already connected stream.
//! let (reader, writer) = (Noop, Noop);
//!
//! let mut websocket = WebSocket::client(
//!     reader,
//!     writer,
//!     Options::default().with_headers([Header::new("User-Agent", "wsduplex")]),
//! );
//!
//! websocket
//!     .upgrade("ws://example.com/ws")
//!     .await
//!     .expect("Handshake failed");
//!
//! websocket.on_text(|text| println!("Received: {text}"));
//! websocket.on_error(|err| eprintln!("Error: {err}"));
//!
//! let handle = websocket.handle();
//!
//! // Queued now, written once the connection runs.
//! handle
//!     .send("Hello, WebSocket!")
//!     .await
//!     .expect("Failed to send message");
//!
//! // Returns once the connection is closed.
//! websocket.run().await.expect("Connection failed");
//! # }
//! ```
//!
//! ## Server
//! ```no_run
//! # async fn server() {
//! # use wsduplex::mock::Noop;
//! use futures::StreamExt;
//! use wsduplex::{WebSocket, options::Options};
//!
//! let (reader, writer) = (Noop, Noop);
//!
//! let mut websocket = WebSocket::server(reader, writer, Options::default());
//!
//! websocket.accept().await.expect("Handshake failed");
//!
//! let handle = websocket.handle();
//! let mut texts = handle.subscribe_text();
//!
//! let echo = async move {
//!     // Ends once the connection is closed.
//!     while let Some(text) = texts.next().await {
//!         if handle.send(text).await.is_err() {
//!             break;
//!         }
//!     }
//! };
//!
//! let (result, _) = futures::join!(websocket.run(), echo);
//!
//! result.expect("Connection failed");
//! # }
//! ```
//!
//! # Driving the connection
//!
//! A [`WebSocket`] does nothing on its own. [`WebSocket::run`] reads and dispatches inbound frames
//! while writing queued outbound frames, both on the calling task. A [`WebSocketHandle`] is cheap to clone
//! and can be moved into other tasks to send, ping, close or register listeners while the connection runs.
//!
//! Managing the connection consists of two parts:
//! - Sending pongs in response to pings.
//! - Responding to close frames with a close frame and tearing the connection down.
//!
//! Both are enabled by default, but can be disabled using [`Options::with_auto_pong`](options::Options::with_auto_pong)
//! and [`Options::with_auto_close`](options::Options::with_auto_close) respectively.
//!
//! # Backpressure
//!
//! Outbound frames go through a bounded channel, so `send` waits while the writer is behind.
//! Every subscription has its own bounded queue, and the next inbound frame is only read once
//! every subscription had room for the current message.

mod buffer;

mod close_code;
pub use close_code::CloseCode;

mod close_frame;
pub use close_frame::CloseFrame;

mod codec;

mod dispatcher;

pub mod error;

mod fragments;

mod frame;
pub use frame::Frame;

mod handshake;

pub mod http;

mod listeners;
pub use listeners::Subscription;

mod mask;

mod message;
pub use message::Message;

#[doc(hidden)]
pub mod mock;

mod opcode;
pub use opcode::OpCode;

pub mod options;

mod ping;
pub use ping::{NONCE_LEN, PendingPing};

mod role;
pub use role::Role;

mod websocket;
pub use websocket::{ConnectionState, WebSocket, WebSocketHandle};
