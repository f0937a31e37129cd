//! Callback slots and broadcast subscriptions.

use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Error;

/// Holds at most one handler. Registering replaces the previous one.
pub(crate) struct Slot<F: ?Sized> {
    handler: Mutex<Option<Arc<F>>>,
}

impl<F: ?Sized> Slot<F> {
    fn new() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }

    pub(crate) fn set(&self, handler: Arc<F>) {
        *self.handler.lock() = Some(handler);
    }

    /// Returns the current handler.
    ///
    /// The lock is released before the handler runs, so a handler may replace itself.
    pub(crate) fn get(&self) -> Option<Arc<F>> {
        self.handler.lock().clone()
    }
}

impl<F: ?Sized> fmt::Debug for Slot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("registered", &self.handler.lock().is_some())
            .finish()
    }
}

pub(crate) type TextHandler = dyn Fn(&str) + Send + Sync;
pub(crate) type BinaryHandler = dyn Fn(&Bytes) + Send + Sync;
pub(crate) type ErrorHandler = dyn Fn(&Error) + Send + Sync;
pub(crate) type CloseHandler = dyn Fn(&Bytes) + Send + Sync;

/// Fans every emitted item out to all live subscriptions.
pub(crate) struct Broadcast<T> {
    /// `None` once closed.
    subscribers: Mutex<Option<Vec<mpsc::Sender<T>>>>,
    capacity: usize,
}

impl<T: Clone> Broadcast<T> {
    fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
            capacity,
        }
    }

    pub(crate) fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);

        // A subscription to a closed broadcast ends immediately.
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.push(tx);
        }

        Subscription { rx }
    }

    /// Delivers `item` to every subscription, waiting for room in each.
    ///
    /// A slow subscription therefore slows down the emitter.
    pub(crate) async fn emit(&self, item: T) {
        let subscribers = match self.subscribers.lock().as_ref() {
            Some(subscribers) => subscribers.clone(),
            None => return,
        };

        let mut dropped = false;

        for subscriber in subscribers {
            if subscriber.send(item.clone()).await.is_err() {
                dropped = true;
            }
        }

        if dropped {
            if let Some(subscribers) = self.subscribers.lock().as_mut() {
                subscribers.retain(|tx| !tx.is_closed());
            }
        }
    }

    pub(crate) fn close(&self) {
        self.subscribers.lock().take();
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().as_ref().map_or(0, Vec::len)
    }
}

impl<T> fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.subscribers.lock();

        f.debug_struct("Broadcast")
            .field("closed", &subscribers.is_none())
            .field("subscribers", &subscribers.as_ref().map_or(0, Vec::len))
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// An independent subscription to a broadcast message stream.
///
/// Yields every message emitted after subscribing, in arrival order,
/// and `None` once the connection is closed.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Receives the next message.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The listener set of one connection.
#[derive(Debug)]
pub(crate) struct Listeners {
    pub(crate) text: Slot<TextHandler>,
    pub(crate) binary: Slot<BinaryHandler>,
    pub(crate) error: Slot<ErrorHandler>,
    pub(crate) close: Slot<CloseHandler>,
    pub(crate) texts: Broadcast<String>,
    pub(crate) binaries: Broadcast<Bytes>,
}

impl Listeners {
    pub(crate) fn new(subscriber_capacity: usize) -> Self {
        Self {
            text: Slot::new(),
            binary: Slot::new(),
            error: Slot::new(),
            close: Slot::new(),
            texts: Broadcast::new(subscriber_capacity),
            binaries: Broadcast::new(subscriber_capacity),
        }
    }

    /// Delivers a text message to the handler, then to the subscriptions.
    pub(crate) async fn text(&self, text: String) {
        if let Some(handler) = self.text.get() {
            handler(&text);
        }

        self.texts.emit(text).await;
    }

    /// Delivers a binary message to the handler, then to the subscriptions.
    pub(crate) async fn binary(&self, payload: Bytes) {
        if let Some(handler) = self.binary.get() {
            handler(&payload);
        }

        self.binaries.emit(payload).await;
    }

    pub(crate) fn error(&self, error: &Error) {
        if let Some(handler) = self.error.get() {
            handler(error);
        }
    }

    pub(crate) fn close(&self, payload: &Bytes) {
        if let Some(handler) = self.close.get() {
            handler(payload);
        }
    }

    pub(crate) fn close_broadcasts(&self) {
        self.texts.close();
        self.binaries.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;

    use super::*;

    #[test]
    fn last_registration_wins() {
        let listeners = Listeners::new(4);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        listeners.error.set(Arc::new(move |_: &Error| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let counter = second.clone();
        listeners.error.set(Arc::new(move |_: &Error| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.error(&Error::ConnectionClosed);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_message() {
        let listeners = Listeners::new(4);
        let mut a = listeners.texts.subscribe();
        let mut b = listeners.texts.subscribe();

        listeners.text(String::from("one")).await;
        listeners.text(String::from("two")).await;
        listeners.close_broadcasts();

        assert_eq!(a.recv().await.as_deref(), Some("one"));
        assert_eq!(a.recv().await.as_deref(), Some("two"));
        assert_eq!(a.recv().await, None);

        let b: Vec<String> = b.by_ref().collect().await;
        assert_eq!(b, ["one", "two"]);
    }

    #[tokio::test]
    async fn handler_and_subscribers_both_receive() {
        let listeners = Listeners::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        listeners.binary.set(Arc::new(move |payload: &Bytes| {
            sink.lock().push(payload.clone());
        }));

        let mut subscription = listeners.binaries.subscribe();

        listeners.binary(Bytes::from_static(b"\x01\x02")).await;

        assert_eq!(seen.lock().as_slice(), [Bytes::from_static(b"\x01\x02")]);
        assert_eq!(
            subscription.recv().await,
            Some(Bytes::from_static(b"\x01\x02"))
        );
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let listeners = Listeners::new(4);
        let kept = listeners.binaries.subscribe();
        let dropped = listeners.binaries.subscribe();

        drop(dropped);
        listeners.binary(Bytes::new()).await;

        assert_eq!(listeners.binaries.subscriber_count(), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn slow_subscriber_applies_backpressure() {
        let listeners = Arc::new(Listeners::new(1));
        let mut subscription = listeners.texts.subscribe();

        listeners.text(String::from("fills the queue")).await;

        let emitter = listeners.clone();
        let blocked = tokio::spawn(async move { emitter.text(String::from("waits")).await });

        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        assert_eq!(subscription.recv().await.as_deref(), Some("fills the queue"));
        blocked.await.unwrap();
        assert_eq!(subscription.recv().await.as_deref(), Some("waits"));
    }

    #[tokio::test]
    async fn subscribe_after_close_ends_immediately() {
        let listeners = Listeners::new(4);

        listeners.close_broadcasts();

        assert_eq!(listeners.texts.subscribe().recv().await, None);
        assert_eq!(listeners.texts.subscriber_count(), 0);
    }
}
