//! Outstanding keepalive pings, keyed by nonce.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use dashmap::{DashMap, mapref::entry::Entry};
use rand::RngCore;
use tokio::sync::oneshot;

use crate::error::Error;

/// Length of a ping nonce in bytes.
pub const NONCE_LEN: usize = 32;

type Nonce = [u8; NONCE_LEN];

/// Tracks pings awaiting their pong.
///
/// Mutated by callers of `ping` and by the dispatcher, from any thread.
#[derive(Debug, Default)]
pub(crate) struct PingTracker {
    pending: DashMap<Nonce, oneshot::Sender<()>>,
    closed: AtomicBool,
}

impl PingTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh nonce.
    ///
    /// Fails once the tracker is closed, so no waiter is left behind by a racing teardown.
    pub(crate) fn register(self: &Arc<Self>) -> Result<PendingPing, Error> {
        let (tx, rx) = oneshot::channel();

        let nonce = loop {
            let mut nonce = [0u8; NONCE_LEN];
            rand::rng().fill_bytes(&mut nonce);

            if let Entry::Vacant(entry) = self.pending.entry(nonce) {
                entry.insert(tx);
                break nonce;
            }
        };

        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&nonce);

            return Err(Error::ConnectionClosed);
        }

        Ok(PendingPing {
            nonce,
            rx,
            tracker: Arc::downgrade(self),
        })
    }

    /// Resolves the ping whose nonce equals `payload`.
    ///
    /// Returns `false` for unknown payloads.
    pub(crate) fn resolve(&self, payload: &[u8]) -> bool {
        let Ok(nonce) = Nonce::try_from(payload) else {
            return false;
        };

        match self.pending.remove(&nonce) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Forgets an abandoned ping. No-op once it was resolved.
    fn forget(&self, nonce: &Nonce) {
        self.pending.remove(nonce);
    }

    /// Fails every pending ping and every future registration.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        // Dropping the senders fails the receivers.
        self.pending.clear();
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// A ping awaiting its pong.
///
/// Resolves to `Ok(())` when the matching pong arrives and to
/// [`Error::ConnectionClosed`] if the connection tears down first.
/// No timeout is applied; wrap it in one if the wait must be bounded.
/// Dropping it, e.g. when that timeout fires, forgets the ping.
#[derive(Debug)]
#[must_use = "a ping does nothing unless awaited"]
pub struct PendingPing {
    nonce: Nonce,
    rx: oneshot::Receiver<()>,
    tracker: Weak<PingTracker>,
}

impl PendingPing {
    /// The nonce carried by the ping frame.
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }
}

impl Future for PendingPing {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| Error::ConnectionClosed))
    }
}

impl Drop for PendingPing {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.forget(&self.nonce);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_matching_nonce() {
        let tracker = Arc::new(PingTracker::new());
        let ping = tracker.register().unwrap();

        assert_eq!(tracker.pending_count(), 1);
        assert!(tracker.resolve(&ping.nonce().clone()));
        assert_eq!(tracker.pending_count(), 0);

        ping.await.unwrap();
    }

    #[tokio::test]
    async fn resolves_only_once() {
        let tracker = Arc::new(PingTracker::new());
        let ping = tracker.register().unwrap();
        let nonce = *ping.nonce();

        assert!(tracker.resolve(&nonce));
        assert!(!tracker.resolve(&nonce));

        ping.await.unwrap();
    }

    #[test]
    fn unknown_payload_is_ignored() {
        let tracker = Arc::new(PingTracker::new());
        let _ping = tracker.register().unwrap();

        assert!(!tracker.resolve(&[0u8; NONCE_LEN]));
        assert!(!tracker.resolve(b"short"));
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn dropped_ping_is_forgotten() {
        let tracker = Arc::new(PingTracker::new());
        let kept = tracker.register().unwrap();
        let dropped = tracker.register().unwrap();
        let nonce = *dropped.nonce();

        drop(dropped);

        assert_eq!(tracker.pending_count(), 1);
        assert!(!tracker.resolve(&nonce));
        assert!(tracker.resolve(kept.nonce()));
    }

    #[test]
    fn ping_outliving_its_tracker() {
        let tracker = Arc::new(PingTracker::new());
        let ping = tracker.register().unwrap();

        drop(tracker);
        drop(ping);
    }

    #[tokio::test]
    async fn close_fails_pending_and_future_pings() {
        let tracker = Arc::new(PingTracker::new());
        let first = tracker.register().unwrap();
        let second = tracker.register().unwrap();

        assert_ne!(first.nonce(), second.nonce());

        tracker.close();

        assert!(matches!(first.await, Err(Error::ConnectionClosed)));
        assert!(matches!(second.await, Err(Error::ConnectionClosed)));
        assert!(matches!(tracker.register(), Err(Error::ConnectionClosed)));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_registrations() {
        let tracker = Arc::new(PingTracker::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.register().unwrap() })
            })
            .collect();

        let mut pings = Vec::new();
        for handle in handles {
            pings.push(handle.await.unwrap());
        }

        assert_eq!(tracker.pending_count(), 16);

        for ping in pings.iter().rev() {
            assert!(tracker.resolve(ping.nonce()));
        }

        for ping in pings {
            ping.await.unwrap();
        }
    }
}
