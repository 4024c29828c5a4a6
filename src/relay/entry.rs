//! Relay session and subscription types
//!
//! A [`RelaySession`] is the per-key state stored in the registry. The pump
//! task owns the broadcast sender; the session only keeps a weak handle so
//! that late subscribers of a finished session are refused instead of
//! waiting forever.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::frame::{Delivery, SessionKey};
use super::upstream::StreamInfo;

/// One open upstream connection and its fan-out
pub struct RelaySession {
    id: u64,
    key: SessionKey,
    source_url: String,
    info: StreamInfo,

    /// Upgraded while the pump is alive
    tx: broadcast::WeakSender<Delivery>,

    subscriber_count: AtomicU32,
    bytes_received: AtomicU64,

    /// Cancelled on stop, and by the pump when it exits
    cancel: CancellationToken,

    created_at: Instant,
}

impl RelaySession {
    pub(super) fn new(
        id: u64,
        key: SessionKey,
        source_url: &str,
        info: StreamInfo,
        tx: &broadcast::Sender<Delivery>,
    ) -> Self {
        Self {
            id,
            key,
            source_url: source_url.to_string(),
            info,
            tx: tx.downgrade(),
            subscriber_count: AtomicU32::new(0),
            bytes_received: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
        }
    }

    /// Registry-unique id, distinguishes successive sessions on one key
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Upstream response metadata
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> u32 {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Total bytes received from upstream
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Whether the session has been stopped or its upstream has finished
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Subscribe to this session's deliveries
    ///
    /// Returns `None` once the pump has exited.
    pub fn subscribe(self: &Arc<Self>) -> Option<Subscription> {
        if self.is_closed() {
            return None;
        }
        let tx = self.tx.upgrade()?;
        Some(Subscription::new(Arc::clone(self), tx.subscribe()))
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            key: self.key.clone(),
            source_url: self.source_url.clone(),
            subscriber_count: self.subscriber_count(),
            bytes_received: self.bytes_received(),
            age: self.age(),
        }
    }

    pub(super) fn add_bytes(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(super) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(super) fn close(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("source_url", &self.source_url)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Statistics for a relay session
#[derive(Debug, Clone)]
pub struct RelayStats {
    pub key: SessionKey,
    pub source_url: String,
    /// Number of active subscribers
    pub subscriber_count: u32,
    pub bytes_received: u64,
    pub age: Duration,
}

/// A subscriber's view of a relay session
///
/// Counts itself in the session's subscriber set for as long as it lives;
/// dropping it detaches.
pub struct Subscription {
    session: Arc<RelaySession>,
    rx: broadcast::Receiver<Delivery>,
    finished: bool,
}

impl Subscription {
    pub(super) fn new(session: Arc<RelaySession>, rx: broadcast::Receiver<Delivery>) -> Self {
        let prev = session.subscriber_count.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            stream = %session.key,
            subscribers = prev + 1,
            "Subscriber added"
        );

        Self {
            session,
            rx,
            finished: false,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.session.key
    }

    pub fn session(&self) -> &Arc<RelaySession> {
        &self.session
    }

    pub fn info(&self) -> &StreamInfo {
        &self.session.info
    }

    /// Receive the next delivery
    ///
    /// Chunks arrive in upstream order. After a terminal delivery every
    /// further call returns [`Delivery::Stopped`].
    pub async fn recv(&mut self) -> Delivery {
        if self.finished {
            return Delivery::Stopped;
        }

        let delivery = match self.rx.recv().await {
            Ok(delivery) => delivery,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    stream = %self.session.key,
                    skipped = skipped,
                    "Subscriber lagged, dropping"
                );
                Delivery::Lagged(skipped)
            }
            Err(RecvError::Closed) => Delivery::Stopped,
        };

        if delivery.is_terminal() {
            self.finished = true;
        }
        delivery
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let prev = self.session.subscriber_count.fetch_sub(1, Ordering::Relaxed);

        tracing::debug!(
            stream = %self.session.key,
            subscribers = prev.saturating_sub(1),
            "Subscriber removed"
        );
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.session.key)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn session(tx: &broadcast::Sender<Delivery>) -> Arc<RelaySession> {
        Arc::new(RelaySession::new(
            1,
            SessionKey::new("s1"),
            "http://radio.test/s1",
            StreamInfo::default(),
            tx,
        ))
    }

    #[tokio::test]
    async fn test_subscriber_count_follows_drop() {
        let (tx, _) = broadcast::channel(8);
        let session = session(&tx);

        let first = session.subscribe().unwrap();
        let second = session.subscribe().unwrap();
        assert_eq!(session.subscriber_count(), 2);

        drop(first);
        assert_eq!(session.subscriber_count(), 1);
        drop(second);
        assert_eq!(session.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_terminal_is_sticky() {
        let (tx, _) = broadcast::channel(8);
        let session = session(&tx);
        let mut sub = session.subscribe().unwrap();

        tx.send(Delivery::Chunk(Bytes::from_static(b"x"))).unwrap();
        tx.send(Delivery::Ended).unwrap();

        assert_eq!(sub.recv().await, Delivery::Chunk(Bytes::from_static(b"x")));
        assert_eq!(sub.recv().await, Delivery::Ended);
        assert_eq!(sub.recv().await, Delivery::Stopped);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_is_dropped() {
        let (tx, _) = broadcast::channel(2);
        let session = session(&tx);
        let mut sub = session.subscribe().unwrap();

        for chunk in [&b"1"[..], b"2", b"3", b"4"] {
            tx.send(Delivery::Chunk(Bytes::copy_from_slice(chunk))).unwrap();
        }

        assert_eq!(sub.recv().await, Delivery::Lagged(2));
        assert_eq!(sub.recv().await, Delivery::Stopped);
    }

    #[tokio::test]
    async fn test_subscribe_after_sender_dropped() {
        let (tx, _) = broadcast::channel(8);
        let session = session(&tx);
        drop(tx);

        assert!(session.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_after_close() {
        let (tx, _) = broadcast::channel(8);
        let session = session(&tx);
        session.close();

        assert!(session.is_closed());
        assert!(session.subscribe().is_none());
    }
}
