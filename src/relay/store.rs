//! Relay manager implementation
//!
//! The registry of open upstream sessions. Every key maps to a slot whose
//! `OnceCell` is initialized by exactly one upstream connect; concurrent
//! callers for the same key wait on that connect instead of opening their
//! own, and other keys are never blocked by it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, OnceCell, RwLock};

use crate::error::Result;

use super::config::RelayConfig;
use super::entry::{RelaySession, RelayStats, Subscription};
use super::frame::{Delivery, SessionKey};
use super::upstream::{ByteStream, HttpUpstream, StreamInfo, Upstream};

#[derive(Default)]
struct Slot {
    session: OnceCell<Arc<RelaySession>>,
}

type SessionMap = HashMap<SessionKey, Arc<Slot>>;

/// Registry of live upstream sessions
///
/// Thread-safe via `RwLock`. The lock is never held across upstream I/O.
pub struct RelayManager {
    sessions: Arc<RwLock<SessionMap>>,
    upstream: Arc<dyn Upstream>,
    config: RelayConfig,
    next_session_id: AtomicU64,
}

impl RelayManager {
    /// Create a manager that pulls streams over HTTP
    pub fn new(config: RelayConfig) -> Result<Self> {
        let upstream = Arc::new(HttpUpstream::new(&config)?);
        Ok(Self::with_upstream(config, upstream))
    }

    /// Create a manager with a custom upstream source
    pub fn with_upstream(config: RelayConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            upstream,
            config,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Open the session for `key`, or return the live one
    pub async fn create(&self, key: &SessionKey, source_url: &str) -> Result<Arc<RelaySession>> {
        let subscription = self.attach(key, source_url).await?;
        Ok(Arc::clone(subscription.session()))
    }

    /// Open or join the session for `key` and subscribe to it
    ///
    /// When this call opens the session, the subscription exists before the
    /// first upstream byte is read.
    pub async fn attach(&self, key: &SessionKey, source_url: &str) -> Result<Subscription> {
        loop {
            let slot = {
                let mut sessions = self.sessions.write().await;
                Arc::clone(sessions.entry(key.clone()).or_default())
            };

            let mut first = None;
            let first_ref = &mut first;
            let result = slot
                .session
                .get_or_try_init(|| async move {
                    let (session, subscription) = self.open(key, source_url).await?;
                    *first_ref = Some(subscription);
                    Ok::<_, crate::error::Error>(session)
                })
                .await;

            let session = match result {
                Ok(session) => Arc::clone(session),
                Err(e) => {
                    self.remove_if_empty(key, &slot).await;
                    return Err(e);
                }
            };

            if let Some(subscription) = first {
                // A stop may have removed the slot while we were connecting
                if !self.is_current(key, &slot).await {
                    session.close();
                }
                return Ok(subscription);
            }

            if let Some(subscription) = session.subscribe() {
                if session.source_url() != source_url {
                    tracing::debug!(
                        stream = %key,
                        existing = session.source_url(),
                        requested = source_url,
                        "Joining session with a different source URL"
                    );
                }
                return Ok(subscription);
            }

            // Stale slot: the pump finished between lookup and subscribe
            self.remove_slot(key, &slot).await;
        }
    }

    /// Subscribe to an existing session
    pub async fn subscribe(&self, key: &SessionKey) -> Option<Subscription> {
        let sessions = self.sessions.read().await;
        sessions
            .get(key)
            .and_then(|slot| slot.session.get())
            .and_then(|session| session.subscribe())
    }

    /// Stop a session and close its upstream connection
    ///
    /// Returns whether a session was stopped. Unknown keys are a no-op.
    pub async fn stop(&self, key: &SessionKey) -> bool {
        let slot = self.sessions.write().await.remove(key);

        match slot.as_ref().and_then(|slot| slot.session.get()) {
            Some(session) => {
                session.close();
                tracing::info!(
                    stream = %key,
                    subscribers = session.subscriber_count(),
                    bytes = session.bytes_received(),
                    "Session stopped"
                );
                true
            }
            None => false,
        }
    }

    /// Stop a session only if nobody is subscribed any more
    pub async fn release(&self, key: &SessionKey) -> bool {
        let mut sessions = self.sessions.write().await;

        let idle = sessions
            .get(key)
            .and_then(|slot| slot.session.get())
            .map(|session| session.subscriber_count() == 0)
            .unwrap_or(false);

        if !idle {
            return false;
        }

        if let Some(session) = sessions.remove(key).and_then(|slot| slot.session.get().cloned()) {
            session.close();
            tracing::info!(stream = %key, "Session released, no subscribers");
        }
        true
    }

    /// Stop every session
    pub async fn stop_all(&self) {
        let drained: Vec<(SessionKey, Arc<Slot>)> = self.sessions.write().await.drain().collect();

        for (key, slot) in drained {
            if let Some(session) = slot.session.get() {
                session.close();
                tracing::info!(stream = %key, "Session stopped (shutdown)");
            }
        }
    }

    /// Read upstream metadata without opening a session
    pub async fn probe(&self, source_url: &str) -> Result<StreamInfo> {
        self.upstream.probe(source_url).await
    }

    /// Check if a live session exists for `key`
    pub async fn contains(&self, key: &SessionKey) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(key)
            .and_then(|slot| slot.session.get())
            .map(|session| !session.is_closed())
            .unwrap_or(false)
    }

    /// Get session statistics
    pub async fn stats(&self, key: &SessionKey) -> Option<RelayStats> {
        let sessions = self.sessions.read().await;
        sessions
            .get(key)
            .and_then(|slot| slot.session.get())
            .map(|session| session.stats())
    }

    /// Get total number of open sessions
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|slot| slot.session.get().is_some())
            .count()
    }

    async fn open(
        &self,
        key: &SessionKey,
        source_url: &str,
    ) -> Result<(Arc<RelaySession>, Subscription)> {
        let upstream = self.upstream.connect(source_url).await?;

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = broadcast::channel(self.config.broadcast_capacity);
        let session = Arc::new(RelaySession::new(
            id,
            key.clone(),
            source_url,
            upstream.info,
            &tx,
        ));
        let subscription = Subscription::new(Arc::clone(&session), rx);

        tracing::info!(
            stream = %key,
            session_id = id,
            url = source_url,
            content_type = ?session.info().content_type,
            "Session opened"
        );

        tokio::spawn(pump(
            Arc::clone(&session),
            tx,
            upstream.body,
            self.config.read_timeout,
            Arc::clone(&self.sessions),
        ));

        Ok((session, subscription))
    }

    async fn is_current(&self, key: &SessionKey, slot: &Arc<Slot>) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(key)
            .map(|current| Arc::ptr_eq(current, slot))
            .unwrap_or(false)
    }

    async fn remove_slot(&self, key: &SessionKey, slot: &Arc<Slot>) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(key)
            .map(|current| Arc::ptr_eq(current, slot))
            .unwrap_or(false)
        {
            sessions.remove(key);
        }
    }

    async fn remove_if_empty(&self, key: &SessionKey, slot: &Arc<Slot>) {
        if slot.session.get().is_none() {
            self.remove_slot(key, slot).await;
        }
    }
}

/// Forward upstream chunks to the broadcast channel until EOF, error or stop
///
/// The registry entry is removed before the terminal delivery is sent, so a
/// subscriber that sees the end of the stream also sees the key gone.
async fn pump(
    session: Arc<RelaySession>,
    tx: broadcast::Sender<Delivery>,
    mut body: ByteStream,
    read_timeout: Duration,
    sessions: Arc<RwLock<SessionMap>>,
) {
    let cancel = session.cancel_token().clone();

    let terminal = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break Delivery::Stopped,

            next = tokio::time::timeout(read_timeout, body.next()) => match next {
                Ok(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    session.add_bytes(chunk.len());
                    // Err only means there are no receivers right now
                    let _ = tx.send(Delivery::Chunk(chunk));
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(stream = %session.key(), error = %e, "Upstream read failed");
                    break Delivery::Failed(e.to_string());
                }
                Ok(None) => {
                    tracing::info!(
                        stream = %session.key(),
                        bytes = session.bytes_received(),
                        "Upstream ended"
                    );
                    break Delivery::Ended;
                }
                Err(_) => {
                    tracing::warn!(
                        stream = %session.key(),
                        timeout_secs = read_timeout.as_secs(),
                        "Upstream read timed out"
                    );
                    break Delivery::Failed(format!(
                        "no data from upstream for {}s",
                        read_timeout.as_secs()
                    ));
                }
            },
        }
    };

    // Close the upstream connection before anything else
    drop(body);
    session.close();

    {
        let mut map = sessions.write().await;
        let ours = map
            .get(session.key())
            .and_then(|slot| slot.session.get())
            .map(|current| current.id() == session.id())
            .unwrap_or(false);
        if ours {
            map.remove(session.key());
        }
    }

    let _ = tx.send(terminal);
}
