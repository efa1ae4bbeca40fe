//! Live observer connections keyed by remote identity.
//!
//! Register, evict and broadcast all go through one async mutex. A broadcast
//! pass holds it for the whole fan-out, so a register racing with a broadcast
//! waits for the pass to finish. Every push is bounded by the write timeout;
//! a slow observer is evicted like a dead one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("connection closed")]
    Closed,
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound half of one observer connection.
#[async_trait]
pub trait PushSink: Send {
    async fn push(&mut self, frame: &str) -> Result<(), PushError>;

    async fn close(&mut self) -> Result<(), PushError>;
}

/// Distinguishes successive connections from the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Entry {
    id: ConnectionId,
    sink: Box<dyn PushSink>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<String>,
}

pub struct Registry {
    connections: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
    write_timeout: Duration,
}

impl Registry {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            write_timeout,
        }
    }

    /// Store `sink` under `identity`. An existing connection with the same
    /// identity is replaced and closed.
    pub async fn register(&self, identity: &str, sink: Box<dyn PushSink>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (replaced, total) = {
            let mut connections = self.connections.lock().await;
            let replaced = connections.insert(identity.to_string(), Entry { id, sink });
            (replaced, connections.len())
        };

        info!(observer = %identity, total, "new observer connection");
        if let Some(mut old) = replaced {
            warn!(observer = %identity, "replaced existing connection with same identity");
            let _ = timeout(self.write_timeout, old.sink.close()).await;
        }
        id
    }

    /// Remove `identity` whatever connection it currently holds.
    pub async fn evict(&self, identity: &str) -> bool {
        let removed = self.connections.lock().await.remove(identity);
        self.finish_eviction(identity, removed).await
    }

    /// Remove `identity` only if it still refers to connection `id`. Used by
    /// connection handlers so a stale handler never drops a newer connection,
    /// and returns `false` when a broadcast already evicted it.
    pub async fn evict_connection(&self, identity: &str, id: ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.lock().await;
            match connections.get(identity) {
                Some(entry) if entry.id == id => connections.remove(identity),
                _ => None,
            }
        };
        self.finish_eviction(identity, removed).await
    }

    async fn finish_eviction(&self, identity: &str, removed: Option<Entry>) -> bool {
        let Some(mut entry) = removed else {
            return false;
        };
        let _ = timeout(self.write_timeout, entry.sink.close()).await;
        info!(observer = %identity, "removed observer connection");
        true
    }

    /// Push `frame` to every registered observer in one critical section.
    /// Failed observers are collected during the pass and removed after it.
    pub async fn broadcast(&self, frame: &str) -> BroadcastReport {
        let mut connections = self.connections.lock().await;
        let mut report = BroadcastReport::default();

        for (identity, entry) in connections.iter_mut() {
            let outcome = match timeout(self.write_timeout, entry.sink.push(frame)).await {
                Ok(result) => result,
                Err(_) => Err(PushError::Timeout(self.write_timeout)),
            };
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(observer = %identity, "failed to send alert to observer: {}", err);
                    report.evicted.push(identity.clone());
                }
            }
        }

        for identity in &report.evicted {
            if let Some(mut entry) = connections.remove(identity) {
                // Best effort; the peer is already unhealthy.
                let _ = timeout(Duration::from_millis(100), entry.sink.close()).await;
                info!(
                    observer = %identity,
                    remaining = connections.len(),
                    "removed observer connection"
                );
            }
        }

        debug!(
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "broadcast pass finished"
        );
        report
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.connections.lock().await.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Close and forget every connection. Used on hub shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Entry)> = self.connections.lock().await.drain().collect();
        for (identity, mut entry) in drained {
            if let Err(err) = timeout(self.write_timeout, entry.sink.close())
                .await
                .unwrap_or(Err(PushError::Timeout(self.write_timeout)))
            {
                debug!(observer = %identity, "close failed: {}", err);
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_TIMEOUT)
    }
}
