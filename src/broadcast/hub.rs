//! Observer registry and fan-out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use uuid::Uuid;

use crate::capture::DocumentId;
use crate::config::BroadcastConfig;
use crate::observability::metrics;

/// Live notification about one request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    /// Document id, decimal.
    pub docid: String,
    /// Session shard (`session_id % 100`).
    pub sid: i64,
    pub host: String,
    pub path: String,
    pub method: String,
}

impl BroadcastEvent {
    pub fn new(
        document_id: DocumentId,
        session_id: i64,
        host: impl Into<String>,
        path: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            docid: document_id.to_string(),
            sid: session_id.rem_euclid(100),
            host: host.into(),
            path: path.into(),
            method: method.into(),
        }
    }
}

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0.simple())
    }
}

struct Observer {
    user: String,
    tx: mpsc::Sender<BroadcastEvent>,
}

/// Handed to the transport of a newly registered observer.
pub struct Subscription {
    pub id: ObserverId,
    pub events: mpsc::Receiver<BroadcastEvent>,
}

/// Registry of connected observers.
///
/// Each observer has its own bounded FIFO queue, so events reach a given
/// observer in broadcast order. The lock is never held across an await.
pub struct BroadcastHub {
    observers: Mutex<HashMap<ObserverId, Observer>>,
    capacity: usize,
    send_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(config: &BroadcastConfig) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            capacity: config.queue_capacity.max(1),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }

    /// Register an observer under its authenticated user name.
    pub fn register(&self, user: impl Into<String>) -> Subscription {
        let (tx, events) = mpsc::channel(self.capacity);
        let id = ObserverId(Uuid::new_v4());
        let user = user.into();

        let count = {
            let mut observers = self.observers.lock().expect("observer registry poisoned");
            observers.insert(id, Observer { user: user.clone(), tx });
            observers.len()
        };
        metrics::record_observers(count);
        tracing::info!(observer = %id, user = %user, observers = count, "Observer registered");

        Subscription { id, events }
    }

    /// Remove an observer. Returns false if it was already gone.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let (removed, count) = {
            let mut observers = self.observers.lock().expect("observer registry poisoned");
            let removed = observers.remove(&id);
            (removed, observers.len())
        };
        match removed {
            Some(observer) => {
                metrics::record_observers(count);
                tracing::info!(observer = %id, user = %observer.user, observers = count, "Observer unregistered");
                true
            }
            None => false,
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().expect("observer registry poisoned").len()
    }

    /// Names of registered observers.
    pub fn observer_users(&self) -> Vec<String> {
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .values()
            .map(|o| o.user.clone())
            .collect()
    }

    /// Push `event` to every observer.
    ///
    /// Returns true if at least one observer accepted it. An observer whose
    /// queue stays full for longer than the send timeout, or whose transport
    /// is gone, is unregistered.
    pub async fn broadcast(&self, event: &BroadcastEvent) -> bool {
        let targets: Vec<(ObserverId, mpsc::Sender<BroadcastEvent>)> = {
            let observers = self.observers.lock().expect("observer registry poisoned");
            observers.iter().map(|(id, o)| (*id, o.tx.clone())).collect()
        };
        if targets.is_empty() {
            return false;
        }

        let mut delivered = 0usize;
        let mut evicted = Vec::new();
        let mut full = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Closed(_)) => evicted.push((id, "closed")),
                Err(TrySendError::Full(event)) => full.push((id, tx, event)),
            }
        }

        // Full queues get one shared grace period, not one each.
        let timeout = self.send_timeout;
        let retries = full.into_iter().map(move |(id, tx, event)| async move {
            let outcome = match tx.send_timeout(event, timeout).await {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Closed(_)) => Err("closed"),
                Err(SendTimeoutError::Timeout(_)) => Err("stalled"),
            };
            (id, outcome)
        });
        for (id, outcome) in join_all(retries).await {
            match outcome {
                Ok(()) => delivered += 1,
                Err(reason) => evicted.push((id, reason)),
            }
        }

        for (id, reason) in evicted {
            if self.unregister(id) {
                tracing::warn!(observer = %id, reason, "Dropped observer");
                metrics::record_observer_dropped(reason);
            }
        }

        delivered > 0
    }
}
