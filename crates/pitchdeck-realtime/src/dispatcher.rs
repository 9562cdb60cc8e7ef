use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use pitchdeck_types::events::{ChangeEvent, Table};

use crate::ChangeSource;

const DEFAULT_CAPACITY: usize = 1024;

/// Fans change notifications out to every live subscription.
#[derive(Clone)]
pub struct ChangeDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscriber sees every event; topic filtering happens on the receiving side
    broadcast_tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Deliver an event to all current subscribers. Nobody listening is not an error.
    pub fn broadcast(&self, event: ChangeEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

impl ChangeSource for ChangeDispatcher {
    fn subscribe(&self, topics: &[Table]) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.inner.broadcast_tx.subscribe(),
            topics: topics.to_vec(),
        }
    }
}

/// A receiver scoped to a set of collections. Dropping it unsubscribes.
pub struct ChangeSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
    topics: Vec<Table>,
}

impl ChangeSubscription {
    /// Wait for the next event on a watched collection.
    ///
    /// Returns `None` once the dispatcher is gone. If this receiver fell behind
    /// and events were dropped, a `Resync` event is returned in their place.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.watches(event.table) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!("Change subscription lagged by {} events", n);
                    return Some(self.resync_event());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv): the next already-queued
    /// event on a watched collection, if any.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.watches(event.table) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => {
                    warn!("Change subscription lagged by {} events", n);
                    return Some(self.resync_event());
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn watches(&self, table: Table) -> bool {
        self.topics.contains(&table)
    }

    fn resync_event(&self) -> ChangeEvent {
        ChangeEvent::resync(self.topics.first().copied().unwrap_or(Table::Pitches))
    }
}
