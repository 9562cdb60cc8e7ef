use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use pitchdeck_realtime::ChangeSource;
use pitchdeck_types::events::Table;

use crate::engagement::{EngagementStore, refresh};
use crate::remote::RemoteStore;

/// Collections whose changes invalidate the feed.
pub const ENGAGEMENT_TOPICS: [Table; 3] = [Table::Pitches, Table::PitchLikes, Table::Comments];

/// Turns change notifications into authoritative refreshes of an [`EngagementStore`].
///
/// No attempt is made to merge individual changes: any notification, from any
/// client, collapses into "refetch everything". Bursts are coalesced into a
/// single refetch.
pub struct RealtimeSubscriber {
    store: Arc<EngagementStore>,
    remote: Arc<dyn RemoteStore>,
    source: Arc<dyn ChangeSource>,
    debounce: Duration,
}

impl RealtimeSubscriber {
    pub fn new(
        store: Arc<EngagementStore>,
        remote: Arc<dyn RemoteStore>,
        source: Arc<dyn ChangeSource>,
    ) -> Self {
        Self {
            store,
            remote,
            source,
            debounce: Duration::ZERO,
        }
    }

    /// Wait this long after a notification before refetching, so that a burst
    /// of changes costs one refetch.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start listening. The subscription lives until the handle is dropped or
    /// the store's active user changes.
    pub fn subscribe(&self) -> SubscriptionHandle {
        // Watch before reading the user so a switch in between still counts as a change
        let mut revisions = self.store.subscribe();
        let user = self.store.active_user();
        let mut subscription = self.source.subscribe(&ENGAGEMENT_TOPICS);
        let store = self.store.clone();
        let remote = self.remote.clone();
        let debounce = self.debounce;

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = subscription.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    changed = revisions.changed() => {
                        if changed.is_err() || store.active_user() != user {
                            debug!("Active user changed, ending feed subscription");
                            break;
                        }
                        continue;
                    }
                };

                if !debounce.is_zero() {
                    tokio::time::sleep(debounce).await;
                }
                let mut coalesced = 0;
                while subscription.try_recv().is_some() {
                    coalesced += 1;
                }
                trace!(
                    "Change on {} ({:?}), {} more coalesced, refreshing",
                    event.table.as_str(),
                    event.kind,
                    coalesced
                );

                // Background sync failures are not surfaced; the next notification retries
                if let Err(e) = refresh(&store, remote.as_ref()).await {
                    warn!("Background feed refresh failed: {}", e);
                }
            }
            debug!("Feed subscription closed");
        });

        SubscriptionHandle { task, user }
    }
}

/// Owns a live feed subscription. Dropping it tears the subscription down.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
    user: Option<Uuid>,
}

impl SubscriptionHandle {
    /// The identity this subscription was opened for.
    pub fn user(&self) -> Option<Uuid> {
        self.user
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn dropped_handle_releases_subscription() {
        let remote = Arc::new(MemoryStore::new());
        let store = Arc::new(EngagementStore::new(None));
        let subscriber = RealtimeSubscriber::new(store, remote.clone(), remote.clone());

        let handle = subscriber.subscribe();
        assert_eq!(remote.dispatcher().subscriber_count(), 1);

        handle.unsubscribe();
        // Abort is processed on the next scheduler turn
        for _ in 0..10 {
            if remote.dispatcher().subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.dispatcher().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn user_switch_before_task_starts_ends_subscription() {
        let remote = Arc::new(MemoryStore::new());
        let store = Arc::new(EngagementStore::new(Some(Uuid::new_v4())));
        let subscriber = RealtimeSubscriber::new(store.clone(), remote.clone(), remote.clone());

        let handle = subscriber.subscribe();
        // The spawned task has not been polled yet on this single-threaded runtime
        store.set_active_user(Some(Uuid::new_v4()));

        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.is_active() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscription outlived its user");
        assert_ne!(handle.user(), store.active_user());
    }
}
