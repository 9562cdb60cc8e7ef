use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;

use pitchdeck_types::models::LikeEdge;

use crate::engagement::EngagementStore;
use crate::error::{Result, SyncError};
use crate::remote::{Adjustment, Counter, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The remote edge and counter now reflect `liked`.
    Confirmed { liked: bool },
    /// A later toggle on the same pitch took over before this one reached the
    /// remote store; its write is the one that counts.
    Superseded,
}

/// Two-phase like toggling: apply to the [`EngagementStore`] immediately, then
/// confirm remotely.
///
/// A failed remote phase is reported to the caller but the local edit is left in
/// place; the next authoritative refresh is what repairs any drift.
pub struct OptimisticMutator {
    store: Arc<EngagementStore>,
    remote: Arc<dyn RemoteStore>,
    /// Per-pitch write lanes: remote phases for one pitch run one at a time.
    lanes: Lanes,
}

type Lanes = Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>;

impl OptimisticMutator {
    pub fn new(store: Arc<EngagementStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            remote,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn toggle_like(&self, pitch_id: Uuid) -> Result<ToggleOutcome> {
        let user_id = self.store.active_user().ok_or(SyncError::NotAuthenticated)?;

        // Phase 1: local, synchronous, visible right away
        let local = self
            .store
            .toggle_local_like(pitch_id)
            .ok_or(SyncError::NotFound)?;

        // Phase 2: remote, serialized per pitch
        let lease = self.lease(pitch_id);
        let result = {
            let _turn = lease.lane.lock().await;
            if self.store.like_generation(pitch_id) != local.generation {
                debug!("Like toggle on {} superseded before its remote write", pitch_id);
                Ok(ToggleOutcome::Superseded)
            } else {
                self.confirm(LikeEdge { pitch_id, user_id }, local.liked).await
            }
        };
        drop(lease);

        result.inspect_err(|e| {
            warn!(
                "Like toggle on {} failed remotely, keeping local state until next refresh: {}",
                pitch_id, e
            );
        })
    }

    async fn confirm(&self, edge: LikeEdge, liked: bool) -> Result<ToggleOutcome> {
        let write = if liked {
            self.remote.insert_like(edge).await?
        } else {
            self.remote.delete_like(edge).await?
        };

        // The counter only follows a real edge change, so a duplicate insert or a
        // delete of a missing edge can never skew it.
        if write.changed() {
            self.remote
                .adjust_counter(edge.pitch_id, Counter::Likes, Adjustment::for_edge(liked))
                .await?;
        } else {
            debug!("Like edge {:?} already in target state ({:?})", edge, write);
        }

        Ok(ToggleOutcome::Confirmed { liked })
    }

    fn lease(&self, pitch_id: Uuid) -> LaneLease<'_> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        LaneLease {
            lanes: &self.lanes,
            pitch_id,
            lane: lanes.entry(pitch_id).or_default().clone(),
        }
    }
}

/// A claim on a pitch's write lane. The lane's map entry goes away with the
/// last lease, including when a toggle is cancelled mid-flight.
struct LaneLease<'a> {
    lanes: &'a Lanes,
    pitch_id: Uuid,
    lane: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for LaneLease<'_> {
    fn drop(&mut self) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        // Map entry plus ours: nobody else is queued on this lane
        if Arc::strong_count(&self.lane) == 2 {
            lanes.remove(&self.pitch_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::refresh;
    use crate::memory::{FailPoint, MemoryStore};

    async fn setup(likes: u32) -> (Arc<MemoryStore>, Arc<EngagementStore>, OptimisticMutator, Uuid) {
        let remote = Arc::new(MemoryStore::new());
        let pitch = remote.seed_pitch(Uuid::new_v4(), "Vertical farms", likes);
        let store = Arc::new(EngagementStore::new(Some(Uuid::new_v4())));
        refresh(&store, remote.as_ref()).await.unwrap();
        let mutator = OptimisticMutator::new(store.clone(), remote.clone());
        (remote, store, mutator, pitch.id)
    }

    #[tokio::test]
    async fn toggle_requires_user() {
        let remote = Arc::new(MemoryStore::new());
        let store = Arc::new(EngagementStore::new(None));
        let mutator = OptimisticMutator::new(store, remote);

        let err = mutator.toggle_like(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::NotAuthenticated));
    }

    #[tokio::test]
    async fn like_then_unlike_round_trips() {
        let (remote, store, mutator, pitch_id) = setup(3).await;

        let outcome = mutator.toggle_like(pitch_id).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::Confirmed { liked: true });
        assert_eq!(remote.like_edges(pitch_id), 1);
        assert_eq!(remote.pitch(pitch_id).unwrap().likes_count, 4);
        assert_eq!(store.pitch(pitch_id).unwrap().likes_count, 4);

        mutator.toggle_like(pitch_id).await.unwrap();
        assert_eq!(remote.like_edges(pitch_id), 0);
        assert_eq!(remote.pitch(pitch_id).unwrap().likes_count, 3);
        assert!(!store.is_liked(pitch_id));
    }

    #[tokio::test]
    async fn failed_edge_write_keeps_local_state() {
        let (remote, store, mutator, pitch_id) = setup(3).await;
        remote.fail_next(FailPoint::InsertLike);

        assert!(mutator.toggle_like(pitch_id).await.is_err());
        assert!(store.is_liked(pitch_id));
        assert_eq!(store.pitch(pitch_id).unwrap().likes_count, 4);

        // Authoritative refresh repairs the drift
        refresh(&store, remote.as_ref()).await.unwrap();
        assert!(!store.is_liked(pitch_id));
        assert_eq!(store.pitch(pitch_id).unwrap().likes_count, 3);
    }

    #[tokio::test]
    async fn failed_counter_rpc_drifts_until_refresh() {
        let (remote, store, mutator, pitch_id) = setup(0).await;
        remote.fail_next(FailPoint::AdjustCounter);

        assert!(mutator.toggle_like(pitch_id).await.is_err());
        assert_eq!(remote.like_edges(pitch_id), 1);
        assert_eq!(remote.pitch(pitch_id).unwrap().likes_count, 0);

        refresh(&store, remote.as_ref()).await.unwrap();
        assert!(store.is_liked(pitch_id));
        assert_eq!(store.pitch(pitch_id).unwrap().likes_count, 0);
    }

    #[tokio::test]
    async fn lanes_are_released() {
        let (_remote, _store, mutator, pitch_id) = setup(0).await;
        mutator.toggle_like(pitch_id).await.unwrap();
        assert!(mutator.lanes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_toggle_releases_lane() {
        let (remote, store, mutator, pitch_id) = setup(0).await;
        remote.set_latency(std::time::Duration::from_millis(200));

        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(10), mutator.toggle_like(pitch_id))
                .await;
        assert!(cancelled.is_err());
        assert!(store.is_liked(pitch_id));
        assert!(mutator.lanes.lock().unwrap().is_empty());
    }
}
