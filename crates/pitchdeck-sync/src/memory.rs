//! In-process [`RemoteStore`] with the same observable contract as the real
//! backend: like-edge uniqueness, saturating counter procedures and a change
//! notification for every write. Used for offline previews and throughout the
//! test suites, where it also plays the part of the notification source.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use pitchdeck_realtime::{ChangeDispatcher, ChangeSource, ChangeSubscription};
use pitchdeck_types::events::{ChangeEvent, ChangeKind, Table};
use pitchdeck_types::models::{Comment, DirectMessage, LikeEdge, Pitch, Profile, TagSet};

use crate::error::{Result, SyncError};
use crate::pitches::PitchDraft;
use crate::remote::{Adjustment, Counter, EdgeWrite, RemoteStore};

/// Operations that can be told to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ListPitches,
    InsertLike,
    DeleteLike,
    AdjustCounter,
    InsertComment,
    DeleteComment,
}

#[derive(Default)]
struct MemoryState {
    pitches: Vec<Pitch>,
    likes: HashSet<LikeEdge>,
    comments: Vec<Comment>,
    profiles: HashMap<Uuid, Profile>,
    messages: Vec<DirectMessage>,
    armed_failures: HashSet<FailPoint>,
    profile_lookups: usize,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    dispatcher: ChangeDispatcher,
    latency: Mutex<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            dispatcher: ChangeDispatcher::new(),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every remote call by `latency`, to open windows for interleaving.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    async fn round_trip(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Make the next call of `point` fail with a remote error.
    pub fn fail_next(&self, point: FailPoint) {
        self.state().armed_failures.insert(point);
    }

    fn trip(&self, state: &mut MemoryState, point: FailPoint) -> Result<()> {
        if state.armed_failures.remove(&point) {
            return Err(SyncError::Remote {
                status: 503,
                message: format!("injected failure at {:?}", point),
            });
        }
        Ok(())
    }

    fn notify(&self, table: Table, kind: ChangeKind, record: Option<serde_json::Value>) {
        let event = ChangeEvent::new(table, kind);
        self.dispatcher.broadcast(match record {
            Some(record) => event.with_record(record),
            None => event,
        });
    }

    // -- Seeding and inspection --

    pub fn seed_pitch(&self, owner: Uuid, title: &str, likes_count: u32) -> Pitch {
        let pitch = Pitch {
            id: Uuid::new_v4(),
            user_id: owner,
            title: title.to_string(),
            description: format!("{} (description)", title),
            tags: TagSet::new(),
            likes_count,
            comments_count: 0,
            created_at: Utc::now(),
            trending: false,
        };
        self.state().pitches.push(pitch.clone());
        pitch
    }

    pub fn seed_profile(&self, user_id: Uuid, full_name: &str) -> Profile {
        let profile = Profile {
            user_id,
            full_name: full_name.to_string(),
            startup_name: None,
        };
        self.state().profiles.insert(user_id, profile.clone());
        profile
    }

    pub fn pitch(&self, pitch_id: Uuid) -> Option<Pitch> {
        self.state().pitches.iter().find(|p| p.id == pitch_id).cloned()
    }

    /// Number of like edges currently recorded for a pitch.
    pub fn like_edges(&self, pitch_id: Uuid) -> usize {
        self.state()
            .likes
            .iter()
            .filter(|edge| edge.pitch_id == pitch_id)
            .count()
    }

    /// How many batched profile lookups have been served.
    pub fn profile_lookups(&self) -> usize {
        self.state().profile_lookups
    }

    /// Change a counter behind the client's back, as another writer might.
    pub fn overwrite_likes(&self, pitch_id: Uuid, likes_count: u32) {
        if let Some(pitch) = self.state().pitches.iter_mut().find(|p| p.id == pitch_id) {
            pitch.likes_count = likes_count;
        }
        self.notify(Table::Pitches, ChangeKind::Update, None);
    }

    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }
}

impl ChangeSource for MemoryStore {
    fn subscribe(&self, topics: &[Table]) -> ChangeSubscription {
        self.dispatcher.subscribe(topics)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_pitches(&self) -> Result<Vec<Pitch>> {
        self.round_trip().await;
        let mut state = self.state();
        self.trip(&mut state, FailPoint::ListPitches)?;

        let mut pitches = state.pitches.clone();
        pitches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pitches)
    }

    async fn insert_pitch(&self, user_id: Uuid, draft: &PitchDraft) -> Result<Pitch> {
        self.round_trip().await;
        let pitch = Pitch {
            id: Uuid::new_v4(),
            user_id,
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            tags: draft.tags.clone(),
            likes_count: 0,
            comments_count: 0,
            created_at: Utc::now(),
            trending: false,
        };
        self.state().pitches.push(pitch.clone());
        self.notify(Table::Pitches, ChangeKind::Insert, None);
        Ok(pitch)
    }

    async fn liked_pitch_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.round_trip().await;
        Ok(self
            .state()
            .likes
            .iter()
            .filter(|edge| edge.user_id == user_id)
            .map(|edge| edge.pitch_id)
            .collect())
    }

    async fn insert_like(&self, edge: LikeEdge) -> Result<EdgeWrite> {
        self.round_trip().await;
        let created = {
            let mut state = self.state();
            self.trip(&mut state, FailPoint::InsertLike)?;
            state.likes.insert(edge)
        };

        if !created {
            return Ok(EdgeWrite::AlreadyPresent);
        }
        self.notify(Table::PitchLikes, ChangeKind::Insert, None);
        Ok(EdgeWrite::Created)
    }

    async fn delete_like(&self, edge: LikeEdge) -> Result<EdgeWrite> {
        self.round_trip().await;
        let removed = {
            let mut state = self.state();
            self.trip(&mut state, FailPoint::DeleteLike)?;
            state.likes.remove(&edge)
        };

        if !removed {
            return Ok(EdgeWrite::Absent);
        }
        self.notify(Table::PitchLikes, ChangeKind::Delete, None);
        Ok(EdgeWrite::Removed)
    }

    async fn adjust_counter(
        &self,
        pitch_id: Uuid,
        counter: Counter,
        adjustment: Adjustment,
    ) -> Result<()> {
        self.round_trip().await;
        {
            let mut state = self.state();
            self.trip(&mut state, FailPoint::AdjustCounter)?;

            let pitch = state
                .pitches
                .iter_mut()
                .find(|p| p.id == pitch_id)
                .ok_or(SyncError::NotFound)?;
            let value = match counter {
                Counter::Likes => &mut pitch.likes_count,
                Counter::Comments => &mut pitch.comments_count,
            };
            *value = match adjustment {
                Adjustment::Increment => value.saturating_add(1),
                Adjustment::Decrement => value.saturating_sub(1),
            };
        }
        self.notify(Table::Pitches, ChangeKind::Update, None);
        Ok(())
    }

    async fn list_comments(&self, pitch_id: Uuid) -> Result<Vec<Comment>> {
        self.round_trip().await;
        let mut comments: Vec<Comment> = self
            .state()
            .comments
            .iter()
            .filter(|c| c.pitch_id == pitch_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn insert_comment(
        &self,
        pitch_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<Comment> {
        self.round_trip().await;
        let comment = Comment {
            id: Uuid::new_v4(),
            pitch_id,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        {
            let mut state = self.state();
            self.trip(&mut state, FailPoint::InsertComment)?;
            if !state.pitches.iter().any(|p| p.id == pitch_id) {
                return Err(SyncError::NotFound);
            }
            state.comments.push(comment.clone());
        }
        self.notify(Table::Comments, ChangeKind::Insert, None);
        Ok(comment)
    }

    async fn delete_comment(&self, comment_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.round_trip().await;
        let removed = {
            let mut state = self.state();
            self.trip(&mut state, FailPoint::DeleteComment)?;
            let before = state.comments.len();
            state
                .comments
                .retain(|c| !(c.id == comment_id && c.user_id == user_id));
            state.comments.len() != before
        };

        if removed {
            self.notify(Table::Comments, ChangeKind::Delete, None);
        }
        Ok(removed)
    }

    async fn profiles_by_ids(&self, user_ids: &[Uuid]) -> Result<Vec<Profile>> {
        self.round_trip().await;
        let mut state = self.state();
        state.profile_lookups += 1;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).cloned())
            .collect())
    }

    async fn list_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<DirectMessage>> {
        self.round_trip().await;
        let mut messages: Vec<DirectMessage> = self
            .state()
            .messages
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect();
        messages.sort_by(|x, y| x.created_at.cmp(&y.created_at));
        Ok(messages)
    }

    async fn insert_direct_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<DirectMessage> {
        self.round_trip().await;
        let message = DirectMessage {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content: content.to_string(),
            read: false,
            created_at: Utc::now(),
        };
        self.state().messages.push(message.clone());
        self.notify(
            Table::DirectMessages,
            ChangeKind::Insert,
            serde_json::to_value(&message).ok(),
        );
        Ok(message)
    }

    async fn mark_conversation_read(&self, reader: Uuid, peer: Uuid) -> Result<u64> {
        self.round_trip().await;
        let mut changed = 0;
        for message in self.state().messages.iter_mut() {
            if message.sender_id == peer && message.receiver_id == reader && !message.read {
                message.read = true;
                changed += 1;
            }
        }

        if changed > 0 {
            self.notify(Table::DirectMessages, ChangeKind::Update, None);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn like_edges_are_unique() {
        let store = MemoryStore::new();
        let pitch = store.seed_pitch(Uuid::new_v4(), "Lunar mining", 0);
        let edge = LikeEdge {
            pitch_id: pitch.id,
            user_id: Uuid::new_v4(),
        };

        assert_eq!(store.insert_like(edge).await.unwrap(), EdgeWrite::Created);
        assert_eq!(store.insert_like(edge).await.unwrap(), EdgeWrite::AlreadyPresent);
        assert_eq!(store.like_edges(pitch.id), 1);

        assert_eq!(store.delete_like(edge).await.unwrap(), EdgeWrite::Removed);
        assert_eq!(store.delete_like(edge).await.unwrap(), EdgeWrite::Absent);
    }

    #[tokio::test]
    async fn counters_never_go_negative() {
        let store = MemoryStore::new();
        let pitch = store.seed_pitch(Uuid::new_v4(), "Lunar mining", 0);

        store
            .adjust_counter(pitch.id, Counter::Likes, Adjustment::Decrement)
            .await
            .unwrap();
        assert_eq!(store.pitch(pitch.id).unwrap().likes_count, 0);
    }

    #[tokio::test]
    async fn writes_publish_notifications() {
        let store = MemoryStore::new();
        let pitch = store.seed_pitch(Uuid::new_v4(), "Lunar mining", 0);
        let mut sub = store.subscribe(&[Table::PitchLikes]);

        let edge = LikeEdge {
            pitch_id: pitch.id,
            user_id: Uuid::new_v4(),
        };
        store.insert_like(edge).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.table, Table::PitchLikes);
        assert_eq!(event.kind, ChangeKind::Insert);
    }

    #[tokio::test]
    async fn armed_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(FailPoint::ListPitches);
        assert!(store.list_pitches().await.is_err());
        assert!(store.list_pitches().await.is_ok());
    }
}
