use async_trait::async_trait;
use uuid::Uuid;

use pitchdeck_types::models::{Comment, DirectMessage, LikeEdge, Pitch, Profile};

use crate::error::Result;
use crate::pitches::PitchDraft;

/// What a like-edge write actually did to the remote relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeWrite {
    Created,
    /// Insert hit the (pitch, user) uniqueness constraint.
    AlreadyPresent,
    Removed,
    /// Delete matched no row.
    Absent,
}

impl EdgeWrite {
    /// Whether the edge set changed, i.e. whether the aggregate counter must follow.
    pub fn changed(self) -> bool {
        matches!(self, Self::Created | Self::Removed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Likes,
    Comments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Increment,
    Decrement,
}

impl Adjustment {
    pub fn for_edge(added: bool) -> Self {
        if added { Self::Increment } else { Self::Decrement }
    }
}

/// Name of the remote procedure that applies `adjustment` to `counter`.
pub fn counter_procedure(counter: Counter, adjustment: Adjustment) -> &'static str {
    match (counter, adjustment) {
        (Counter::Likes, Adjustment::Increment) => "increment_likes",
        (Counter::Likes, Adjustment::Decrement) => "decrement_likes",
        (Counter::Comments, Adjustment::Increment) => "increment_comments",
        (Counter::Comments, Adjustment::Decrement) => "decrement_comments",
    }
}

/// The client-visible contract of the authoritative row store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    // -- Pitches --

    /// All pitches, newest first.
    async fn list_pitches(&self) -> Result<Vec<Pitch>>;

    async fn insert_pitch(&self, user_id: Uuid, draft: &PitchDraft) -> Result<Pitch>;

    // -- Likes --

    async fn liked_pitch_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    async fn insert_like(&self, edge: LikeEdge) -> Result<EdgeWrite>;

    async fn delete_like(&self, edge: LikeEdge) -> Result<EdgeWrite>;

    /// Atomic server-side increment/decrement of a pitch's aggregate counter.
    async fn adjust_counter(
        &self,
        pitch_id: Uuid,
        counter: Counter,
        adjustment: Adjustment,
    ) -> Result<()>;

    // -- Comments --

    /// Comments on one pitch, oldest first.
    async fn list_comments(&self, pitch_id: Uuid) -> Result<Vec<Comment>>;

    async fn insert_comment(&self, pitch_id: Uuid, user_id: Uuid, content: &str)
    -> Result<Comment>;

    /// Deletes a comment authored by `user_id`. Returns whether a row was removed.
    async fn delete_comment(&self, comment_id: Uuid, user_id: Uuid) -> Result<bool>;

    // -- Profiles --

    /// One batched lookup for any number of users. Unknown ids are simply absent.
    async fn profiles_by_ids(&self, user_ids: &[Uuid]) -> Result<Vec<Profile>>;

    // -- Direct messages --

    /// Both directions of the conversation between `a` and `b`, oldest first.
    async fn list_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<DirectMessage>>;

    async fn insert_direct_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<DirectMessage>;

    /// Flags every unread message from `peer` to `reader` as read. Returns how many changed.
    async fn mark_conversation_read(&self, reader: Uuid, peer: Uuid) -> Result<u64>;
}
