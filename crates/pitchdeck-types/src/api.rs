//! Request bodies for the row store and the assistant endpoint.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, TagSet};

// -- Pitches --

#[derive(Debug, Clone, Serialize)]
pub struct NewPitch<'a> {
    pub user_id: Uuid,
    pub title: &'a str,
    pub description: &'a str,
    pub tags: &'a TagSet,
}

// -- Likes --

#[derive(Debug, Clone, Serialize)]
pub struct NewLike {
    pub pitch_id: Uuid,
    pub user_id: Uuid,
}

/// Projection used when listing the active user's likes.
#[derive(Debug, Clone, Deserialize)]
pub struct LikedPitchRow {
    pub pitch_id: Uuid,
}

/// Parameters of the counter procedures (`increment_likes`, `decrement_comments`, ...).
#[derive(Debug, Clone, Serialize)]
pub struct CounterParams {
    pub pitch_id_param: Uuid,
}

// -- Comments --

#[derive(Debug, Clone, Serialize)]
pub struct NewComment<'a> {
    pub pitch_id: Uuid,
    pub user_id: Uuid,
    pub content: &'a str,
}

// -- Direct messages --

#[derive(Debug, Clone, Serialize)]
pub struct NewDirectMessage<'a> {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadFlagPatch {
    pub read: bool,
}

// -- Assistant --

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
}
