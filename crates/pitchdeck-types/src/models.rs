use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Upper bound on tags attached to a single pitch.
pub const MAX_TAGS: usize = 5;

// -- Pitches --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pitch {
    pub id: Uuid,
    /// Owner of the pitch.
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(default, deserialize_with = "nullable_tags")]
    pub tags: TagSet,
    #[serde(default, deserialize_with = "non_negative_count")]
    pub likes_count: u32,
    #[serde(default, deserialize_with = "non_negative_count")]
    pub comments_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "nullable_flag")]
    pub trending: bool,
}

/// Counters are aggregates maintained by the remote store. A row that drifted
/// below zero is clamped rather than rejected so one bad row can't fail a refresh.
fn non_negative_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?.unwrap_or(0);
    Ok(raw.clamp(0, i64::from(u32::MAX)) as u32)
}

/// Untagged rows may carry `"tags": null`.
fn nullable_tags<'de, D>(deserializer: D) -> Result<TagSet, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?
        .map(TagSet::from)
        .unwrap_or_default())
}

fn nullable_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("tag is empty")]
    Empty,
    #[error("tag already present")]
    Duplicate,
    #[error("a pitch carries at most {} tags", MAX_TAGS)]
    TooMany,
}

/// Ordered, duplicate-free list of at most [`MAX_TAGS`] tags.
///
/// Rows coming from the remote store go through the lossy `From<Vec<String>>`
/// path (blank and duplicate tags dropped, extras truncated); user input goes
/// through [`TagSet::try_push`], which reports why a tag was refused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_push(&mut self, tag: &str) -> Result<(), TagError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(TagError::Empty);
        }
        if self.contains(tag) {
            return Err(TagError::Duplicate);
        }
        if self.0.len() >= MAX_TAGS {
            return Err(TagError::TooMany);
        }
        self.0.push(tag.to_string());
        Ok(())
    }

    /// Removes a tag, keeping the order of the rest. Returns whether it was present.
    pub fn remove(&mut self, tag: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|t| t != tag);
        self.0.len() != before
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for TagSet {
    fn from(raw: Vec<String>) -> Self {
        let mut set = TagSet::new();
        for tag in raw {
            if set.try_push(&tag) == Err(TagError::TooMany) {
                break;
            }
        }
        set
    }
}

impl From<TagSet> for Vec<String> {
    fn from(set: TagSet) -> Self {
        set.0
    }
}

/// The unique relation "user liked pitch". At most one edge exists per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LikeEdge {
    pub pitch_id: Uuid,
    pub user_id: Uuid,
}

// -- Profiles --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub full_name: String,
    #[serde(default)]
    pub startup_name: Option<String>,
}

impl Profile {
    /// Up to two uppercase initials, e.g. "Ada Lovelace" -> "AL".
    pub fn initials(&self) -> String {
        self.full_name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .take(2)
            .collect()
    }
}

// -- Comments --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub pitch_id: Uuid,
    /// Author of the comment.
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A comment joined with its author's profile, if the profile still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentView {
    pub comment: Comment,
    pub author: Option<Profile>,
}

// -- Direct messages --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl DirectMessage {
    /// True if this message travels between `a` and `b`, in either direction.
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

// -- Assistant chat --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_set_rejects_duplicates_and_overflow() {
        let mut tags = TagSet::new();
        for tag in ["fintech", "ai", "b2b", "saas", "seed"] {
            tags.try_push(tag).unwrap();
        }

        assert_eq!(tags.try_push("ai"), Err(TagError::Duplicate));
        assert_eq!(tags.try_push("climate"), Err(TagError::TooMany));
        assert_eq!(tags.try_push("   "), Err(TagError::Empty));
        assert_eq!(
            tags.iter().collect::<Vec<_>>(),
            vec!["fintech", "ai", "b2b", "saas", "seed"]
        );
    }

    #[test]
    fn tag_set_from_remote_is_lossy() {
        let raw = vec![
            "ai".to_string(),
            " ai ".to_string(),
            "".to_string(),
            "health".to_string(),
            "b2c".to_string(),
            "mobile".to_string(),
            "seed".to_string(),
            "extra".to_string(),
        ];
        let tags = TagSet::from(raw);
        assert_eq!(
            tags.iter().collect::<Vec<_>>(),
            vec!["ai", "health", "b2c", "mobile", "seed"]
        );
    }

    #[test]
    fn pitch_counters_clamp_negative() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "user_id": Uuid::new_v4(),
            "title": "Drone pollination",
            "description": "Bees, but robots",
            "tags": ["agtech"],
            "likes_count": -2,
            "comments_count": null,
            "created_at": "2025-01-01T00:00:00Z"
        });
        let pitch: Pitch = serde_json::from_value(json).unwrap();
        assert_eq!(pitch.likes_count, 0);
        assert_eq!(pitch.comments_count, 0);
        assert!(!pitch.trending);
    }

    #[test]
    fn pitch_with_null_tags_and_flag_decodes() {
        let json = r#"{
            "id": "6f1c2a0e-8d2b-4c59-9b7e-3f0a9d2c1b11",
            "user_id": "0b7e4d21-5c3a-4e8f-a1d2-7c9e8f6b5a43",
            "title": "Drone pollination",
            "description": "Bees, but robots",
            "tags": null,
            "likes_count": 3,
            "comments_count": 1,
            "created_at": "2025-01-01T00:00:00Z",
            "trending": null
        }"#;
        let pitch: Pitch = serde_json::from_str(json).unwrap();
        assert!(pitch.tags.is_empty());
        assert!(!pitch.trending);
        assert_eq!(pitch.likes_count, 3);

        let rows = format!("[{}]", json);
        let pitches: Vec<Pitch> = serde_json::from_str(&rows).unwrap();
        assert_eq!(pitches.len(), 1);
    }

    #[test]
    fn initials_take_two_words() {
        let profile = Profile {
            user_id: Uuid::new_v4(),
            full_name: "grace brewster hopper".into(),
            startup_name: None,
        };
        assert_eq!(profile.initials(), "GB");
    }

    #[test]
    fn direct_message_pair_matches_both_directions() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let msg = DirectMessage {
            id: Uuid::new_v4(),
            sender_id: b,
            receiver_id: a,
            content: "hey".into(),
            read: false,
            created_at: Utc::now(),
        };
        assert!(msg.is_between(a, b));
        assert!(!msg.is_between(a, c));
    }
}
