use tracing::{info, warn};
use uuid::Uuid;

use pitchdeck_types::models::{Pitch, TagError, TagSet};

use crate::error::{Result, SyncError};
use crate::remote::RemoteStore;

/// A pitch being composed, before it exists remotely.
#[derive(Debug, Clone, Default)]
pub struct PitchDraft {
    pub title: String,
    pub description: String,
    pub tags: TagSet,
}

impl PitchDraft {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            tags: TagSet::new(),
        }
    }

    pub fn add_tag(&mut self, tag: &str) -> std::result::Result<(), TagError> {
        self.tags.try_push(tag)
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(SyncError::InvalidInput("title is required".into()));
        }
        if self.description.trim().is_empty() {
            return Err(SyncError::InvalidInput("description is required".into()));
        }
        Ok(())
    }
}

/// Publish a new pitch for `user`. Failures are returned to the caller; the feed
/// itself picks the new row up through the next refresh.
pub async fn publish_pitch(
    remote: &dyn RemoteStore,
    user: Option<Uuid>,
    draft: &PitchDraft,
) -> Result<Pitch> {
    let user_id = user.ok_or(SyncError::NotAuthenticated)?;
    draft.validate()?;

    let pitch = remote.insert_pitch(user_id, draft).await.map_err(|e| {
        warn!("Failed to publish pitch for {}: {}", user_id, e);
        e
    })?;

    info!("Pitch {} published by {}", pitch.id, user_id);
    Ok(pitch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn publish_requires_user_and_content() {
        let store = MemoryStore::new();
        let draft = PitchDraft::new("Solar kiosks", "Off-grid charging for markets");

        let err = publish_pitch(&store, None, &draft).await.unwrap_err();
        assert!(matches!(err, SyncError::NotAuthenticated));

        let blank = PitchDraft::new("  ", "something");
        let err = publish_pitch(&store, Some(Uuid::new_v4()), &blank)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn published_pitch_starts_at_zero() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let mut draft = PitchDraft::new("Solar kiosks", "Off-grid charging for markets");
        draft.add_tag("energy").unwrap();
        draft.add_tag("africa").unwrap();

        let pitch = publish_pitch(&store, Some(user), &draft).await.unwrap();
        assert_eq!(pitch.user_id, user);
        assert_eq!(pitch.likes_count, 0);
        assert_eq!(pitch.comments_count, 0);
        assert_eq!(pitch.tags.iter().collect::<Vec<_>>(), vec!["energy", "africa"]);
        assert_eq!(store.list_pitches().await.unwrap().len(), 1);
    }
}
