use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};
use uuid::Uuid;

use pitchdeck_types::models::{CommentView, Profile};

use crate::error::{Result, SyncError};
use crate::remote::{Adjustment, Counter, RemoteStore};

/// List a pitch's comments, oldest first, each joined with its author.
///
/// Authors are resolved with one batched profile lookup for the whole page.
pub async fn list_comments(remote: &dyn RemoteStore, pitch_id: Uuid) -> Result<Vec<CommentView>> {
    let comments = remote.list_comments(pitch_id).await?;

    let mut seen = HashSet::new();
    let author_ids: Vec<Uuid> = comments
        .iter()
        .map(|c| c.user_id)
        .filter(|id| seen.insert(*id))
        .collect();

    let profiles: HashMap<Uuid, Profile> = if author_ids.is_empty() {
        HashMap::new()
    } else {
        remote
            .profiles_by_ids(&author_ids)
            .await?
            .into_iter()
            .map(|p| (p.user_id, p))
            .collect()
    };

    Ok(comments
        .into_iter()
        .map(|comment| CommentView {
            author: profiles.get(&comment.user_id).cloned(),
            comment,
        })
        .collect())
}

/// The comment list of one pitch.
///
/// Writes are never applied optimistically: after every add or remove the
/// thread is re-listed from the remote store, which also picks up correct
/// ordering and author data.
pub struct CommentThread {
    remote: Arc<dyn RemoteStore>,
    pitch_id: Uuid,
    user: Option<Uuid>,
    comments: RwLock<Vec<CommentView>>,
}

impl CommentThread {
    pub fn new(remote: Arc<dyn RemoteStore>, pitch_id: Uuid, user: Option<Uuid>) -> Self {
        Self {
            remote,
            pitch_id,
            user,
            comments: RwLock::new(Vec::new()),
        }
    }

    pub fn pitch_id(&self) -> Uuid {
        self.pitch_id
    }

    /// Last listed comments, without a round trip.
    pub fn cached(&self) -> Vec<CommentView> {
        self.comments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn list(&self) -> Result<Vec<CommentView>> {
        let comments = list_comments(self.remote.as_ref(), self.pitch_id).await?;
        *self.comments.write().unwrap_or_else(PoisonError::into_inner) = comments.clone();
        Ok(comments)
    }

    /// Post a comment as the active user and return the refreshed thread.
    pub async fn add(&self, text: &str) -> Result<Vec<CommentView>> {
        let user_id = self.user.ok_or(SyncError::NotAuthenticated)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::InvalidInput("comment is empty".into()));
        }

        let comment = self
            .remote
            .insert_comment(self.pitch_id, user_id, text)
            .await
            .inspect_err(|e| warn!("Failed to add comment on {}: {}", self.pitch_id, e))?;
        info!("Comment {} added on {}", comment.id, self.pitch_id);

        self.adjust_count(Adjustment::Increment).await;
        self.list().await
    }

    /// Delete one of the active user's comments and return the refreshed thread.
    pub async fn remove(&self, comment_id: Uuid) -> Result<Vec<CommentView>> {
        let user_id = self.user.ok_or(SyncError::NotAuthenticated)?;

        let removed = self.remote.delete_comment(comment_id, user_id).await?;
        if !removed {
            return Err(SyncError::NotFound);
        }
        info!("Comment {} removed from {}", comment_id, self.pitch_id);

        self.adjust_count(Adjustment::Decrement).await;
        self.list().await
    }

    /// The comment itself is already written; a failed counter call only leaves
    /// the aggregate stale until the feed's next refresh.
    async fn adjust_count(&self, adjustment: Adjustment) {
        if let Err(e) = self
            .remote
            .adjust_counter(self.pitch_id, Counter::Comments, adjustment)
            .await
        {
            warn!("Comment counter update on {} failed: {}", self.pitch_id, e);
        }
    }
}
