use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use pitchdeck_realtime::{ChangeSource, ChangeSubscription};
use pitchdeck_types::events::{ChangeEvent, ChangeKind, Table};
use pitchdeck_types::models::DirectMessage;

use crate::error::{Result, SyncError};
use crate::remote::RemoteStore;

struct Shared {
    me: Uuid,
    peer: Uuid,
    messages: RwLock<Vec<DirectMessage>>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn replace(&self, messages: Vec<DirectMessage>) {
        *self.messages.write().unwrap_or_else(PoisonError::into_inner) = messages;
        self.revision.send_modify(|r| *r += 1);
    }

    /// Append a row of this pair unless it is already present.
    fn append(&self, message: DirectMessage) -> bool {
        if !message.is_between(self.me, self.peer) {
            return false;
        }
        {
            let mut messages = self.messages.write().unwrap_or_else(PoisonError::into_inner);
            if messages.iter().any(|m| m.id == message.id) {
                return false;
            }
            messages.push(message);
        }
        self.revision.send_modify(|r| *r += 1);
        true
    }
}

/// A live direct-message conversation between the active user and one peer.
///
/// The change subscription covers every conversation, so rows are filtered
/// down to this pair before they are shown.
pub struct Conversation {
    remote: Arc<dyn RemoteStore>,
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl Conversation {
    pub async fn open(
        remote: Arc<dyn RemoteStore>,
        source: &dyn ChangeSource,
        me: Uuid,
        peer: Uuid,
    ) -> Result<Self> {
        // Subscribe first: a message landing during the initial fetch is then
        // either in the fetch or in the stream, and de-duplication handles both
        let subscription = source.subscribe(&[Table::DirectMessages]);
        let messages = remote.list_conversation(me, peer).await?;
        debug!("Opened conversation {} <-> {} ({} messages)", me, peer, messages.len());

        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            me,
            peer,
            messages: RwLock::new(messages),
            revision,
        });
        let listener = tokio::spawn(listen(subscription, shared.clone(), remote.clone()));

        Ok(Self {
            remote,
            shared,
            listener,
        })
    }

    pub fn peer(&self) -> Uuid {
        self.shared.peer
    }

    /// Messages of the pair, oldest first.
    pub fn messages(&self) -> Vec<DirectMessage> {
        self.shared
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn unread_count(&self) -> usize {
        self.shared
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.receiver_id == self.shared.me && !m.read)
            .count()
    }

    /// Bumped whenever the message list changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub async fn send(&self, text: &str) -> Result<DirectMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::InvalidInput("message is empty".into()));
        }

        let message = self
            .remote
            .insert_direct_message(self.shared.me, self.shared.peer, text)
            .await
            .inspect_err(|e| warn!("Failed to send message to {}: {}", self.shared.peer, e))?;
        // The notification for our own insert may already have delivered it
        self.shared.append(message.clone());
        Ok(message)
    }

    /// Mark everything the peer sent as read. Returns how many rows changed.
    pub async fn mark_read(&self) -> Result<u64> {
        let changed = self
            .remote
            .mark_conversation_read(self.shared.me, self.shared.peer)
            .await?;

        {
            let mut messages = self
                .shared
                .messages
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for message in messages
                .iter_mut()
                .filter(|m| m.sender_id == self.shared.peer && m.receiver_id == self.shared.me)
            {
                message.read = true;
            }
        }
        self.shared.revision.send_modify(|r| *r += 1);
        info!("Marked {} messages from {} as read", changed, self.shared.peer);
        Ok(changed)
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen(mut subscription: ChangeSubscription, shared: Arc<Shared>, remote: Arc<dyn RemoteStore>) {
    while let Some(event) = subscription.recv().await {
        if let Some(message) = inserted_message(&event) {
            if shared.append(message) {
                trace!("New message in conversation with {}", shared.peer);
            }
            continue;
        }

        // Updates, deletes, resyncs and bare notifications: refetch the pair
        match remote.list_conversation(shared.me, shared.peer).await {
            Ok(messages) => shared.replace(messages),
            Err(e) => warn!("Conversation refetch with {} failed: {}", shared.peer, e),
        }
    }
    debug!("Conversation listener with {} closed", shared.peer);
}

fn inserted_message(event: &ChangeEvent) -> Option<DirectMessage> {
    if event.kind != ChangeKind::Insert {
        return None;
    }
    let record = event.record.as_ref()?;
    match serde_json::from_value(record.clone()) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("Undecodable direct message record: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryStore;

    async fn wait_for(conversation: &Conversation, len: usize) {
        let mut revisions = conversation.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            while conversation.messages().len() < len {
                revisions.changed().await.unwrap();
            }
        })
        .await
        .expect("conversation did not update in time");
    }

    #[tokio::test]
    async fn history_covers_both_directions() {
        let remote = Arc::new(MemoryStore::new());
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        remote.insert_direct_message(me, peer, "hi").await.unwrap();
        remote.insert_direct_message(peer, me, "hey").await.unwrap();
        remote
            .insert_direct_message(peer, Uuid::new_v4(), "elsewhere")
            .await
            .unwrap();

        let conversation = Conversation::open(remote.clone(), remote.as_ref(), me, peer)
            .await
            .unwrap();
        let contents: Vec<String> = conversation.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["hi", "hey"]);
        assert_eq!(conversation.unread_count(), 1);
    }

    #[tokio::test]
    async fn incoming_messages_are_filtered_to_the_pair() {
        let remote = Arc::new(MemoryStore::new());
        let (me, peer, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conversation = Conversation::open(remote.clone(), remote.as_ref(), me, peer)
            .await
            .unwrap();

        remote.insert_direct_message(stranger, me, "spam").await.unwrap();
        remote.insert_direct_message(peer, me, "ping").await.unwrap();
        wait_for(&conversation, 1).await;

        let messages = conversation.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "ping");
    }

    #[tokio::test]
    async fn own_send_is_not_duplicated() {
        let remote = Arc::new(MemoryStore::new());
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = Conversation::open(remote.clone(), remote.as_ref(), me, peer)
            .await
            .unwrap();

        let sent = conversation.send("  hello  ").await.unwrap();
        assert_eq!(sent.content, "hello");
        // Let the listener see the insert notification too
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(conversation.messages().len(), 1);

        assert!(matches!(
            conversation.send(" ").await.unwrap_err(),
            SyncError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn mark_read_clears_inbound_unread() {
        let remote = Arc::new(MemoryStore::new());
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        remote.insert_direct_message(peer, me, "one").await.unwrap();
        remote.insert_direct_message(peer, me, "two").await.unwrap();
        remote.insert_direct_message(me, peer, "mine").await.unwrap();

        let conversation = Conversation::open(remote.clone(), remote.as_ref(), me, peer)
            .await
            .unwrap();
        assert_eq!(conversation.unread_count(), 2);

        assert_eq!(conversation.mark_read().await.unwrap(), 2);
        assert_eq!(conversation.unread_count(), 0);
        assert!(!conversation.messages().iter().find(|m| m.content == "mine").unwrap().read);
    }

    #[tokio::test]
    async fn drop_releases_subscription() {
        let remote = Arc::new(MemoryStore::new());
        let conversation = Conversation::open(remote.clone(), remote.as_ref(), Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(remote.dispatcher().subscriber_count(), 1);

        drop(conversation);
        for _ in 0..10 {
            if remote.dispatcher().subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.dispatcher().subscriber_count(), 0);
    }
}
