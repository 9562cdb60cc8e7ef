//! Client-side feed synchronization: a local cache of pitches and like state
//! kept consistent with the remote row store through optimistic edits and
//! refetch-on-notification.

pub mod comments;
pub mod direct;
pub mod engagement;
pub mod error;
pub mod http;
pub mod memory;
pub mod optimistic;
pub mod pitches;
pub mod remote;
pub mod subscriber;

pub use comments::CommentThread;
pub use direct::Conversation;
pub use engagement::{
    EngagementStore, FeedFilter, FeedSort, FounderStanding, OwnerTotals, PitchView, TagCount, refresh,
};
pub use error::{Result, SyncError};
pub use optimistic::{OptimisticMutator, ToggleOutcome};
pub use pitches::{PitchDraft, publish_pitch};
pub use remote::RemoteStore;
pub use subscriber::{RealtimeSubscriber, SubscriptionHandle};
