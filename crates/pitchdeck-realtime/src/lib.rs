pub mod connection;
pub mod dispatcher;

pub use dispatcher::{ChangeDispatcher, ChangeSubscription};

use pitchdeck_types::events::Table;

/// Anything that can hand out change-notification subscriptions.
///
/// Implemented by [`ChangeDispatcher`] (fed by the realtime socket or by an
/// in-process store) so consumers never care where notifications come from.
pub trait ChangeSource: Send + Sync {
    fn subscribe(&self, topics: &[Table]) -> ChangeSubscription;
}
