use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tracing::{debug, trace};
use uuid::Uuid;

use pitchdeck_types::models::{Pitch, Profile};

use crate::error::Result;
use crate::remote::RemoteStore;

/// A pitch as the active user sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitchView {
    pub pitch: Pitch,
    pub liked_by_me: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedSort {
    #[default]
    Newest,
    MostLiked,
    MostCommented,
}

/// Home feed filtering: free-text search, trending toggle, tag.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    pub search: Option<String>,
    pub trending_only: bool,
    pub tag: Option<String>,
}

impl FeedFilter {
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            search: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, pitch: &Pitch) -> bool {
        if self.trending_only && !pitch.trending {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !pitch.tags.contains(tag) {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                pitch.title.to_lowercase().contains(&needle)
                    || pitch.description.to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }
}

/// How many of an owner's pitches carry a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub pitches: u32,
}

/// Engagement summed over one owner's pitches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerTotals {
    pub pitches: u32,
    pub likes: u64,
    pub comments: u64,
    /// First-seen order.
    pub tags: Vec<TagCount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FounderStanding {
    pub profile: Profile,
    pub pitches: u32,
    pub total_likes: u64,
}

/// Proof that a refresh was started, carried back to [`EngagementStore::replace_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    seq: u64,
    user: Option<Uuid>,
}

impl RefreshTicket {
    pub fn user(&self) -> Option<Uuid> {
        self.user
    }
}

/// Result of an optimistic like edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalLike {
    pub pitch_id: Uuid,
    pub liked: bool,
    /// Per-pitch edit counter at the time of this edit.
    pub generation: u64,
}

struct Feed {
    user: Option<Uuid>,
    /// Newest first, as delivered by the last applied refresh.
    pitches: Vec<Pitch>,
    liked: HashSet<Uuid>,
    issued_refreshes: u64,
    applied_refresh: u64,
    /// Bumped on every local like edit; never reset by refreshes.
    like_generations: HashMap<Uuid, u64>,
}

/// The client-side cache of pitches and of the active user's likes.
///
/// Single owner of counter state: readers project from it, and only the
/// optimistic like path and the refresh path write to it. Every change bumps a
/// revision observable through [`EngagementStore::subscribe`].
pub struct EngagementStore {
    feed: RwLock<Feed>,
    revision: watch::Sender<u64>,
}

impl EngagementStore {
    pub fn new(user: Option<Uuid>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            feed: RwLock::new(Feed {
                user,
                pitches: Vec::new(),
                liked: HashSet::new(),
                issued_refreshes: 0,
                applied_refresh: 0,
                like_generations: HashMap::new(),
            }),
            revision,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Feed> {
        self.feed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Feed> {
        self.feed.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Watch the store's revision; it changes after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn active_user(&self) -> Option<Uuid> {
        self.read().user
    }

    /// Switch identity. Like state from the previous user is dropped and any
    /// refresh started on their behalf will be discarded.
    pub fn set_active_user(&self, user: Option<Uuid>) {
        {
            let mut feed = self.write();
            if feed.user == user {
                return;
            }
            feed.user = user;
            feed.liked.clear();
        }
        debug!("Engagement store switched to user {:?}", user);
        self.bump();
    }

    // -- Authoritative refresh --

    pub fn begin_refresh(&self) -> RefreshTicket {
        let mut feed = self.write();
        feed.issued_refreshes += 1;
        RefreshTicket {
            seq: feed.issued_refreshes,
            user: feed.user,
        }
    }

    /// Replace everything with what the remote store reported.
    ///
    /// Returns `false` (and changes nothing) if a newer refresh was already
    /// applied or the ticket belongs to a different user.
    pub fn replace_all(&self, ticket: RefreshTicket, pitches: Vec<Pitch>, liked: Vec<Uuid>) -> bool {
        {
            let mut feed = self.write();
            if ticket.user != feed.user {
                debug!("Discarding refresh #{} issued for another user", ticket.seq);
                return false;
            }
            if ticket.seq <= feed.applied_refresh {
                debug!(
                    "Discarding refresh #{}, #{} already applied",
                    ticket.seq, feed.applied_refresh
                );
                return false;
            }

            feed.applied_refresh = ticket.seq;
            feed.pitches = pitches;
            feed.liked = liked.into_iter().collect();
            trace!(
                "Applied refresh #{}: {} pitches, {} liked",
                ticket.seq,
                feed.pitches.len(),
                feed.liked.len()
            );
        }
        self.bump();
        true
    }

    // -- Optimistic edits --

    /// Set the active user's like state for a pitch, moving its counter by one
    /// if the state actually changed. `None` if the pitch is unknown.
    pub fn apply_local_like(&self, pitch_id: Uuid, liked: bool) -> Option<LocalLike> {
        let local = {
            let mut feed = self.write();
            apply_like(&mut feed, pitch_id, liked)?
        };
        self.bump();
        Some(local)
    }

    /// Flip the active user's like state in one step (read and write under the
    /// same lock, so two rapid toggles always see each other).
    pub fn toggle_local_like(&self, pitch_id: Uuid) -> Option<LocalLike> {
        let local = {
            let mut feed = self.write();
            let liked = !feed.liked.contains(&pitch_id);
            apply_like(&mut feed, pitch_id, liked)?
        };
        self.bump();
        Some(local)
    }

    pub fn like_generation(&self, pitch_id: Uuid) -> u64 {
        self.read()
            .like_generations
            .get(&pitch_id)
            .copied()
            .unwrap_or(0)
    }

    // -- Reads --

    pub fn is_liked(&self, pitch_id: Uuid) -> bool {
        self.read().liked.contains(&pitch_id)
    }

    pub fn pitch(&self, pitch_id: Uuid) -> Option<Pitch> {
        self.read().pitches.iter().find(|p| p.id == pitch_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().pitches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().pitches.is_empty()
    }

    /// Pure projection: pitches matching `predicate`, ordered by `sort`.
    pub fn filtered_view<P>(&self, predicate: P, sort: FeedSort) -> Vec<PitchView>
    where
        P: Fn(&Pitch) -> bool,
    {
        let feed = self.read();
        let mut view: Vec<PitchView> = feed
            .pitches
            .iter()
            .filter(|p| predicate(p))
            .map(|p| PitchView {
                pitch: p.clone(),
                liked_by_me: feed.liked.contains(&p.id),
            })
            .collect();

        // Stable sorts keep feed order among ties
        match sort {
            FeedSort::Newest => view.sort_by(|a, b| b.pitch.created_at.cmp(&a.pitch.created_at)),
            FeedSort::MostLiked => view.sort_by(|a, b| b.pitch.likes_count.cmp(&a.pitch.likes_count)),
            FeedSort::MostCommented => {
                view.sort_by(|a, b| b.pitch.comments_count.cmp(&a.pitch.comments_count))
            }
        }
        view
    }

    pub fn search(&self, filter: &FeedFilter, sort: FeedSort) -> Vec<PitchView> {
        self.filtered_view(|p| filter.matches(p), sort)
    }

    pub fn trending(&self) -> Vec<PitchView> {
        self.filtered_view(|p| p.trending, FeedSort::Newest)
    }

    // -- Aggregates --

    pub fn owner_totals(&self, owner: Uuid) -> OwnerTotals {
        let feed = self.read();
        let mut totals = OwnerTotals::default();
        for pitch in feed.pitches.iter().filter(|p| p.user_id == owner) {
            totals.pitches += 1;
            totals.likes += u64::from(pitch.likes_count);
            totals.comments += u64::from(pitch.comments_count);
            for tag in pitch.tags.iter() {
                match totals.tags.iter_mut().find(|t| t.tag == tag) {
                    Some(count) => count.pitches += 1,
                    None => totals.tags.push(TagCount {
                        tag: tag.to_string(),
                        pitches: 1,
                    }),
                }
            }
        }
        totals
    }

    /// Founders other than `exclude`, most liked first, at most `limit` of them.
    pub fn founder_ranking(
        &self,
        profiles: &[Profile],
        exclude: Option<Uuid>,
        limit: usize,
    ) -> Vec<FounderStanding> {
        let mut stats: HashMap<Uuid, (u32, u64)> = HashMap::new();
        for pitch in self.read().pitches.iter() {
            let entry = stats.entry(pitch.user_id).or_default();
            entry.0 += 1;
            entry.1 += u64::from(pitch.likes_count);
        }

        let mut ranking: Vec<FounderStanding> = profiles
            .iter()
            .filter(|profile| Some(profile.user_id) != exclude)
            .map(|profile| {
                let (pitches, total_likes) = stats.get(&profile.user_id).copied().unwrap_or_default();
                FounderStanding {
                    profile: profile.clone(),
                    pitches,
                    total_likes,
                }
            })
            .collect();
        ranking.sort_by(|a, b| b.total_likes.cmp(&a.total_likes));
        ranking.truncate(limit);
        ranking
    }
}

fn apply_like(feed: &mut Feed, pitch_id: Uuid, liked: bool) -> Option<LocalLike> {
    let pitch = feed.pitches.iter_mut().find(|p| p.id == pitch_id)?;
    let was_liked = feed.liked.contains(&pitch_id);

    if liked != was_liked {
        if liked {
            pitch.likes_count = pitch.likes_count.saturating_add(1);
            feed.liked.insert(pitch_id);
        } else {
            pitch.likes_count = pitch.likes_count.saturating_sub(1);
            feed.liked.remove(&pitch_id);
        }
    }

    let generation = feed.like_generations.entry(pitch_id).or_insert(0);
    *generation += 1;

    Some(LocalLike {
        pitch_id,
        liked,
        generation: *generation,
    })
}

/// Fetch the authoritative state and install it, unless a newer refresh won the race.
pub async fn refresh(store: &EngagementStore, remote: &dyn RemoteStore) -> Result<bool> {
    let ticket = store.begin_refresh();
    let pitches = remote.list_pitches().await?;
    let liked = match ticket.user() {
        Some(user) => remote.liked_pitch_ids(user).await?,
        None => Vec::new(),
    };
    Ok(store.replace_all(ticket, pitches, liked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pitchdeck_types::models::TagSet;

    fn pitch(title: &str, likes: u32, age_minutes: i64) -> Pitch {
        Pitch {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: title.to_string(),
            description: format!("All about {}", title.to_lowercase()),
            tags: TagSet::from(vec!["ai".to_string()]),
            likes_count: likes,
            comments_count: 0,
            created_at: Utc::now() - Duration::minutes(age_minutes),
            trending: likes >= 10,
        }
    }

    fn loaded(pitches: Vec<Pitch>, liked: Vec<Uuid>) -> EngagementStore {
        let store = EngagementStore::new(Some(Uuid::new_v4()));
        let ticket = store.begin_refresh();
        assert!(store.replace_all(ticket, pitches, liked));
        store
    }

    #[test]
    fn local_like_moves_counter_once() {
        let p = pitch("Drone delivery", 3, 0);
        let store = loaded(vec![p.clone()], vec![]);

        store.apply_local_like(p.id, true).unwrap();
        store.apply_local_like(p.id, true).unwrap();
        assert_eq!(store.pitch(p.id).unwrap().likes_count, 4);
        assert!(store.is_liked(p.id));

        store.apply_local_like(p.id, false).unwrap();
        assert_eq!(store.pitch(p.id).unwrap().likes_count, 3);
        assert!(!store.is_liked(p.id));
    }

    #[test]
    fn unlike_never_goes_negative() {
        let p = pitch("Drone delivery", 0, 0);
        let store = loaded(vec![p.clone()], vec![p.id]);

        store.toggle_local_like(p.id).unwrap();
        assert_eq!(store.pitch(p.id).unwrap().likes_count, 0);
    }

    #[test]
    fn unknown_pitch_is_rejected() {
        let store = loaded(vec![], vec![]);
        assert!(store.toggle_local_like(Uuid::new_v4()).is_none());
    }

    #[test]
    fn double_toggle_is_a_net_no_op() {
        let p = pitch("Drone delivery", 7, 0);
        let store = loaded(vec![p.clone()], vec![]);

        let first = store.toggle_local_like(p.id).unwrap();
        let second = store.toggle_local_like(p.id).unwrap();

        assert!(first.liked);
        assert!(!second.liked);
        assert!(second.generation > first.generation);
        assert_eq!(store.pitch(p.id).unwrap().likes_count, 7);
        assert!(!store.is_liked(p.id));
    }

    #[test]
    fn stale_refresh_cannot_overwrite_newer() {
        let p = pitch("Drone delivery", 1, 0);
        let store = EngagementStore::new(Some(Uuid::new_v4()));

        let older = store.begin_refresh();
        let newer = store.begin_refresh();

        let mut fresh = p.clone();
        fresh.likes_count = 5;
        assert!(store.replace_all(newer, vec![fresh], vec![]));
        assert!(!store.replace_all(older, vec![p.clone()], vec![]));
        assert_eq!(store.pitch(p.id).unwrap().likes_count, 5);
    }

    #[test]
    fn out_of_order_completion_keeps_latest() {
        let p = pitch("Drone delivery", 1, 0);
        let store = EngagementStore::new(Some(Uuid::new_v4()));

        let older = store.begin_refresh();
        let newer = store.begin_refresh();

        // Older lands first and is applied; the newer one still supersedes it
        assert!(store.replace_all(older, vec![p.clone()], vec![]));
        let mut fresh = p.clone();
        fresh.likes_count = 2;
        assert!(store.replace_all(newer, vec![fresh], vec![]));
        assert_eq!(store.pitch(p.id).unwrap().likes_count, 2);
    }

    #[test]
    fn refresh_heals_optimistic_drift() {
        let p = pitch("Drone delivery", 4, 0);
        let store = loaded(vec![p.clone()], vec![]);
        store.toggle_local_like(p.id).unwrap();

        let ticket = store.begin_refresh();
        store.replace_all(ticket, vec![p.clone()], vec![]);
        assert_eq!(store.pitch(p.id).unwrap().likes_count, 4);
        assert!(!store.is_liked(p.id));
    }

    #[test]
    fn refresh_for_previous_user_is_discarded() {
        let p = pitch("Drone delivery", 4, 0);
        let store = EngagementStore::new(Some(Uuid::new_v4()));
        let ticket = store.begin_refresh();

        store.set_active_user(Some(Uuid::new_v4()));
        assert!(!store.replace_all(ticket, vec![p], vec![]));
        assert!(store.is_empty());
    }

    #[test]
    fn filtered_view_searches_and_sorts() {
        let old = pitch("Quantum Coffee", 12, 30);
        let new = pitch("Coffee subscriptions", 2, 1);
        let other = pitch("Pet insurance", 50, 5);
        let store = loaded(vec![new.clone(), other.clone(), old.clone()], vec![old.id]);

        let found = store.search(&FeedFilter::search("COFFEE"), FeedSort::MostLiked);
        let titles: Vec<&str> = found.iter().map(|v| v.pitch.title.as_str()).collect();
        assert_eq!(titles, vec!["Quantum Coffee", "Coffee subscriptions"]);
        assert!(found[0].liked_by_me);
        assert!(!found[1].liked_by_me);

        let trending = store.trending();
        let titles: Vec<&str> = trending.iter().map(|v| v.pitch.title.as_str()).collect();
        assert_eq!(titles, vec!["Pet insurance", "Quantum Coffee"]);
    }

    fn owned(owner: Uuid, title: &str, likes: u32, comments: u32, tags: &[&str]) -> Pitch {
        let mut p = pitch(title, likes, 0);
        p.user_id = owner;
        p.comments_count = comments;
        p.tags = TagSet::from(tags.iter().map(|t| t.to_string()).collect::<Vec<_>>());
        p
    }

    fn profile(name: &str) -> Profile {
        Profile {
            user_id: Uuid::new_v4(),
            full_name: name.to_string(),
            startup_name: None,
        }
    }

    #[test]
    fn owner_totals_sum_counters_and_tags() {
        let me = Uuid::new_v4();
        let store = loaded(
            vec![
                owned(me, "Solar kiosks", 4, 2, &["energy", "africa"]),
                owned(Uuid::new_v4(), "Pet insurance", 50, 9, &["energy"]),
                owned(me, "Grid batteries", 3, 0, &["energy"]),
                owned(me, "Untagged", 1, 1, &[]),
            ],
            vec![],
        );

        let totals = store.owner_totals(me);
        assert_eq!(totals.pitches, 3);
        assert_eq!(totals.likes, 8);
        assert_eq!(totals.comments, 3);
        assert_eq!(
            totals.tags,
            vec![
                TagCount { tag: "energy".into(), pitches: 2 },
                TagCount { tag: "africa".into(), pitches: 1 },
            ]
        );

        assert_eq!(store.owner_totals(Uuid::new_v4()), OwnerTotals::default());
    }

    #[test]
    fn owner_totals_follow_optimistic_likes() {
        let me = Uuid::new_v4();
        let p = owned(me, "Solar kiosks", 4, 0, &[]);
        let store = loaded(vec![p.clone()], vec![]);

        store.toggle_local_like(p.id).unwrap();
        assert_eq!(store.owner_totals(me).likes, 5);
    }

    #[test]
    fn founder_ranking_excludes_me_and_orders_by_likes() {
        let (me, ada, lin, tom) = (
            profile("Me Myself"),
            profile("Ada Lovelace"),
            profile("Lin Tran"),
            profile("Tom Idle"),
        );
        let store = loaded(
            vec![
                owned(ada.user_id, "Looms", 3, 0, &[]),
                owned(lin.user_id, "Ledgers", 7, 0, &[]),
                owned(ada.user_id, "Engines", 5, 0, &[]),
                owned(me.user_id, "Mine", 100, 0, &[]),
            ],
            vec![],
        );
        let profiles = vec![me.clone(), tom.clone(), lin.clone(), ada.clone()];

        let ranking = store.founder_ranking(&profiles, Some(me.user_id), 10);
        let summary: Vec<(&str, u32, u64)> = ranking
            .iter()
            .map(|f| (f.profile.full_name.as_str(), f.pitches, f.total_likes))
            .collect();
        assert_eq!(
            summary,
            vec![("Ada Lovelace", 2, 8), ("Lin Tran", 1, 7), ("Tom Idle", 0, 0)]
        );

        let top = store.founder_ranking(&profiles, Some(me.user_id), 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].profile, ada);
    }

    #[test]
    fn mutations_bump_revision() {
        let p = pitch("Drone delivery", 0, 0);
        let store = loaded(vec![p.clone()], vec![]);
        let rx = store.subscribe();
        let before = *rx.borrow();

        store.toggle_local_like(p.id).unwrap();
        assert!(*rx.borrow() > before);
    }
}
