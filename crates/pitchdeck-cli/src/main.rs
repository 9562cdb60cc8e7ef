mod commands;
mod config;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use uuid::Uuid;

use pitchdeck_chat::{ChatSession, HttpChatTransport, SendOutcome};
use pitchdeck_realtime::ChangeDispatcher;
use pitchdeck_realtime::connection::{self, RealtimeConfig};
use pitchdeck_sync::http::HttpStore;
use pitchdeck_sync::{
    CommentThread, Conversation, EngagementStore, FeedFilter, FeedSort, OptimisticMutator,
    PitchView, RealtimeSubscriber, RemoteStore, ToggleOutcome, publish_pitch, refresh,
};

/// Size of the founder leaderboard.
const TOP_FOUNDERS: usize = 10;
use pitchdeck_types::events::Table;
use pitchdeck_types::models::ChatRole;

use crate::commands::{Command, HELP};
use crate::config::Config;

struct App {
    remote: Arc<dyn RemoteStore>,
    dispatcher: ChangeDispatcher,
    store: Arc<EngagementStore>,
    mutator: OptimisticMutator,
    chat: Arc<ChatSession>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pitchdeck=info,pitchdeck_sync=debug,pitchdeck_chat=debug".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    info!("Using backend {} as {:?}", config.api_url, config.user_id);

    // Remote store and change notifications
    let mut http = HttpStore::new(&config.api_url, &config.api_key);
    if let Some(token) = &config.access_token {
        http = http.with_access_token(token);
    }
    let remote: Arc<dyn RemoteStore> = Arc::new(http);

    let dispatcher = ChangeDispatcher::new();
    let socket = connection::spawn(
        RealtimeConfig {
            url: config.realtime_url.clone(),
            token: config.access_token.clone(),
            topics: vec![
                Table::Pitches,
                Table::PitchLikes,
                Table::Comments,
                Table::DirectMessages,
            ],
        },
        dispatcher.clone(),
    );

    // Feed
    let store = Arc::new(EngagementStore::new(config.user_id));
    refresh(&store, remote.as_ref()).await?;
    let subscription = RealtimeSubscriber::new(
        store.clone(),
        remote.clone(),
        Arc::new(dispatcher.clone()),
    )
    .with_debounce(config.refresh_debounce)
    .subscribe();
    info!("Feed loaded with {} pitches", store.len());

    let chat_key = config.access_token.as_deref().unwrap_or(&config.api_key);
    let chat = Arc::new(ChatSession::new(Arc::new(HttpChatTransport::new(
        &config.chat_url,
        chat_key,
    ))));

    let app = App {
        mutator: OptimisticMutator::new(store.clone(), remote.clone()),
        remote,
        dispatcher,
        store,
        chat,
    };

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if matches!(command, Command::Quit) {
            break;
        }
        if let Err(e) = app.run(command).await {
            println!("error: {}", e);
        }
    }

    subscription.unsubscribe();
    socket.abort();
    Ok(())
}

impl App {
    fn me(&self) -> Option<Uuid> {
        self.store.active_user()
    }

    async fn run(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Feed { search } => {
                let filter = search.map(FeedFilter::search).unwrap_or_default();
                print_feed(&self.store.search(&filter, FeedSort::Newest));
            }
            Command::Trending => print_feed(&self.store.trending()),
            Command::Top => print_feed(&self.store.search(&FeedFilter::default(), FeedSort::MostLiked)),
            Command::Stats => {
                let me = self
                    .me()
                    .ok_or_else(|| anyhow::anyhow!("set PITCHDECK_USER_ID to see your stats"))?;
                let totals = self.store.owner_totals(me);
                println!(
                    "{} pitches, {} likes, {} comments",
                    totals.pitches, totals.likes, totals.comments
                );
                for tag in &totals.tags {
                    println!("    {} ({})", tag.tag, tag.pitches);
                }
            }
            Command::Founders => {
                let mut owners: Vec<Uuid> = Vec::new();
                for view in self.store.search(&FeedFilter::default(), FeedSort::Newest) {
                    if !owners.contains(&view.pitch.user_id) {
                        owners.push(view.pitch.user_id);
                    }
                }
                let profiles = if owners.is_empty() {
                    Vec::new()
                } else {
                    self.remote.profiles_by_ids(&owners).await?
                };
                for (rank, founder) in self
                    .store
                    .founder_ranking(&profiles, self.me(), TOP_FOUNDERS)
                    .iter()
                    .enumerate()
                {
                    println!(
                        "{}. {} {} - {} pitches, {} likes",
                        rank + 1,
                        founder.profile.initials(),
                        founder.profile.full_name,
                        founder.pitches,
                        founder.total_likes
                    );
                }
            }
            Command::Like(pitch_id) => {
                let outcome = self.mutator.toggle_like(pitch_id).await?;
                if let ToggleOutcome::Confirmed { liked } = outcome {
                    println!("{}", if liked { "liked" } else { "unliked" });
                }
            }
            Command::Comments(pitch_id) => {
                let thread = CommentThread::new(self.remote.clone(), pitch_id, self.me());
                print_comments(&thread.list().await?);
            }
            Command::Comment { pitch_id, text } => {
                let thread = CommentThread::new(self.remote.clone(), pitch_id, self.me());
                print_comments(&thread.add(&text).await?);
            }
            Command::Uncomment {
                pitch_id,
                comment_id,
            } => {
                let thread = CommentThread::new(self.remote.clone(), pitch_id, self.me());
                print_comments(&thread.remove(comment_id).await?);
            }
            Command::Publish(draft) => {
                let pitch = publish_pitch(self.remote.as_ref(), self.me(), &draft).await?;
                println!("published {}", pitch.id);
            }
            Command::Messages(peer) => {
                let conversation = self.open_conversation(peer).await?;
                print_messages(&conversation, peer);
                conversation.mark_read().await?;
            }
            Command::DirectMessage { peer, text } => {
                let conversation = self.open_conversation(peer).await?;
                conversation.send(&text).await?;
                print_messages(&conversation, peer);
            }
            Command::Ask(text) => self.ask(&text).await?,
            Command::Clear => self.chat.clear(),
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
        Ok(())
    }

    async fn open_conversation(&self, peer: Uuid) -> anyhow::Result<Conversation> {
        let me = self
            .me()
            .ok_or_else(|| anyhow::anyhow!("set PITCHDECK_USER_ID to use messages"))?;
        Ok(Conversation::open(self.remote.clone(), &self.dispatcher, me, peer).await?)
    }

    /// Stream the assistant's reply to stdout as it arrives.
    async fn ask(&self, text: &str) -> anyhow::Result<()> {
        let mut snapshots = self.chat.subscribe();
        let mut notices = self.chat.notices();
        let baseline = self.chat.transcript().len();

        let printer = tokio::spawn(async move {
            let mut printed = 0;
            while snapshots.changed().await.is_ok() {
                let reply = {
                    let snapshot = snapshots.borrow_and_update();
                    match snapshot.messages.get(baseline + 1) {
                        Some(m) if m.role == ChatRole::Assistant => m.content.clone(),
                        _ => continue,
                    }
                };
                if let Some(fresh) = reply.get(printed..) {
                    print!("{}", fresh);
                    printed = reply.len();
                }
            }
        });

        let outcome = self.chat.send(text).await;
        printer.abort();
        println!();

        match outcome? {
            SendOutcome::Completed | SendOutcome::Superseded => {}
            _ => {
                if let Ok(notice) = notices.try_recv() {
                    println!("{}", notice.message());
                }
            }
        }
        Ok(())
    }
}

fn print_feed(pitches: &[PitchView]) {
    if pitches.is_empty() {
        println!("no pitches");
        return;
    }
    for view in pitches {
        let p = &view.pitch;
        let tags: Vec<&str> = p.tags.iter().collect();
        println!(
            "{} {} {}\n    {} likes{}, {} comments [{}]",
            p.id,
            if p.trending { "*" } else { "-" },
            p.title,
            p.likes_count,
            if view.liked_by_me { " (you)" } else { "" },
            p.comments_count,
            tags.join(", ")
        );
    }
}

fn print_comments(comments: &[pitchdeck_types::models::CommentView]) {
    if comments.is_empty() {
        println!("no comments");
        return;
    }
    for view in comments {
        let author = view
            .author
            .as_ref()
            .map(|a| a.full_name.as_str())
            .unwrap_or("unknown");
        println!(
            "{} [{}] {}: {}",
            view.comment.created_at.format("%Y-%m-%d %H:%M"),
            view.comment.id,
            author,
            view.comment.content
        );
    }
}

fn print_messages(conversation: &Conversation, peer: Uuid) {
    for message in conversation.messages() {
        let who = if message.sender_id == peer { "them" } else { "you" };
        println!("{} {}: {}", message.created_at.format("%H:%M"), who, message.content);
    }
}
