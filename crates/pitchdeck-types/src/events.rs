use serde::{Deserialize, Serialize};

// -- Assistant stream --

/// One decoded event from the assistant completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of assistant text to append.
    Delta(String),
    /// The `[DONE]` sentinel. Nothing follows it.
    Done,
    /// Connection-level failure. Terminal, reported once.
    Error(StreamErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Non-success status that is not one of the distinguished codes.
    HttpStatus(u16),
    /// The body could not be read (socket reset, aborted read).
    Transport,
    /// The body ended before `[DONE]` arrived.
    Truncated,
}

// -- Realtime change notifications --

/// Remote collections a client can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Pitches,
    PitchLikes,
    Comments,
    Profiles,
    DirectMessages,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pitches => "pitches",
            Self::PitchLikes => "pitch_likes",
            Self::Comments => "comments",
            Self::Profiles => "profiles",
            Self::DirectMessages => "direct_messages",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Notifications were lost; whatever the subscriber holds may be stale.
    Resync,
}

/// "Something changed in `table`". The record is best-effort: the engagement
/// collections carry no payload guarantee, direct messages usually carry the
/// inserted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind) -> Self {
        Self {
            table,
            kind,
            record: None,
        }
    }

    pub fn with_record(mut self, record: serde_json::Value) -> Self {
        self.record = Some(record);
        self
    }

    pub fn resync(table: Table) -> Self {
        Self::new(table, ChangeKind::Resync)
    }
}

/// Frames pushed FROM the realtime server TO the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeFrame {
    /// Server confirms the topic subscription
    Subscribed { topics: Vec<Table> },

    /// A row changed in one of the subscribed collections
    Change(ChangeEvent),

    /// Server-side problem with the subscription
    Error { message: String },
}

/// Commands sent FROM the client TO the realtime server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Authenticate the socket
    Identify { token: String },

    /// Replace the set of watched collections
    Subscribe { topics: Vec<Table> },
}
