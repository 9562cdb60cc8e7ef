use pitchdeck_types::models::TagError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("row already exists")]
    Conflict,

    #[error("row not found")]
    NotFound,

    #[error("remote store returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
