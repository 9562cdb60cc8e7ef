use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}
