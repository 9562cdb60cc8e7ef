use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use pitchdeck_types::api::ChatRequest;
use pitchdeck_types::models::ChatMessage;

use crate::error::ChatError;

pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// An opened completion request: the status line plus the unread body.
pub struct ChatResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl ChatResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a transcript to the completion endpoint and hands back the streaming
/// response without consuming it.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ChatError>;
}

pub struct HttpChatTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpChatTransport {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ChatError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest { messages })
            .send()
            .await?;

        let status = resp.status().as_u16();
        debug!("Chat request with {} messages: HTTP {}", messages.len(), status);

        let body = resp.bytes_stream().map_err(ChatError::from).boxed();
        Ok(ChatResponse { status, body })
    }
}
