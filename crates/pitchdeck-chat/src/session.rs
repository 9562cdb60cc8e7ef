use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use pitchdeck_types::events::{StreamErrorKind, StreamEvent};
use pitchdeck_types::models::ChatMessage;

use crate::decoder::decode;
use crate::error::ChatError;
use crate::transport::ChatTransport;

const RATE_LIMITED: u16 = 429;
const PAYMENT_REQUIRED: u16 = 402;

/// User-visible notices raised by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatNotice {
    RateLimited,
    QuotaExhausted,
    Failed,
}

impl ChatNotice {
    pub fn message(&self) -> &'static str {
        match self {
            ChatNotice::RateLimited => "Rate limit hit. Try again shortly.",
            ChatNotice::QuotaExhausted => "AI credits exhausted.",
            ChatNotice::Failed => "Failed to get AI response",
        }
    }
}

/// How one `send` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    RateLimited,
    QuotaExhausted,
    Failed(StreamErrorKind),
    /// A newer `send` (or `clear`) took over; this one's output was discarded.
    Superseded,
}

/// What a view renders: the transcript plus whether a reply is in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub messages: Vec<ChatMessage>,
    /// An assistant message is open and still receiving deltas.
    pub streaming: bool,
    /// A request is in flight, whether or not any delta has arrived yet.
    pub busy: bool,
}

#[derive(Default)]
struct SessionState {
    transcript: Vec<ChatMessage>,
    /// Index of the assistant message receiving deltas. At most one.
    open_assistant: Option<usize>,
    /// Incremented by every `send` and `clear`; deltas tagged with an older
    /// value are dropped.
    cycle: u64,
    busy: bool,
}

impl SessionState {
    fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            messages: self.transcript.clone(),
            streaming: self.open_assistant.is_some(),
            busy: self.busy,
        }
    }
}

/// A conversation with the assistant.
///
/// Only the latest `send` may touch the transcript. Starting a new one does not
/// abort the previous response body; its remaining deltas are ignored instead.
pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
    notice_tx: broadcast::Sender<ChatNotice>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let (snapshot_tx, _) = watch::channel(ChatSnapshot::default());
        let (notice_tx, _) = broadcast::channel(16);
        Self {
            transport,
            state: Mutex::new(SessionState::default()),
            snapshot_tx,
            notice_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish while still holding the lock so snapshots never go backwards.
    fn publish(&self, state: &SessionState) {
        self.snapshot_tx.send_replace(state.snapshot());
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<ChatNotice> {
        self.notice_tx.subscribe()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.lock().transcript.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    /// Drop the transcript. Any reply still streaming is discarded.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.cycle += 1;
        state.transcript.clear();
        state.open_assistant = None;
        state.busy = false;
        self.publish(&state);
    }

    pub async fn send(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (cycle, history) = {
            let mut state = self.lock();
            state.cycle += 1;
            state.open_assistant = None;
            state.transcript.push(ChatMessage::user(text));
            state.busy = true;
            self.publish(&state);
            (state.cycle, state.transcript.clone())
        };
        debug!("Chat cycle {} started ({} messages)", cycle, history.len());

        let response = match self.transport.open(&history).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Chat request failed: {}", e);
                return Ok(self.fail(cycle, StreamErrorKind::Transport));
            }
        };

        // Distinguished statuses end the cycle before the body is looked at
        match response.status {
            RATE_LIMITED => {
                return Ok(self.end_with_notice(cycle, ChatNotice::RateLimited, SendOutcome::RateLimited));
            }
            PAYMENT_REQUIRED => {
                return Ok(self.end_with_notice(
                    cycle,
                    ChatNotice::QuotaExhausted,
                    SendOutcome::QuotaExhausted,
                ));
            }
            status if !response.is_success() => {
                warn!("Chat request rejected with HTTP {}", status);
                return Ok(self.fail(cycle, StreamErrorKind::HttpStatus(status)));
            }
            _ => {}
        }

        let events = decode(response.body);
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Delta(delta) => {
                    if !self.append_delta(cycle, &delta) {
                        debug!("Chat cycle {} superseded, ignoring the rest of its stream", cycle);
                        return Ok(SendOutcome::Superseded);
                    }
                }
                StreamEvent::Done => return Ok(self.complete(cycle)),
                StreamEvent::Error(kind) => return Ok(self.fail(cycle, kind)),
            }
        }
        Ok(self.fail(cycle, StreamErrorKind::Truncated))
    }

    fn append_delta(&self, cycle: u64, delta: &str) -> bool {
        let mut state = self.lock();
        if state.cycle != cycle {
            return false;
        }
        match state.open_assistant {
            Some(index) => state.transcript[index].content.push_str(delta),
            None => {
                state.transcript.push(ChatMessage::assistant(delta));
                state.open_assistant = Some(state.transcript.len() - 1);
            }
        }
        self.publish(&state);
        true
    }

    /// Close the cycle if it is still current. `false` if it was superseded.
    fn close(&self, cycle: u64) -> bool {
        let mut state = self.lock();
        if state.cycle != cycle {
            return false;
        }
        state.open_assistant = None;
        state.busy = false;
        self.publish(&state);
        true
    }

    fn complete(&self, cycle: u64) -> SendOutcome {
        if !self.close(cycle) {
            return SendOutcome::Superseded;
        }
        info!("Chat cycle {} completed", cycle);
        SendOutcome::Completed
    }

    fn end_with_notice(&self, cycle: u64, notice: ChatNotice, outcome: SendOutcome) -> SendOutcome {
        if !self.close(cycle) {
            return SendOutcome::Superseded;
        }
        info!("Chat cycle {} ended: {}", cycle, notice.message());
        let _ = self.notice_tx.send(notice);
        outcome
    }

    /// A partial reply stays in the transcript; a reply that never produced a
    /// delta was never created.
    fn fail(&self, cycle: u64, kind: StreamErrorKind) -> SendOutcome {
        if !self.close(cycle) {
            return SendOutcome::Superseded;
        }
        warn!("Chat cycle {} failed: {:?}", cycle, kind);
        let _ = self.notice_tx.send(ChatNotice::Failed);
        SendOutcome::Failed(kind)
    }
}
