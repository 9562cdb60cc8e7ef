//! Decoder for the streamed completion format: newline-delimited `data: `
//! lines carrying JSON chunks, terminated by `data: [DONE]`.
//!
//! Network chunks never line up with lines, so bytes are buffered until a
//! newline arrives. Splitting happens on raw bytes before any UTF-8 decoding,
//! which keeps a multi-byte character cut in half by the network intact.

use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use pitchdeck_types::events::{StreamErrorKind, StreamEvent};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionChunk {
    fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|text| !text.is_empty())
    }
}

/// Incremental decoder. Feed it raw body chunks in order, then call
/// [`StreamDecoder::finish`] once the body ends.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes after the last newline seen.
    line: Vec<u8>,
    /// A complete line whose JSON payload ended early. Waiting for the rest.
    incomplete: Option<String>,
    /// `[DONE]` was seen; everything after it is ignored.
    done: bool,
    /// The terminal event has been produced.
    closed: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.closed || self.done {
            return events;
        }

        self.line.extend_from_slice(chunk);
        while let Some(newline) = self.line.iter().position(|&b| b == b'\n') {
            let rest = self.line.split_off(newline + 1);
            let mut line = std::mem::replace(&mut self.line, rest);
            line.pop();
            self.decode_line(&line, &mut events);
            if self.done {
                self.line.clear();
                break;
            }
        }
        events
    }

    /// The body has ended. Flushes an unterminated last line and, unless
    /// `[DONE]` was seen, reports the stream as truncated exactly once.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        self.closed = true;

        if !self.done && !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.decode_line(&line, &mut events);
        }
        if let Some(partial) = self.incomplete.take() {
            debug!("Stream ended inside a payload, dropping {} bytes", partial.len());
        }
        if !self.done {
            events.push(StreamEvent::Error(StreamErrorKind::Truncated));
        }
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.strip_suffix('\r').unwrap_or(&*text);

        if let Some(data) = line.strip_prefix(DATA_PREFIX) {
            if let Some(stale) = self.incomplete.take() {
                debug!("New data line before payload completed, dropping: {}", stale);
            }
            self.decode_payload(data.to_string(), events);
        } else if let Some(mut partial) = self.incomplete.take() {
            // A raw newline inside the payload: rejoin and retry
            partial.push('\n');
            partial.push_str(line);
            self.decode_payload(partial, events);
        }
        // Anything else (comments, event:, id:, blank separators) carries no content
    }

    fn decode_payload(&mut self, payload: String, events: &mut Vec<StreamEvent>) {
        let trimmed = payload.trim();
        if trimmed == DONE_SENTINEL {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }
        if trimmed.is_empty() {
            return;
        }

        match serde_json::from_str::<CompletionChunk>(trimmed) {
            Ok(chunk) => {
                if let Some(text) = chunk.into_text() {
                    events.push(StreamEvent::Delta(text));
                }
            }
            Err(e) if e.is_eof() => self.incomplete = Some(payload),
            Err(e) => debug!("Skipping malformed stream payload: {}", e),
        }
    }
}

/// Decode a response body into events. The stream always ends with exactly one
/// `Done` or `Error` event.
pub fn decode<S, E>(body: S) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    async_stream::stream! {
        let mut decoder = StreamDecoder::new();
        futures_util::pin_mut!(body);

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Chat stream read failed: {}", e);
                    yield StreamEvent::Error(StreamErrorKind::Transport);
                    return;
                }
            };
            for event in decoder.feed(&bytes) {
                yield event;
            }
            if decoder.is_done() {
                return;
            }
        }

        for event in decoder.finish() {
            yield event;
        }
    }
}
