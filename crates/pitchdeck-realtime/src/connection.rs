use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use pitchdeck_types::events::{ChangeEvent, RealtimeCommand, RealtimeFrame, Table};

use crate::dispatcher::ChangeDispatcher;

/// Heartbeat interval: the client sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub url: String,
    pub token: Option<String>,
    pub topics: Vec<Table>,
}

/// Keep a realtime socket alive in the background, feeding every change frame
/// into `dispatcher`. Abort the returned handle to stop.
pub fn spawn(config: RealtimeConfig, dispatcher: ChangeDispatcher) -> JoinHandle<()> {
    tokio::spawn(run(config, dispatcher))
}

/// Connect, pump frames, reconnect with exponential backoff. Never returns on its own.
pub async fn run(config: RealtimeConfig, dispatcher: ChangeDispatcher) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let mut connected = false;
        let result = run_session(&config, &dispatcher, &mut connected).await;

        // Only back off from scratch if the last attempt actually got through
        if connected {
            backoff = INITIAL_BACKOFF;
        }

        match result {
            Ok(()) => info!("Realtime socket closed by server"),
            Err(e) => warn!("Realtime socket error: {}", e),
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn run_session(
    config: &RealtimeConfig,
    dispatcher: &ChangeDispatcher,
    connected: &mut bool,
) -> Result<(), RealtimeError> {
    let (socket, _response) = connect_async(config.url.as_str()).await?;
    let (mut sender, mut receiver) = socket.split();

    if let Some(token) = &config.token {
        let identify = RealtimeCommand::Identify {
            token: token.clone(),
        };
        sender
            .send(Message::Text(serde_json::to_string(&identify)?.into()))
            .await?;
    }

    let subscribe = RealtimeCommand::Subscribe {
        topics: config.topics.clone(),
    };
    sender
        .send(Message::Text(serde_json::to_string(&subscribe)?.into()))
        .await?;

    *connected = true;
    info!("Realtime socket connected to {}", config.url);

    // Anything may have changed while we were disconnected
    for table in &config.topics {
        dispatcher.broadcast(ChangeEvent::resync(*table));
    }

    let mut pong_received = true;
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                };

                match msg {
                    Message::Text(text) => handle_frame(dispatcher, text.as_str()),
                    Message::Pong(_) => pong_received = true,
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        return Err(RealtimeError::HeartbeatTimeout);
                    }
                }
                sender.send(Message::Ping(Bytes::new())).await?;
            }
        }
    }
}

fn handle_frame(dispatcher: &ChangeDispatcher, text: &str) {
    match serde_json::from_str::<RealtimeFrame>(text) {
        Ok(RealtimeFrame::Change(event)) => {
            trace!("Change on {}: {:?}", event.table.as_str(), event.kind);
            dispatcher.broadcast(event);
        }
        Ok(RealtimeFrame::Subscribed { topics }) => {
            debug!("Realtime subscription confirmed for {} topics", topics.len());
        }
        Ok(RealtimeFrame::Error { message }) => {
            warn!("Realtime server error: {}", message);
        }
        Err(e) => {
            let raw: String = text.chars().take(200).collect();
            warn!("Bad realtime frame: {} -- raw: {}", e, raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChangeSource;
    use pitchdeck_types::events::ChangeKind;

    #[tokio::test]
    async fn change_frames_reach_subscribers() {
        let dispatcher = ChangeDispatcher::new();
        let mut sub = dispatcher.subscribe(&[Table::Comments]);

        handle_frame(
            &dispatcher,
            r#"{"type":"Change","data":{"table":"comments","kind":"delete"}}"#,
        );
        handle_frame(&dispatcher, "not json at all");
        handle_frame(&dispatcher, r#"{"type":"Subscribed","data":{"topics":["comments"]}}"#);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(sub.try_recv().is_none());
    }
}
