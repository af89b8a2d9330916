/// Discord websocket gateway: identify, heartbeat, dispatch, reconnect.
///
/// One long-lived task owns the connection. Each session runs
/// Hello → Identify → (heartbeat | dispatch)* until the server asks for a
/// reconnect, the socket drops or the task is cancelled. Sessions are not
/// resumed; a fresh Identify is sent and the boom store reconciles nothing
/// after startup, so events missed between sessions are only seen on the
/// next restart.
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mog_boom::{ChannelId, GatewayEvent, MessageId};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::DiscordError;
use crate::hub::EventHub;

// ── Protocol ──────────────────────────────────────────────────────────

pub const GATEWAY_VERSION: u8 = 10;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_GUILD_MESSAGE_REACTIONS: u64 = 1 << 10;

/// Intents sent in Identify.
pub const INTENTS: u64 = INTENT_GUILD_MESSAGES | INTENT_GUILD_MESSAGE_REACTIONS;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Any gateway frame.
#[derive(Debug, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    id: String,
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct BulkDeletePayload {
    ids: Vec<String>,
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct ReactionPayload {
    message_id: String,
    channel_id: String,
}

/// Translate a dispatch into a store notification.
///
/// `None` for event types the store does not consume or payloads missing
/// the fields it needs.
pub fn parse_dispatch(event_type: &str, data: &Value) -> Option<GatewayEvent> {
    fn reaction(data: &Value) -> Option<(ChannelId, MessageId)> {
        let p = ReactionPayload::deserialize(data).ok()?;
        Some((p.channel_id.into(), p.message_id.into()))
    }

    let event = match event_type {
        "MESSAGE_CREATE" | "MESSAGE_DELETE" => {
            let p = MessagePayload::deserialize(data).ok()?;
            let (channel_id, message_id) = (p.channel_id.into(), p.id.into());
            if event_type == "MESSAGE_CREATE" {
                GatewayEvent::MessageCreated {
                    channel_id,
                    message_id,
                }
            } else {
                GatewayEvent::MessageDeleted {
                    channel_id,
                    message_id,
                }
            }
        }
        "MESSAGE_DELETE_BULK" => {
            let p = BulkDeletePayload::deserialize(data).ok()?;
            GatewayEvent::MessagesDeletedBulk {
                channel_id: p.channel_id.into(),
                message_ids: p.ids.into_iter().map(MessageId::from).collect(),
            }
        }
        "MESSAGE_REACTION_ADD" => {
            let (channel_id, message_id) = reaction(data)?;
            GatewayEvent::ReactionAdded {
                channel_id,
                message_id,
            }
        }
        "MESSAGE_REACTION_REMOVE" => {
            let (channel_id, message_id) = reaction(data)?;
            GatewayEvent::ReactionRemoved {
                channel_id,
                message_id,
            }
        }
        "MESSAGE_REACTION_REMOVE_ALL" => {
            let (channel_id, message_id) = reaction(data)?;
            GatewayEvent::AllReactionsRemoved {
                channel_id,
                message_id,
            }
        }
        "MESSAGE_REACTION_REMOVE_EMOJI" => {
            let (channel_id, message_id) = reaction(data)?;
            GatewayEvent::EmojiReactionsRemoved {
                channel_id,
                message_id,
            }
        }
        _ => return None,
    };
    Some(event)
}

fn identify(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "mog",
                "device": "mog",
            },
        },
    })
}

fn heartbeat(seq: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

/// URL with version and encoding query parameters.
pub fn connect_url(base: &str) -> String {
    format!(
        "{}/?v={GATEWAY_VERSION}&encoding=json",
        base.trim_end_matches('/')
    )
}

// ── Connection ────────────────────────────────────────────────────────

/// How a session ended without error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    /// Server asked us to reconnect (op 7 / op 9).
    Reconnect,
}

/// Keep a session alive until cancelled, reconnecting with backoff.
pub(crate) async fn run(url: String, token: String, hub: EventHub, cancel: CancellationToken) {
    let url = connect_url(&url);
    let mut backoff = MIN_BACKOFF;

    loop {
        let wait = match session(&url, &token, &hub, &cancel).await {
            Ok(SessionEnd::Cancelled) => break,
            Ok(SessionEnd::Reconnect) => {
                tracing::info!("gateway requested reconnect");
                backoff = MIN_BACKOFF;
                MIN_BACKOFF
            }
            Err(e) => {
                tracing::warn!(retry_in = ?backoff, "gateway session ended: {e}");
                let wait = backoff;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                wait
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    tracing::debug!("gateway connection task stopped");
}

async fn session(
    url: &str,
    token: &str,
    hub: &EventHub,
    cancel: &CancellationToken,
) -> Result<SessionEnd, DiscordError> {
    let (socket, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        conn = tokio_tungstenite::connect_async(url) => conn?,
    };
    let (mut sink, mut stream) = socket.split();

    // Hello comes first.
    let hello: Hello = loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                let frame: Frame = serde_json::from_str(&text)?;
                if frame.op != OP_HELLO {
                    return Err(DiscordError::Protocol(format!(
                        "expected hello, got op {}",
                        frame.op
                    )));
                }
                break Hello::deserialize(&frame.d)?;
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(DiscordError::Protocol(format!("closed before hello: {frame:?}")));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(DiscordError::Protocol("stream ended before hello".into())),
        }
    };

    sink.send(Message::Text(identify(token).to_string())).await?;

    let period = Duration::from_millis(hello.heartbeat_interval.max(1));
    let mut beat = interval_at(Instant::now() + period, period);
    beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq: Option<u64> = None;
    let mut acked = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(SessionEnd::Cancelled);
            }
            _ = beat.tick() => {
                if !acked {
                    return Err(DiscordError::Protocol("heartbeat not acknowledged".into()));
                }
                sink.send(Message::Text(heartbeat(seq).to_string())).await?;
                acked = false;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame: Frame = serde_json::from_str(&text)?;
                    if frame.s.is_some() {
                        seq = frame.s;
                    }
                    match frame.op {
                        OP_DISPATCH => {
                            let kind = frame.t.as_deref().unwrap_or_default();
                            if kind == "READY" {
                                tracing::info!("gateway session ready");
                            } else if let Some(event) = parse_dispatch(kind, &frame.d) {
                                hub.publish(&event);
                            }
                        }
                        OP_HEARTBEAT => {
                            sink.send(Message::Text(heartbeat(seq).to_string())).await?;
                        }
                        OP_HEARTBEAT_ACK => acked = true,
                        OP_RECONNECT | OP_INVALID_SESSION => {
                            let _ = sink.send(Message::Close(None)).await;
                            return Ok(SessionEnd::Reconnect);
                        }
                        op => tracing::trace!(op, "unhandled gateway op"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(DiscordError::Protocol(format!("closed by server: {frame:?}")));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(DiscordError::Protocol("stream ended".into())),
            }
        }
    }
}
