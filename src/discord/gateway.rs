// Gateway feed — websocket session that turns reaction dispatches into
// ReactionEvents.
//
// One session at a time: Hello, Identify, then heartbeats on the interval
// the server asks for while dispatches stream in. Any drop, Reconnect or
// InvalidSession starts a fresh session after a short delay. Sessions are
// never resumed; a reaction missed during the gap is simply not seen, which
// the bookmark engine tolerates.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, info, warn};

use crate::bookmark::event::{ReactionAction, ReactionEvent};

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const GUILDS: u64 = 1 << 0;
const GUILD_MESSAGES: u64 = 1 << 9;
const GUILD_MESSAGE_REACTIONS: u64 = 1 << 10;
const DIRECT_MESSAGES: u64 = 1 << 12;
const DIRECT_MESSAGE_REACTIONS: u64 = 1 << 13;
const MESSAGE_CONTENT: u64 = 1 << 15;

/// Intents requested on Identify.
pub const INTENTS: u64 = GUILDS
    | GUILD_MESSAGES
    | GUILD_MESSAGE_REACTIONS
    | DIRECT_MESSAGES
    | DIRECT_MESSAGE_REACTIONS
    | MESSAGE_CONTENT;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// Close codes after which reconnecting cannot help: authentication
/// failed, invalid intents, disallowed intents.
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4013, 4014];

/// Gateway operation codes used by a bot session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Reconnect = 7,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            7 => Some(Self::Reconnect),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Inbound gateway payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelloPayload {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct ReactionPayload {
    user_id: String,
    channel_id: String,
    message_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    emoji: EmojiPayload,
}

#[derive(Debug, Deserialize)]
struct EmojiPayload {
    #[serde(default)]
    name: Option<String>,
}

/// Translate a dispatch into a reaction event. Anything that is not a
/// reaction add/remove, or that lacks an emoji name, yields `None`.
pub fn reaction_event_from_dispatch(event_type: &str, data: &Value) -> Option<ReactionEvent> {
    let action = match event_type {
        "MESSAGE_REACTION_ADD" => ReactionAction::Add,
        "MESSAGE_REACTION_REMOVE" => ReactionAction::Remove,
        _ => return None,
    };
    let payload: ReactionPayload = match serde_json::from_value(data.clone()) {
        Ok(p) => p,
        Err(e) => {
            warn!(event_type, error = %e, "Unparseable reaction dispatch");
            return None;
        }
    };
    Some(ReactionEvent {
        action,
        actor_id: payload.user_id,
        emoji: payload.emoji.name?,
        channel_id: payload.channel_id,
        message_id: payload.message_id,
        guild_id: payload.guild_id,
    })
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": OpCode::Identify.as_u8(),
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "dogear",
                "device": "dogear",
            },
        },
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": OpCode::Heartbeat.as_u8(), "d": sequence })
}

enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// Run the gateway until shutdown, feeding reaction events into `events`.
/// Returns an error only for conditions a reconnect cannot fix.
pub async fn run(
    url: &str,
    token: &str,
    events: mpsc::Sender<ReactionEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() || events.is_closed() {
            return Ok(());
        }

        match session(url, token, &events, &mut shutdown).await {
            Ok(SessionEnd::Shutdown) => return Ok(()),
            Ok(SessionEnd::Reconnect) => info!("Gateway session ended, reconnecting"),
            Err(e) if e.downcast_ref::<FatalClose>().is_some() => return Err(e),
            Err(e) => warn!(error = %e, "Gateway session failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("gateway closed the session with code {code}: {reason}")]
struct FatalClose {
    code: u16,
    reason: String,
}

async fn session(
    url: &str,
    token: &str,
    events: &mpsc::Sender<ReactionEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd> {
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to gateway at {url}"))?;
    let (mut sink, mut stream) = socket.split();

    let hello = tokio::time::timeout(HELLO_TIMEOUT, stream.next())
        .await
        .context("Timed out waiting for gateway Hello")?
        .context("Gateway closed before Hello")??;
    let hello: GatewayMessage = match hello {
        Frame::Text(text) => serde_json::from_str(&text).context("Malformed gateway Hello")?,
        other => bail!("Expected gateway Hello, got {other:?}"),
    };
    if OpCode::from_u8(hello.op) != Some(OpCode::Hello) {
        bail!("Expected gateway Hello, got op {}", hello.op);
    }
    let hello: HelloPayload =
        serde_json::from_value(hello.d.unwrap_or_default()).context("Malformed gateway Hello")?;
    let period = Duration::from_millis(hello.heartbeat_interval.max(1));

    send_json(&mut sink, identify_payload(token)).await?;
    debug!(heartbeat_ms = hello.heartbeat_interval, "Identified with gateway");

    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: Option<u64> = None;
    let mut awaiting_ack = false;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(Frame::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
            _ = heartbeat.tick() => {
                if awaiting_ack {
                    warn!("Gateway heartbeat not acknowledged");
                    return Ok(SessionEnd::Reconnect);
                }
                send_json(&mut sink, heartbeat_payload(sequence)).await?;
                awaiting_ack = true;
            }
            frame = stream.next() => {
                let Some(frame) = frame else {
                    return Ok(SessionEnd::Reconnect);
                };
                let text = match frame.context("Gateway read failed")? {
                    Frame::Text(text) => text,
                    Frame::Close(close) => {
                        if let Some(close) = close {
                            let code = u16::from(close.code);
                            if FATAL_CLOSE_CODES.contains(&code) {
                                return Err(FatalClose { code, reason: close.reason.to_string() }.into());
                            }
                            info!(code, reason = %close.reason, "Gateway closed the session");
                        }
                        return Ok(SessionEnd::Reconnect);
                    }
                    _ => continue,
                };
                let message: GatewayMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(error = %e, "Skipping malformed gateway frame");
                        continue;
                    }
                };
                if message.s.is_some() {
                    sequence = message.s;
                }

                match OpCode::from_u8(message.op) {
                    Some(OpCode::Dispatch) => {
                        let event_type = message.t.as_deref().unwrap_or_default();
                        if event_type == "READY" {
                            let user_id = message
                                .d
                                .as_ref()
                                .and_then(|d| d.pointer("/user/id"))
                                .and_then(Value::as_str)
                                .unwrap_or_default();
                            info!(user_id, "Gateway session ready");
                            continue;
                        }
                        let Some(data) = message.d.as_ref() else { continue };
                        if let Some(event) = reaction_event_from_dispatch(event_type, data) {
                            if events.send(event).await.is_err() {
                                return Ok(SessionEnd::Shutdown);
                            }
                        }
                    }
                    Some(OpCode::Heartbeat) => {
                        send_json(&mut sink, heartbeat_payload(sequence)).await?;
                    }
                    Some(OpCode::HeartbeatAck) => awaiting_ack = false,
                    Some(OpCode::Reconnect) => return Ok(SessionEnd::Reconnect),
                    Some(OpCode::InvalidSession) => {
                        warn!("Gateway invalidated the session");
                        return Ok(SessionEnd::Reconnect);
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn send_json<S>(sink: &mut S, value: Value) -> Result<()>
where
    S: Sink<Frame> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    sink.send(Frame::Text(value.to_string()))
        .await
        .context("Gateway write failed")
}
