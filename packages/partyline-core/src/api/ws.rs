//! WebSocket transport for session control and frame delivery.
//!
//! One connection serves one peer for its whole lifetime: the first message
//! is never special-cased, a peer starts idle and becomes a source or
//! listener by sending the matching session-control message. Every message
//! is a single JSON text frame; there is no separate binary audio channel,
//! so a source's `audioData` messages and a listener's incoming `audioData`
//! deliveries share the same tagged envelope.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::events::{BroadcastEvent, SessionEvent};
use crate::frame::{Frame, FrameMeta};
use crate::protocol_constants::{WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS};
use crate::session::{Hub, Outcome};

use super::AppState;

/// Messages a peer may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum WsIncoming {
    StartStreaming {
        #[serde(rename = "sourceKind")]
        source_kind: String,
        quality: String,
    },
    StopStreaming,
    JoinAsListener {
        #[serde(rename = "sourceId")]
        source_id: String,
    },
    LeaveAsListener,
    AudioData {
        seq: u32,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        channels: u16,
        timestamp: u64,
        samples: Vec<f32>,
        #[serde(rename = "isRetransmission", default)]
        is_retransmission: bool,
    },
    RequestRetransmission {
        #[serde(rename = "sourceId")]
        source_id: String,
        #[serde(rename = "startSeq")]
        start_seq: u32,
        #[serde(rename = "endSeq")]
        end_seq: u32,
    },
}

/// Messages sent to a peer.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum WsOutgoing<'a> {
    CommandAck {
        command: &'a str,
    },
    CommandError {
        command: &'a str,
        message: &'a str,
    },
    AudioData {
        #[serde(rename = "sourceId")]
        source_id: &'a str,
        seq: u32,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        channels: u16,
        timestamp: u64,
        samples: &'a [f32],
        #[serde(rename = "isRetransmission")]
        is_retransmission: bool,
    },
    Event {
        #[serde(flatten)]
        event: &'a BroadcastEvent,
    },
}

impl<'a> WsOutgoing<'a> {
    fn audio(frame: &'a Frame) -> Self {
        WsOutgoing::AudioData {
            source_id: &frame.source_id,
            seq: frame.seq,
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            timestamp: frame.timestamp,
            samples: &frame.samples,
            is_retransmission: frame.is_retransmission,
        }
    }

    fn to_message(&self) -> Message {
        Message::Text(serde_json::to_string(self).unwrap_or_default().into())
    }
}

/// Turns a session-control [`Outcome`] into the reply sent back to the
/// issuing peer. `Applied`/`NoOp` both ack; only `Rejected` carries a
/// `commandError`.
fn ack(command: &'static str, outcome: Outcome) -> Message {
    match outcome {
        Outcome::Applied | Outcome::NoOp => WsOutgoing::CommandAck { command }.to_message(),
        Outcome::Rejected(reason) => WsOutgoing::CommandError { command, message: reason }.to_message(),
    }
}

/// Upgrade entrypoint: `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state, addr))
}

/// RAII cleanup: whatever happens to the connection task, the peer is
/// removed from the hub exactly once.
struct PeerGuard<'a> {
    hub: &'a Hub,
    peer_id: String,
}

impl Drop for PeerGuard<'_> {
    fn drop(&mut self) {
        self.hub.disconnect(&self.peer_id);
    }
}

async fn handle_ws(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let (peer_id, cancel_token) = state.hub.register_peer();
    log::info!("[WS] {} connected as {}", addr, peer_id);
    let _guard = PeerGuard {
        hub: &state.hub,
        peer_id: peer_id.clone(),
    };

    let (mut sink, mut stream) = socket.split();
    let mut broadcast_rx = state.event_bridge.subscribe();
    let (audio_tx, mut audio_rx) = mpsc::channel::<Arc<Frame>>(64);
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<SessionEvent>();
    state.hub.register_notifier(&peer_id, notify_tx);

    let mut heartbeat = tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    let mut last_seen = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] {} force-closed", peer_id);
                break;
            }
            frame = audio_rx.recv() => {
                let Some(frame) = frame else { continue };
                if sink.send(WsOutgoing::audio(&frame).to_message()).await.is_err() {
                    break;
                }
            }
            event = broadcast_rx.recv() => {
                match event {
                    Ok(event) => {
                        if sink.send(WsOutgoing::Event { event: &event }.to_message()).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[WS] {} lagged behind broadcast by {} events", peer_id, n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            notification = notify_rx.recv() => {
                let Some(event) = notification else { continue };
                let event = BroadcastEvent::Session(event);
                if sink.send(WsOutgoing::Event { event: &event }.to_message()).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[WS] {} timed out, closing", peer_id);
                    break;
                }
            }
            message = stream.next() => {
                let Some(message) = message else { break };
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        log::debug!("[WS] {} read error: {}", peer_id, e);
                        break;
                    }
                };
                last_seen = tokio::time::Instant::now();
                match message {
                    Message::Text(text) => {
                        if !dispatch(&state, &peer_id, &text, audio_tx.clone(), &mut sink).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
                }
            }
        }
    }

    log::info!("[WS] {} disconnected", peer_id);
}

/// Decodes and applies one text frame. Returns `false` if the connection
/// should close (send failure).
async fn dispatch(
    state: &AppState,
    peer_id: &str,
    text: &str,
    audio_tx: mpsc::Sender<Arc<Frame>>,
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) -> bool {
    let incoming: WsIncoming = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let reply = WsOutgoing::CommandError {
                command: "unknown",
                message: "malformed message",
            };
            log::debug!("[WS] {} sent unparseable message: {}", peer_id, e);
            return sink.send(reply.to_message()).await.is_ok();
        }
    };

    let reply = match incoming {
        WsIncoming::StartStreaming { source_kind, quality } => {
            ack("startStreaming", state.hub.start_streaming(peer_id, &source_kind, &quality))
        }
        WsIncoming::StopStreaming => ack("stopStreaming", state.hub.stop_streaming(peer_id)),
        WsIncoming::JoinAsListener { source_id } => {
            ack("joinAsListener", state.hub.join_as_listener(peer_id, &source_id, audio_tx))
        }
        WsIncoming::LeaveAsListener => ack("leaveAsListener", state.hub.leave_as_listener(peer_id)),
        WsIncoming::AudioData {
            seq,
            sample_rate,
            channels,
            timestamp,
            samples,
            is_retransmission,
        } => {
            let meta = FrameMeta {
                seq,
                sample_rate,
                channels,
                timestamp,
            };
            ack(
                "audioData",
                state.hub.audio_data(peer_id, samples, meta, is_retransmission),
            )
        }
        WsIncoming::RequestRetransmission {
            source_id,
            start_seq,
            end_seq,
        } => {
            let frames = state.hub.request_retransmission(&source_id, start_seq, end_seq);
            for frame in &frames {
                if sink.send(WsOutgoing::audio(frame).to_message()).await.is_err() {
                    return false;
                }
            }
            WsOutgoing::CommandAck {
                command: "requestRetransmission",
            }
            .to_message()
        }
    };

    sink.send(reply).await.is_ok()
}
