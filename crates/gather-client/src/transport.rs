use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, warn};
use uuid::Uuid;

use gather_types::events::{GatewayCommand, GatewayEvent};

use crate::ClientError;

/// How long the server gets to answer Identify with Ready.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

enum WriteOp {
    Command(GatewayCommand),
    Pong(Bytes),
}

/// One long-lived bidirectional channel per client process. The gateway
/// buffers no unsent events — a send that fails here must be resent by the
/// originating component (the outbox marks it Failed for manual retry).
///
/// Reconnection is the caller's move: drop this connection, call
/// [`GatewayConnection::connect`] again, then refetch snapshots and reload
/// the open conversation.
pub struct GatewayConnection {
    pub user_id: Uuid,
    pub username: String,
    cmd_tx: mpsc::UnboundedSender<WriteOp>,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
}

impl GatewayConnection {
    /// Connect, identify with the externally-issued token, and wait for the
    /// server's Ready. Any failure here means messaging is disabled until a
    /// later connect succeeds ("disconnected", not a crash).
    pub async fn connect(url: &str, token: &str) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Network(format!("gateway connect failed: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let identify = GatewayCommand::Identify {
            token: token.to_string(),
        };
        sink.send(Message::Text(
            serde_json::to_string(&identify).unwrap().into(),
        ))
        .await
        .map_err(|e| ClientError::Network(format!("identify send failed: {e}")))?;

        // Wait for Ready before handing the channel to callers.
        let ready = tokio::time::timeout(READY_TIMEOUT, async {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    match serde_json::from_str::<GatewayEvent>(&text) {
                        Ok(GatewayEvent::Ready { user_id, username }) => {
                            return Some((user_id, username));
                        }
                        Ok(other) => debug!("event before Ready ignored: {other:?}"),
                        Err(e) => warn!("unparseable gateway frame before Ready: {e}"),
                    }
                }
            }
            None
        })
        .await
        .map_err(|_| ClientError::Timeout("no Ready from gateway".into()))?
        .ok_or(ClientError::Disconnected)?;

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WriteOp>();
        let (event_tx, events) = mpsc::unbounded_channel();

        // Writer: commands and pong replies out.
        tokio::spawn(async move {
            while let Some(op) = cmd_rx.recv().await {
                let frame = match op {
                    WriteOp::Command(cmd) => {
                        Message::Text(serde_json::to_string(&cmd).unwrap().into())
                    }
                    WriteOp::Pong(payload) => Message::Pong(payload),
                };
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        });

        // Reader: server events in, heartbeat pings answered.
        let pong_tx = cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<GatewayEvent>(&text) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                "unparseable gateway frame dropped: {} -- raw: {}",
                                e,
                                &text[..text.len().min(200)]
                            );
                        }
                    },
                    Message::Ping(payload) => {
                        if pong_tx.send(WriteOp::Pong(payload)).is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            // event_tx drops here; the caller sees the stream end.
        });

        Ok(Self {
            user_id: ready.0,
            username: ready.1,
            cmd_tx,
            events,
        })
    }

    /// Emit a command. An error means the channel is gone — the caller marks
    /// any optimistic send behind this as Failed and offers retry/discard.
    pub fn emit(&self, command: GatewayCommand) -> Result<(), ClientError> {
        self.cmd_tx
            .send(WriteOp::Command(command))
            .map_err(|_| ClientError::Disconnected)
    }

    /// Next pushed event; None once the connection is gone.
    pub async fn next_event(&mut self) -> Option<GatewayEvent> {
        self.events.recv().await
    }
}
