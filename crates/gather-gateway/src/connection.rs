use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use gather_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;
use crate::router::{Identity, MessageRouter, RouteError};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection gets to send Identify before being closed.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, Ready, then the
/// command/event loop until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    router: MessageRouter,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let identity = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!(
        "{} ({}) connected to gateway",
        identity.username, identity.user_id
    );

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id: identity.user_id,
        username: identity.username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, router, identity).await;
}

async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    router: MessageRouter,
    identity: Identity,
) {
    // Register per-user channel and send existing online users, then go online
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(identity.user_id).await;

    // Send existing online users to this client so they see who's already here
    let existing_users = dispatcher.online_users().await;
    for (uid, uname) in &existing_users {
        let event = GatewayEvent::PresenceUpdate {
            user_id: *uid,
            username: uname.clone(),
            online: true,
        };
        if sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            return;
        }
    }

    // Now mark ourselves online (broadcasts to everyone else)
    dispatcher
        .user_online(identity.user_id, identity.username.clone())
        .await;

    // Subscribe to global broadcasts (presence) and relay to this client
    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_clone = dispatcher.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Spawn task to forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let identity_recv = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_clone, &router, &identity_recv, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            identity_recv.username,
                            identity_recv.user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(identity.user_id, conn_id).await;
    info!(
        "{} ({}) disconnected from gateway",
        identity.username, identity.user_id
    );
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Identity> {
    use gather_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(Identity {
                        user_id: token_data.claims.sub,
                        username: token_data.claims.username,
                    });
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    router: &MessageRouter,
    identity: &Identity,
    cmd: GatewayCommand,
) {
    let outcome = match cmd {
        GatewayCommand::Identify { .. } => Ok(()), // Already handled

        GatewayCommand::GroupSend {
            sender_id,
            room_id,
            content,
            temp_id,
        } => match check_sender(identity, sender_id) {
            Ok(()) => router
                .send_group_message(identity, room_id, &content, Some(temp_id))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        },

        GatewayCommand::DmSend {
            sender_id,
            recipient_id,
            content,
            temp_id,
        } => match check_sender(identity, sender_id) {
            Ok(()) => router
                .send_direct_message(identity, recipient_id, &content, Some(temp_id))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        },

        GatewayCommand::MessageDelete {
            sender_id,
            kind,
            message_id,
        } => match check_sender(identity, sender_id) {
            Ok(()) => router.delete_message(identity, kind, message_id).await,
            Err(e) => Err(e),
        },

        GatewayCommand::ReactionToggle {
            sender_id,
            kind,
            message_id,
            emoji,
        } => match check_sender(identity, sender_id) {
            Ok(()) => router
                .toggle_reaction(identity, kind, message_id, &emoji)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        },

        GatewayCommand::TypingStart { conversation } => {
            router.typing(identity, conversation, true).await
        }

        GatewayCommand::TypingStop { conversation } => {
            router.typing(identity, conversation, false).await
        }
    };

    if let Err(err) = outcome {
        warn!(
            "{} ({}) command rejected: {}",
            identity.username, identity.user_id, err
        );
        dispatcher
            .send_to_user(identity.user_id, err.into_event())
            .await;
    }
}

fn check_sender(identity: &Identity, declared: Uuid) -> Result<(), RouteError> {
    if declared == identity.user_id {
        Ok(())
    } else {
        Err(RouteError::Forbidden(
            "declared sender does not match the connection identity".into(),
        ))
    }
}
