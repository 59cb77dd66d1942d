use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;
use crate::typing::TypingTracker;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection, starting with the Identify
/// handshake and ending with presence teardown.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    typing: TypingTracker,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    // A valid token for a deleted account gets no session.
    let display_name = match db.get_user_by_id(&user_id.to_string()) {
        Ok(Some(user)) => user.display_name,
        Ok(None) => {
            warn!("Identify for unknown user {}, closing", user_id);
            return;
        }
        Err(e) => {
            warn!("User lookup failed during identify: {:#}", e);
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Register per-user channel before going online, so nothing fanned out
    // during setup is lost.
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    // Send existing online users to this client so they see who's already here
    let existing_users = dispatcher.online_users().await;
    for (uid, name) in &existing_users {
        let event = GatewayEvent::PresenceUpdate {
            user_id: *uid,
            display_name: name.clone(),
            online: true,
            last_seen: None,
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
    if let Err(e) = db.set_online(&user_id.to_string(), true) {
        warn!("Failed to persist online status for {}: {:#}", user_id, e);
    }
    dispatcher.user_online(user_id, display_name.clone()).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();
    let typing_recv = typing.clone();
    let db_recv = db.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
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
                            warn!("Broadcast receiver lagged by {} messages", n);
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
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
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
    let display_name_recv = display_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &dispatcher_recv,
                            &typing_recv,
                            &db_recv,
                            user_id,
                            &display_name_recv,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            display_name_recv,
                            user_id,
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

    // A stale conn_id means the user already reconnected; leave their
    // fresh presence alone.
    if dispatcher.user_offline(user_id, conn_id).await {
        if let Err(e) = db.set_online(&user_id.to_string(), false) {
            warn!("Failed to persist offline status for {}: {:#}", user_id, e);
        }
    }
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use parley_types::api::Claims;

    let timeout = tokio::time::timeout(std::time::Duration::from_secs(10), async {
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

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    typing: &TypingTracker,
    db: &Database,
    user_id: Uuid,
    display_name: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::SetTyping {
            conversation_id,
            is_typing,
        } => {
            let member =
                match db.is_member(&conversation_id.to_string(), &user_id.to_string()) {
                    Ok(member) => member,
                    Err(e) => {
                        warn!("Membership check failed for typing update: {:#}", e);
                        return;
                    }
                };
            if !member {
                // Non-members cannot make a conversation look busy.
                return;
            }

            // Refreshes extend the deadline without a transition; only
            // transitions reach the members.
            if !typing.set_typing(conversation_id, user_id, is_typing) {
                return;
            }

            let members = match db.conversation_member_ids(&conversation_id.to_string()) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("Member lookup failed for typing update: {:#}", e);
                    return;
                }
            };
            let member_ids: Vec<Uuid> = members
                .iter()
                .filter_map(|id| Uuid::parse_str(id).ok())
                .collect();

            let event = if is_typing {
                GatewayEvent::TypingStart {
                    conversation_id,
                    user_id,
                    display_name: display_name.to_string(),
                }
            } else {
                GatewayEvent::TypingStop {
                    conversation_id,
                    user_id,
                }
            };
            dispatcher.fan_out(&member_ids, event).await;
        }
    }
}
