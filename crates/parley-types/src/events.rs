use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageView;

/// Events pushed to clients over the WebSocket gateway.
///
/// Presence events are global; everything else is fanned out to the members
/// of the conversation it belongs to and is never seen by non-members.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, username: String },

    /// A conversation the recipient belongs to was just created.
    ConversationCreate {
        conversation_id: Uuid,
        is_group: bool,
        name: Option<String>,
    },

    /// A new message was appended to a conversation.
    MessageCreate { message: MessageView },

    /// A message was soft-deleted; clients drop its content.
    MessageDelete {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    /// A member marked the conversation read.
    ConversationRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        marked: usize,
    },

    ReactionAdd {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemove {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    TypingStart {
        conversation_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    /// Sent when a member stops typing, sends their message, or their
    /// typing flag expires server-side.
    TypingStop {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    /// A user came online or went offline.
    PresenceUpdate {
        user_id: Uuid,
        display_name: String,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    },
}

/// Commands sent from client to server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection.
    Identify { token: String },

    /// Typing heartbeat: the client sets `is_typing: true` on every
    /// keystroke and false after its idle window or on send. The server
    /// expires stale flags on its own clock regardless.
    SetTyping {
        conversation_id: Uuid,
        is_typing: bool,
    },
}
