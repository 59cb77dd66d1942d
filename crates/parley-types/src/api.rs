use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway's
/// Identify handshake. Canonical definition lives here in parley-types so
/// the two layers cannot drift apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Best-effort presence beacon fired by the presentation layer on tab
/// open/close. The gateway heartbeat is the authoritative reclaim path.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusRequest {
    pub is_online: bool,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectConversationRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationCreatedResponse {
    pub conversation_id: Uuid,
    /// False when an existing direct conversation was returned instead.
    pub created: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingRequest {
    pub is_typing: bool,
}

/// Display names of everyone currently typing in the conversation,
/// excluding the caller. Empty means nobody is typing.
#[derive(Debug, Serialize, Deserialize)]
pub struct TypingStatusResponse {
    pub typing: Vec<String>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    /// Client-generated idempotency token. A retried send after an ambiguous
    /// network failure returns the already-stored message instead of
    /// appending a duplicate.
    pub client_key: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageQuery {
    /// Page size for cursor pagination. Absent means full history.
    pub limit: Option<u32>,
    /// Creation-time cursor: return messages strictly older than this.
    pub before: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteMessageResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub marked: usize,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReactionResponse {
    /// Some(true) = added, Some(false) = removed, None = target message
    /// was gone and the toggle was a no-op.
    pub added: Option<bool>,
}
