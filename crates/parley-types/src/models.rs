use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as rendered in the directory sidebar and in conversation views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One row of the caller's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub is_group: bool,
    pub name: Option<String>,
    pub member_count: usize,
    pub unread_count: usize,
}

/// The counterpart of a direct conversation, resolved relative to the
/// requesting user. Never stored: who "the other user" is depends on
/// who is asking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub is_group: bool,
    pub name: Option<String>,
    pub member_count: usize,
    /// Present only for direct conversations.
    pub other_user: Option<ParticipantView>,
    pub created_at: DateTime<Utc>,
}

/// A message as delivered to clients. Soft-deleted messages keep their row
/// but `content` is omitted from the serialized form entirely; hiding
/// deleted content is not left to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub is_deleted: bool,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub reactions: Vec<ReactionGroup>,
}

/// One emoji on one message, with everyone who applied it. A group with an
/// empty user set is never produced: removing the last user removes the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}
