//! Row types returned by queries. These mirror table shapes directly:
//! string ids and millisecond timestamps. Parsing into richer types
//! happens at the API layer.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// Display name joined from users, "unknown" when the sender row is gone.
    pub sender_name: String,
    pub content: String,
    pub is_deleted: bool,
    pub is_read: bool,
    pub client_key: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}
