//! Row-to-view assembly shared by the handler modules.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{MessageRow, ReactionRow, UserRow};
use parley_types::models::{MessageView, ReactionGroup, UserView};

pub fn timestamp(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(|| {
        warn!("Out-of-range timestamp {} in storage", ms);
        DateTime::default()
    })
}

pub fn parse_id(value: &str, what: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, value, e);
        Uuid::default()
    })
}

pub fn user_view(row: UserRow) -> UserView {
    UserView {
        id: parse_id(&row.id, "user id"),
        username: row.username,
        display_name: row.display_name,
        avatar_url: row.avatar_url,
        is_online: row.is_online,
        last_seen: row.last_seen.map(timestamp),
        created_at: timestamp(row.created_at),
    }
}

/// Group reaction rows by message_id -> emoji -> user_ids, then flatten the
/// inner map into sorted `ReactionGroup`s.
pub fn reaction_groups(rows: &[ReactionRow]) -> HashMap<String, Vec<ReactionGroup>> {
    let mut by_message: HashMap<String, HashMap<String, Vec<Uuid>>> = HashMap::new();
    for r in rows {
        let emoji_map = by_message.entry(r.message_id.clone()).or_default();
        let user_ids = emoji_map.entry(r.emoji.clone()).or_default();
        if let Ok(uid) = r.user_id.parse::<Uuid>() {
            user_ids.push(uid);
        }
    }

    by_message
        .into_iter()
        .map(|(message_id, emoji_map)| {
            let mut groups: Vec<ReactionGroup> = emoji_map
                .into_iter()
                .map(|(emoji, user_ids)| ReactionGroup {
                    count: user_ids.len(),
                    emoji,
                    user_ids,
                })
                .collect();
            groups.sort_by(|a, b| a.emoji.cmp(&b.emoji));
            (message_id, groups)
        })
        .collect()
}

/// Deleted messages keep their row; the view withholds their content.
pub fn message_view(row: MessageRow, reactions: Vec<ReactionGroup>) -> MessageView {
    MessageView {
        id: parse_id(&row.id, "message id"),
        conversation_id: parse_id(&row.conversation_id, "conversation id"),
        sender_id: parse_id(&row.sender_id, "sender id"),
        sender_name: row.sender_name,
        content: if row.is_deleted { None } else { Some(row.content) },
        is_deleted: row.is_deleted,
        is_read: row.is_read,
        created_at: timestamp(row.created_at),
        reactions,
    }
}

/// Member ids of a conversation parsed for fan-out. Corrupt ids are skipped.
pub fn member_uuids(db: &Database, conversation_id: Uuid) -> Result<Vec<Uuid>> {
    let ids = db.conversation_member_ids(&conversation_id.to_string())?;
    Ok(ids.iter().filter_map(|id| id.parse().ok()).collect())
}
