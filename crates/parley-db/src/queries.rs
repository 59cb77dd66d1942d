use crate::Database;
use crate::models::{ConversationRow, MessageRow, ReactionRow, UserRow};
use anyhow::Result;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name, avatar_url, is_online, last_seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, ?6)",
                rusqlite::params![id, username, password_hash, display_name, avatar_url, now],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = ?1"
            ))?;
            let row = stmt.query_row([username], map_user_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_user_row).optional()?;
            Ok(row)
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY username ASC"
            ))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Overwrites only the fields that were provided.
    pub fn update_profile(
        &self,
        id: &str,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                     display_name = COALESCE(?2, display_name),
                     avatar_url = COALESCE(?3, avatar_url)
                 WHERE id = ?1",
                rusqlite::params![id, display_name, avatar_url],
            )?;
            Ok(changed > 0)
        })
    }

    /// Records the presence flip and stamps last_seen with the current time.
    pub fn set_online(&self, id: &str, online: bool) -> Result<bool> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                rusqlite::params![id, online, now],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Direct conversations --

    pub fn find_direct_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<String>> {
        let (lo, hi) = ordered_pair(user_a, user_b);
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT conversation_id FROM direct_pairs WHERE user_lo = ?1 AND user_hi = ?2",
                    [lo, hi],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Finds the conversation for an unordered user pair, creating it (plus
    /// both membership rows) when none exists yet. The whole check-then-insert
    /// runs in one transaction on the writer, so two racing callers cannot
    /// both create; the loser of the race sees the winner's row.
    ///
    /// Returns the conversation id and whether this call created it.
    pub fn create_or_get_direct(
        &self,
        new_id: &str,
        user_a: &str,
        user_b: &str,
    ) -> Result<(String, bool)> {
        anyhow::ensure!(
            user_a != user_b,
            "direct conversation requires two distinct users"
        );
        let now = now_ms();
        let (lo, hi) = ordered_pair(user_a, user_b);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT conversation_id FROM direct_pairs WHERE user_lo = ?1 AND user_hi = ?2",
                    [lo, hi],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok((id, false));
            }

            tx.execute(
                "INSERT INTO conversations (id, is_group, name, created_at) VALUES (?1, 0, NULL, ?2)",
                rusqlite::params![new_id, now],
            )?;
            tx.execute(
                "INSERT INTO direct_pairs (user_lo, user_hi, conversation_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![lo, hi, new_id],
            )?;
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![new_id, user_a, now],
            )?;
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![new_id, user_b, now],
            )?;
            tx.commit()?;

            Ok((new_id.to_string(), true))
        })
    }

    // -- Groups and membership --

    /// Creates a named group with the creator and every listed member.
    /// `member_ids` must not repeat the creator.
    pub fn create_group(
        &self,
        new_id: &str,
        name: &str,
        creator_id: &str,
        member_ids: &[String],
    ) -> Result<()> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, is_group, name, created_at) VALUES (?1, 1, ?2, ?3)",
                rusqlite::params![new_id, name, now],
            )?;
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![new_id, creator_id, now],
            )?;
            for member_id in member_ids {
                tx.execute(
                    "INSERT INTO conversation_members (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![new_id, member_id, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, is_group, name, created_at FROM conversations WHERE id = ?1",
                    [id],
                    map_conversation_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.is_group, c.name, c.created_at
                 FROM conversations c
                 JOIN conversation_members m ON m.conversation_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.created_at ASC",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn conversation_member_ids(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_members
                 WHERE conversation_id = ?1
                 ORDER BY joined_at ASC, user_id ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_member(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let row: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row.is_some())
        })
    }

    // -- Messages --

    /// Appends a message, assigning a timestamp that is strictly greater than
    /// every earlier message in the conversation even when the wall clock
    /// stands still. When `client_key` matches an earlier send from the same
    /// sender, that row is returned instead of inserting a duplicate.
    pub fn append_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        client_key: Option<&str>,
    ) -> Result<MessageRow> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(key) = client_key {
                let existing = tx
                    .query_row(
                        &format!(
                            "SELECT {MESSAGE_COLUMNS}
                             FROM messages m
                             LEFT JOIN users u ON m.sender_id = u.id
                             WHERE m.conversation_id = ?1 AND m.sender_id = ?2 AND m.client_key = ?3"
                        ),
                        rusqlite::params![conversation_id, sender_id, key],
                        map_message_row,
                    )
                    .optional()?;
                if let Some(row) = existing {
                    return Ok(row);
                }
            }

            let last: i64 = tx.query_row(
                "SELECT COALESCE(MAX(created_at), 0) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            let created_at = now.max(last + 1);

            let sender_name: String = tx
                .query_row(
                    "SELECT display_name FROM users WHERE id = ?1",
                    [sender_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or_else(|| "unknown".to_string());

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, is_deleted, is_read, client_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6)",
                rusqlite::params![id, conversation_id, sender_id, content, client_key, created_at],
            )?;
            tx.commit()?;

            Ok(MessageRow {
                id: id.to_string(),
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                sender_name,
                content: content.to_string(),
                is_deleted: false,
                is_read: false,
                client_key: client_key.map(str::to_string),
                created_at,
            })
        })
    }

    /// Returns messages oldest-first. `before` bounds the window from above
    /// (exclusive) and `limit` caps it from below, so pagination walks
    /// backwards through history while each page still reads forward.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.conversation_id = ?1 AND m.created_at < ?2
                 ORDER BY m.created_at DESC
                 LIMIT ?3"
            ))?;

            // LIMIT -1 means unbounded in SQLite.
            let before = before.unwrap_or(i64::MAX);
            let limit = limit.map(i64::from).unwrap_or(-1);

            let mut rows = stmt
                .query_map(rusqlite::params![conversation_id, before, limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Marks a message deleted without removing the row. Only the sender's
    /// own live messages match, so a stranger's id or a repeat call changes
    /// nothing and reports `false`.
    pub fn soft_delete_message(
        &self,
        message_id: &str,
        conversation_id: &str,
        sender_id: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_deleted = 1
                 WHERE id = ?1 AND conversation_id = ?2 AND sender_id = ?3 AND is_deleted = 0",
                rusqlite::params![message_id, conversation_id, sender_id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Read state --

    /// Marks every unread message in the conversation that the reader did not
    /// send. Returns how many rows flipped.
    pub fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
    ) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let marked = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                rusqlite::params![conversation_id, reader_id],
            )?;
            Ok(marked)
        })
    }

    pub fn unread_count(&self, conversation_id: &str, reader_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                [conversation_id, reader_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Reactions --

    /// Toggles one user's emoji on a message: removes the row if present,
    /// inserts it if not. Returns `Some(true)` when added, `Some(false)` when
    /// removed, and `None` when the message does not exist in that
    /// conversation (the toggle is then a no-op).
    pub fn toggle_reaction(
        &self,
        message_id: &str,
        conversation_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Option<bool>> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let target: Option<String> = tx
                .query_row(
                    "SELECT id FROM messages WHERE id = ?1 AND conversation_id = ?2",
                    [message_id, conversation_id],
                    |row| row.get(0),
                )
                .optional()?;
            if target.is_none() {
                return Ok(None);
            }

            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id, user_id, emoji],
            )?;
            let added = removed == 0;
            if added {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![message_id, user_id, emoji, now],
                )?;
            }
            tx.commit()?;

            Ok(Some(added))
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({})
                 ORDER BY created_at ASC",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

const USER_COLUMNS: &str =
    "id, username, password, display_name, avatar_url, is_online, last_seen, created_at";

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, u.display_name, m.content, \
     m.is_deleted, m.is_read, m.client_key, m.created_at";

fn map_user_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        avatar_url: row.get(4)?,
        is_online: row.get(5)?,
        last_seen: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_conversation_row(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<ConversationRow, rusqlite::Error> {
    Ok(ConversationRow {
        id: row.get(0)?,
        is_group: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        is_deleted: row.get(5)?,
        is_read: row.get(6)?,
        client_key: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sorts a user pair into its canonical (lo, hi) order so both lookups and
/// inserts address the same direct_pairs row regardless of argument order.
fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
