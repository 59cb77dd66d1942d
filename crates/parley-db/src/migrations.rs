use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Applies any migrations newer than the recorded schema version. Runs on
/// the writer connection before the reader pool opens.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if version < 1 {
        info!("applying migration v1 (initial schema)");
        conn.execute_batch(
            "BEGIN;

            CREATE TABLE users (
                id           TEXT PRIMARY KEY,
                username     TEXT NOT NULL UNIQUE,
                password     TEXT NOT NULL,
                display_name TEXT NOT NULL,
                avatar_url   TEXT,
                is_online    INTEGER NOT NULL DEFAULT 0,
                last_seen    INTEGER,
                created_at   INTEGER NOT NULL
            );

            CREATE TABLE conversations (
                id         TEXT PRIMARY KEY,
                is_group   INTEGER NOT NULL DEFAULT 0,
                name       TEXT,
                created_at INTEGER NOT NULL
            );

            -- One row per unordered user pair. user_lo < user_hi, so a
            -- second lookup from either side lands on the same row.
            CREATE TABLE direct_pairs (
                user_lo         TEXT NOT NULL REFERENCES users(id),
                user_hi         TEXT NOT NULL REFERENCES users(id),
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                PRIMARY KEY (user_lo, user_hi)
            );

            CREATE TABLE conversation_members (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL REFERENCES users(id),
                joined_at       INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_members_user ON conversation_members(user_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                is_deleted      INTEGER NOT NULL DEFAULT 0,
                is_read         INTEGER NOT NULL DEFAULT 0,
                client_key      TEXT,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            -- NULL keys are distinct under SQLite UNIQUE, so only clients
            -- that send a key get retry dedup.
            CREATE UNIQUE INDEX idx_messages_client_key
                ON messages(conversation_id, sender_id, client_key);

            CREATE TABLE reactions (
                message_id TEXT NOT NULL REFERENCES messages(id),
                user_id    TEXT NOT NULL REFERENCES users(id),
                emoji      TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id, emoji)
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;",
        )?;
    }

    Ok(())
}
