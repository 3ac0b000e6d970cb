use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, chats, messages, reactions)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL UNIQUE,
                display_name  TEXT NOT NULL,
                password      TEXT,
                avatar_url    TEXT,
                is_bot        INTEGER NOT NULL DEFAULT 0,
                plan          TEXT NOT NULL DEFAULT 'basic'
                              CHECK (plan IN ('basic', 'pro', 'enterprise')),
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE TABLE chats (
                id            TEXT PRIMARY KEY,
                user_id       TEXT NOT NULL REFERENCES users(id),
                assistant_id  TEXT NOT NULL REFERENCES users(id),
                title         TEXT,
                last_msg_at   TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE INDEX idx_chats_user_recency ON chats(user_id, last_msg_at DESC);

            -- Threads are a flat self-reference: parent_msg_id is NULL for the
            -- main conversation and points at a top-level message for replies.
            CREATE TABLE messages (
                id             TEXT PRIMARY KEY,
                chat_id        TEXT NOT NULL REFERENCES chats(id),
                sender_id      TEXT NOT NULL REFERENCES users(id),
                role           TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                parent_msg_id  TEXT REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED,
                body           TEXT NOT NULL,
                files          TEXT NOT NULL DEFAULT '[]',
                created_at     TEXT NOT NULL,
                edited_at      TEXT
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, created_at);
            CREATE INDEX idx_messages_parent ON messages(parent_msg_id, created_at);

            CREATE TABLE reactions (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(message_id, user_id, emoji)
            );

            CREATE INDEX idx_reactions_message ON reactions(message_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
