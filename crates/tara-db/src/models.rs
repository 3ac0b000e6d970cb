//! Database row types. These map directly to SQLite rows and stay distinct
//! from the tara-types API models to keep the DB layer independent.
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use tara_types::models::{FileAttachment, Plan, Role};

/// Fixed-width UTC timestamp; lexical order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Parses stored timestamps, accepting RFC 3339 as well as SQLite's
/// `datetime('now')` output.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|ndt| ndt.and_utc())
    })
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub password: Option<String>,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
    pub plan: Plan,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: String,
    pub user_id: String,
    pub assistant_id: String,
    pub title: Option<String>,
    pub last_msg_at: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    /// SQLite rowid; breaks ties between equal `created_at` values.
    pub seq: i64,
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub role: Role,
    pub parent_msg_id: Option<String>,
    pub body: String,
    pub files: Vec<FileAttachment>,
    pub created_at: String,
    pub edited_at: Option<String>,
}

impl MessageRow {
    pub fn is_top_level(&self) -> bool {
        self.parent_msg_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

/// Input for `Database::create_user`.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password_hash: Option<String>,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
}

/// Input for `Database::create_message`. The role is not supplied: it is
/// derived from whether the sender is the chat's assistant identity.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub parent_msg_id: Option<String>,
    pub body: String,
    pub files: Vec<FileAttachment>,
}

pub(crate) const USER_COLUMNS: &str =
    "id, email, display_name, password, avatar_url, is_bot, plan, created_at, updated_at";

pub(crate) const CHAT_COLUMNS: &str =
    "id, user_id, assistant_id, title, last_msg_at, created_at, updated_at";

pub(crate) const MESSAGE_COLUMNS: &str =
    "rowid, id, chat_id, sender_id, role, parent_msg_id, body, files, created_at, edited_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    let plan: String = row.get(6)?;
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        password: row.get(3)?,
        avatar_url: row.get(4)?,
        is_bot: row.get(5)?,
        plan: plan
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub(crate) fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        assistant_id: row.get(2)?,
        title: row.get(3)?,
        last_msg_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let role: String = row.get(4)?;
    let files: String = row.get(7)?;
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        chat_id: row.get(2)?,
        sender_id: row.get(3)?,
        role: role
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        parent_msg_id: row.get(5)?,
        body: row.get(6)?,
        files: serde_json::from_str(&files)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        created_at: row.get(8)?,
        edited_at: row.get(9)?,
    })
}
