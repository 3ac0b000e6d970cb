use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::debug;
use uuid::Uuid;

use tara_types::models::Role;

use crate::models::{
    CHAT_COLUMNS, ChatRow, MESSAGE_COLUMNS, MessageRow, NewMessage, NewUser, ReactionRow,
    USER_COLUMNS, UserRow, chat_from_row, message_from_row, now_ts, user_from_row,
};
use crate::{Database, DbError, Result};

/// Default page size for `get_messages`.
pub const DEFAULT_MESSAGE_LIMIT: u32 = 50;

impl Database {
    // -- Users --

    pub fn create_user(&self, new: &NewUser) -> Result<UserRow> {
        let now = now_ts();
        let row = UserRow {
            id: Uuid::new_v4().to_string(),
            email: new.email.clone(),
            display_name: new.display_name.clone(),
            password: new.password_hash.clone(),
            avatar_url: new.avatar_url.clone(),
            is_bot: new.is_bot,
            plan: Default::default(),
            created_at: now.clone(),
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, display_name, password, avatar_url, is_bot, plan, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id,
                    row.email,
                    row.display_name,
                    row.password,
                    row.avatar_url,
                    row.is_bot,
                    row.plan.as_str(),
                    row.created_at,
                    row.updated_at,
                ],
            )
            .map_err(|e| DbError::from_insert(e, "user"))?;
            Ok(())
        })?;

        Ok(row)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_email(conn, email))
    }

    /// Get-or-create the synthetic user that authors assistant replies.
    /// Keyed by email, so concurrent first turns converge on one record.
    /// A human account already holding the email is a `Conflict`.
    pub fn ensure_assistant_user(&self, email: &str, display_name: &str) -> Result<UserRow> {
        self.with_conn_mut(|conn| {
            let now = now_ts();
            let inserted = conn.execute(
                "INSERT INTO users (id, email, display_name, is_bot, plan, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, 'basic', ?4, ?4)
                 ON CONFLICT(email) DO NOTHING",
                params![Uuid::new_v4().to_string(), email, display_name, now],
            )?;
            if inserted == 1 {
                debug!("Created assistant identity {}", email);
            }

            let user = query_user_by_email(conn, email)?.ok_or(DbError::NotFound("assistant user"))?;
            if !user.is_bot {
                return Err(DbError::Conflict(format!(
                    "{email} belongs to a registered user, not the assistant"
                )));
            }
            Ok(user)
        })
    }

    // -- Chats --

    /// Plain create. Fails with `Conflict` if `explicit_id` is already taken.
    pub fn create_chat(
        &self,
        owner_id: &str,
        assistant_id: &str,
        title: Option<&str>,
        explicit_id: Option<&str>,
    ) -> Result<ChatRow> {
        let row = new_chat_row(owner_id, assistant_id, title, explicit_id);

        self.with_conn_mut(|conn| {
            insert_chat(conn, &row, false).map_err(|e| DbError::from_insert(e, "chat"))?;
            Ok(())
        })?;

        Ok(row)
    }

    /// Insert-if-absent keyed by the client-supplied conversation id.
    /// Returns the stored chat and whether this call created it.
    pub fn upsert_chat(
        &self,
        id: &str,
        owner_id: &str,
        assistant_id: &str,
        title: Option<&str>,
    ) -> Result<(ChatRow, bool)> {
        let row = new_chat_row(owner_id, assistant_id, title, Some(id));

        self.with_conn_mut(|conn| {
            let created = insert_chat(conn, &row, true)? == 1;
            let stored = query_chat(conn, id)?.ok_or(DbError::NotFound("chat"))?;
            Ok((stored, created))
        })
    }

    /// Chats owned by `owner_id`, most recently active first.
    pub fn get_chats_by_user_id(&self, owner_id: &str) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHAT_COLUMNS} FROM chats
                 WHERE user_id = ?1
                 ORDER BY last_msg_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([owner_id], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Callers must check `user_id` against the session before exposing or
    /// mutating the result.
    pub fn get_chat_by_id(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| query_chat(conn, id))
    }

    pub fn rename_chat(&self, id: &str, title: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now_ts(), id],
            )?;
            Ok(updated == 1)
        })
    }

    /// Delete a chat with its messages and their reactions in one transaction.
    /// Returns false if no such chat existed.
    pub fn delete_chat_by_id(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM reactions
                 WHERE message_id IN (SELECT id FROM messages WHERE chat_id = ?1)",
                [id],
            )?;
            let messages = tx.execute("DELETE FROM messages WHERE chat_id = ?1", [id])?;
            let chats = tx.execute("DELETE FROM chats WHERE id = ?1", [id])?;

            tx.commit()?;

            if chats == 1 {
                debug!("Deleted chat {} with {} messages", id, messages);
            }
            Ok(chats == 1)
        })
    }

    // -- Messages --

    /// Store a message and advance the chat's `last_msg_at`.
    ///
    /// The role is `assistant` exactly when the sender is the chat's assistant
    /// identity. A parent, if given, must be a top-level message of the same chat.
    pub fn create_message(&self, new: &NewMessage) -> Result<MessageRow> {
        let files = serde_json::to_string(&new.files)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let assistant_id: String = tx
                .query_row(
                    "SELECT assistant_id FROM chats WHERE id = ?1",
                    [&new.chat_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(DbError::NotFound("chat"))?;

            if let Some(parent_id) = &new.parent_msg_id {
                let parent: (String, Option<String>) = tx
                    .query_row(
                        "SELECT chat_id, parent_msg_id FROM messages WHERE id = ?1",
                        [parent_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?
                    .ok_or(DbError::NotFound("parent message"))?;

                if parent.0 != new.chat_id || parent.1.is_some() {
                    return Err(DbError::InvalidParent(parent_id.clone()));
                }
            }

            let role = if new.sender_id == assistant_id {
                Role::Assistant
            } else {
                Role::User
            };
            let id = Uuid::new_v4().to_string();
            let now = now_ts();

            tx.execute(
                "INSERT INTO messages (id, chat_id, sender_id, role, parent_msg_id, body, files, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    new.chat_id,
                    new.sender_id,
                    role.as_str(),
                    new.parent_msg_id,
                    new.body,
                    files,
                    now,
                ],
            )?;
            let seq = tx.last_insert_rowid();

            tx.execute(
                "UPDATE chats SET last_msg_at = MAX(last_msg_at, ?1), updated_at = ?1 WHERE id = ?2",
                params![now, new.chat_id],
            )?;

            tx.commit()?;

            Ok(MessageRow {
                seq,
                id,
                chat_id: new.chat_id.clone(),
                sender_id: new.sender_id.clone(),
                role,
                parent_msg_id: new.parent_msg_id.clone(),
                body: new.body.clone(),
                files: new.files.clone(),
                created_at: now,
                edited_at: None,
            })
        })
    }

    pub fn get_message_by_id(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], message_from_row).optional()?)
        })
    }

    /// The most recent `limit` top-level messages of a chat, oldest first.
    /// `before` is the id of the oldest message on the previous page; ties on
    /// `created_at` are broken by insertion order so no message is skipped.
    pub fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let cursor = match before {
                Some(id) => Some(
                    conn.query_row(
                        "SELECT created_at, rowid FROM messages
                         WHERE id = ?1 AND chat_id = ?2 AND parent_msg_id IS NULL",
                        params![id, chat_id],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?
                    .ok_or(DbError::NotFound("cursor message"))?,
                ),
                None => None,
            };
            let (cursor_at, cursor_seq) = cursor.unzip();

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1 AND parent_msg_id IS NULL
                   AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND rowid < ?3))
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![chat_id, cursor_at, cursor_seq, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Every top-level message of a chat, oldest first.
    pub fn get_top_level_messages(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1 AND parent_msg_id IS NULL
                 ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([chat_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Top-level messages strictly before `anchor`, oldest first. With a
    /// `window` only the most recent `window` of them are returned.
    pub fn get_top_level_messages_before(
        &self,
        anchor: &MessageRow,
        window: Option<usize>,
    ) -> Result<Vec<MessageRow>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = window.map_or(-1, |w| w as i64);

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1 AND parent_msg_id IS NULL
                   AND (created_at < ?2 OR (created_at = ?2 AND rowid < ?3))
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![anchor.chat_id, anchor.created_at, anchor.seq, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Replies anchored on `parent_id`, oldest first. Never includes the parent.
    pub fn get_thread_messages(&self, parent_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE parent_msg_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([parent_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Number of replies to `parent_id`; served from the parent index.
    pub fn get_thread_count_by_parent_message(&self, parent_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE parent_msg_id = ?1",
                [parent_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Batch reply counts for a page of messages. Messages without replies are absent.
    pub fn get_thread_counts_for_messages(
        &self,
        message_ids: &[String],
    ) -> Result<HashMap<String, u64>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT parent_msg_id, COUNT(*) FROM messages
                 WHERE parent_msg_id IN ({})
                 GROUP BY parent_msg_id",
                placeholders(message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let counts = stmt
                .query_map(params_from_iter(message_ids.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;
            Ok(counts)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes it if present, inserts it otherwise.
    /// Returns true when the reaction was added.
    pub fn toggle_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            let added = match existing {
                Some(existing_id) => {
                    tx.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
                    false
                }
                None => {
                    tx.execute(
                        "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![Uuid::new_v4().to_string(), message_id, user_id, emoji, now_ts()],
                    )?;
                    true
                }
            };

            tx.commit()?;
            Ok(added)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at ASC",
                placeholders(message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(message_ids.iter()), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
    Ok(conn.query_row(&sql, [email], user_from_row).optional()?)
}

fn query_chat(conn: &Connection, id: &str) -> Result<Option<ChatRow>> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], chat_from_row).optional()?)
}

fn new_chat_row(
    owner_id: &str,
    assistant_id: &str,
    title: Option<&str>,
    explicit_id: Option<&str>,
) -> ChatRow {
    let now = now_ts();
    ChatRow {
        id: explicit_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
        user_id: owner_id.to_string(),
        assistant_id: assistant_id.to_string(),
        title: title.map(str::to_string),
        last_msg_at: now.clone(),
        created_at: now.clone(),
        updated_at: now,
    }
}

fn insert_chat(conn: &Connection, row: &ChatRow, if_absent: bool) -> rusqlite::Result<usize> {
    let sql = if if_absent {
        "INSERT INTO chats (id, user_id, assistant_id, title, last_msg_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO NOTHING"
    } else {
        "INSERT INTO chats (id, user_id, assistant_id, title, last_msg_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    };
    conn.execute(
        sql,
        params![
            row.id,
            row.user_id,
            row.assistant_id,
            row.title,
            row.last_msg_at,
            row.created_at,
            row.updated_at,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        db: Database,
        alice: UserRow,
        bob: UserRow,
        bot: UserRow,
    }

    fn setup() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let alice = db
            .create_user(&NewUser {
                email: "alice@example.com".into(),
                display_name: "Alice".into(),
                ..Default::default()
            })
            .unwrap();
        let bob = db
            .create_user(&NewUser {
                email: "bob@example.com".into(),
                display_name: "Bob".into(),
                ..Default::default()
            })
            .unwrap();
        let bot = db.ensure_assistant_user("ai@assistant.local", "AI Assistant").unwrap();
        Fixture { db, alice, bob, bot }
    }

    fn post(db: &Database, chat: &str, sender: &str, parent: Option<&str>, body: &str) -> MessageRow {
        db.create_message(&NewMessage {
            chat_id: chat.into(),
            sender_id: sender.into(),
            parent_msg_id: parent.map(str::to_string),
            body: body.into(),
            files: vec![],
        })
        .unwrap()
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let f = setup();
        let err = f
            .db
            .create_user(&NewUser {
                email: "alice@example.com".into(),
                display_name: "Other".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let found = f.db.get_user_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(found.id, f.alice.id);
        assert!(f.db.get_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn assistant_user_is_created_once() {
        let f = setup();
        let again = f.db.ensure_assistant_user("ai@assistant.local", "AI Assistant").unwrap();
        assert_eq!(again.id, f.bot.id);
        assert!(again.is_bot);
    }

    #[test]
    fn human_account_cannot_stand_in_for_the_assistant() {
        let f = setup();
        let err = f
            .db
            .ensure_assistant_user("alice@example.com", "AI Assistant")
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let alice = f.db.get_user_by_email("alice@example.com").unwrap().unwrap();
        assert!(!alice.is_bot);
        assert_eq!(alice.display_name, "Alice");
    }

    #[test]
    fn create_chat_honours_explicit_id() {
        let f = setup();
        let chat = f
            .db
            .create_chat(&f.alice.id, &f.bot.id, Some("New Chat"), Some("c1"))
            .unwrap();
        assert_eq!(chat.id, "c1");

        let stored = f.db.get_chat_by_id("c1").unwrap().unwrap();
        assert_eq!(stored.user_id, f.alice.id);
        assert_eq!(stored.title.as_deref(), Some("New Chat"));

        let err = f
            .db
            .create_chat(&f.alice.id, &f.bot.id, None, Some("c1"))
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn upsert_chat_creates_exactly_once() {
        let f = setup();
        let (first, created) = f.db.upsert_chat("c1", &f.alice.id, &f.bot.id, None).unwrap();
        assert!(created);

        // A racing second caller sees the stored record, not its own
        let (second, created) = f.db.upsert_chat("c1", &f.bob.id, &f.bot.id, None).unwrap();
        assert!(!created);
        assert_eq!(second.user_id, first.user_id);
        assert_eq!(f.db.get_chats_by_user_id(&f.bob.id).unwrap().len(), 0);
    }

    #[test]
    fn chats_are_listed_per_owner_by_recency() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("old")).unwrap();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("new")).unwrap();
        f.db.create_chat(&f.bob.id, &f.bot.id, None, Some("bobs")).unwrap();

        // Activity in "old" moves it to the top
        post(&f.db, "old", &f.alice.id, None, "bump");

        let chats = f.db.get_chats_by_user_id(&f.alice.id).unwrap();
        let ids: Vec<_> = chats.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);
        assert!(chats.iter().all(|c| c.user_id == f.alice.id));
        assert!(chats.windows(2).all(|w| w[0].last_msg_at >= w[1].last_msg_at));

        assert!(f.db.get_chats_by_user_id("nobody").unwrap().is_empty());
    }

    #[test]
    fn create_message_advances_last_activity() {
        let f = setup();
        let chat = f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();

        let msg = post(&f.db, "c1", &f.alice.id, None, "hello");
        let after = f.db.get_chat_by_id("c1").unwrap().unwrap();

        assert!(after.last_msg_at >= chat.last_msg_at);
        assert_eq!(after.last_msg_at, msg.created_at);
    }

    #[test]
    fn create_message_requires_existing_chat() {
        let f = setup();
        let err = f
            .db
            .create_message(&NewMessage {
                chat_id: "missing".into(),
                sender_id: f.alice.id.clone(),
                body: "hi".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound("chat")));
    }

    #[test]
    fn role_follows_assistant_identity() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();

        let human = post(&f.db, "c1", &f.alice.id, None, "question");
        let reply = post(&f.db, "c1", &f.bot.id, None, "answer");
        assert_eq!(human.role, Role::User);
        assert_eq!(reply.role, Role::Assistant);

        let chat = f.db.get_chat_by_id("c1").unwrap().unwrap();
        for m in f.db.get_top_level_messages("c1").unwrap() {
            assert_eq!(m.role == Role::Assistant, m.sender_id == chat.assistant_id);
        }
    }

    #[test]
    fn parent_must_be_top_level_in_same_chat() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c2")).unwrap();
        let root = post(&f.db, "c1", &f.alice.id, None, "root");
        let reply = post(&f.db, "c1", &f.alice.id, Some(&root.id), "reply");

        let cross_chat = f.db.create_message(&NewMessage {
            chat_id: "c2".into(),
            sender_id: f.alice.id.clone(),
            parent_msg_id: Some(root.id.clone()),
            body: "x".into(),
            files: vec![],
        });
        assert!(matches!(cross_chat, Err(DbError::InvalidParent(_))));

        let nested = f.db.create_message(&NewMessage {
            chat_id: "c1".into(),
            sender_id: f.alice.id.clone(),
            parent_msg_id: Some(reply.id.clone()),
            body: "x".into(),
            files: vec![],
        });
        assert!(matches!(nested, Err(DbError::InvalidParent(_))));

        let missing = f.db.create_message(&NewMessage {
            chat_id: "c1".into(),
            sender_id: f.alice.id.clone(),
            parent_msg_id: Some("nope".into()),
            body: "x".into(),
            files: vec![],
        });
        assert!(matches!(missing, Err(DbError::NotFound("parent message"))));
    }

    #[test]
    fn get_messages_pages_top_level_only() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();
        let mut top = Vec::new();
        for i in 0..5 {
            top.push(post(&f.db, "c1", &f.alice.id, None, &format!("m{i}")));
        }
        post(&f.db, "c1", &f.alice.id, Some(&top[0].id), "reply");

        let all = f.db.get_messages("c1", DEFAULT_MESSAGE_LIMIT, None).unwrap();
        let bodies: Vec<_> = all.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2", "m3", "m4"]);

        let last_two = f.db.get_messages("c1", 2, None).unwrap();
        let bodies: Vec<_> = last_two.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m3", "m4"]);

        assert!(f.db.get_messages("other", 10, None).unwrap().is_empty());
    }

    #[test]
    fn message_cursor_keeps_messages_sharing_a_timestamp() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();
        for i in 0..5 {
            post(&f.db, "c1", &f.alice.id, None, &format!("m{i}"));
        }
        f.db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET created_at = '2026-01-01T00:00:00.000000Z' WHERE chat_id = 'c1'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let mut seen = Vec::new();
        let mut before: Option<String> = None;
        loop {
            let page = f.db.get_messages("c1", 2, before.as_deref()).unwrap();
            if page.is_empty() {
                break;
            }
            before = Some(page[0].id.clone());
            let mut bodies: Vec<_> = page.into_iter().map(|m| m.body).collect();
            bodies.extend(seen);
            seen = bodies;
        }
        assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);

        let err = f.db.get_messages("c1", 2, Some("no-such-message")).unwrap_err();
        assert!(matches!(err, DbError::NotFound("cursor message")));
    }

    #[test]
    fn thread_messages_and_counts_agree() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();
        let root = post(&f.db, "c1", &f.alice.id, None, "root");
        let other = post(&f.db, "c1", &f.alice.id, None, "other");
        let r1 = post(&f.db, "c1", &f.alice.id, Some(&root.id), "r1");
        let r2 = post(&f.db, "c1", &f.bot.id, Some(&root.id), "r2");
        post(&f.db, "c1", &f.alice.id, Some(&other.id), "elsewhere");

        let thread = f.db.get_thread_messages(&root.id).unwrap();
        let ids: Vec<_> = thread.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![r1.id, r2.id]);
        assert!(thread.iter().all(|m| m.parent_msg_id.as_deref() == Some(root.id.as_str())));
        assert!(!thread.iter().any(|m| m.id == root.id));

        let count = f.db.get_thread_count_by_parent_message(&root.id).unwrap();
        assert_eq!(count, thread.len() as u64);

        let counts = f
            .db
            .get_thread_counts_for_messages(&[root.id.clone(), other.id.clone(), "x".into()])
            .unwrap();
        assert_eq!(counts.get(&root.id), Some(&2));
        assert_eq!(counts.get(&other.id), Some(&1));
        assert_eq!(counts.get("x"), None);
        assert_eq!(f.db.get_thread_count_by_parent_message("x").unwrap(), 0);
    }

    #[test]
    fn delete_chat_cascades_to_messages_and_reactions() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("keep")).unwrap();
        let root = post(&f.db, "c1", &f.alice.id, None, "root");
        post(&f.db, "c1", &f.bot.id, Some(&root.id), "reply");
        let kept = post(&f.db, "keep", &f.alice.id, None, "stay");
        f.db.toggle_reaction(&root.id, &f.alice.id, "👍").unwrap();

        assert!(f.db.delete_chat_by_id("c1").unwrap());

        assert!(f.db.get_chat_by_id("c1").unwrap().is_none());
        assert!(f.db.get_message_by_id(&root.id).unwrap().is_none());
        assert!(f.db.get_thread_messages(&root.id).unwrap().is_empty());
        assert!(f.db.get_reactions_for_messages(&[root.id.clone()]).unwrap().is_empty());
        assert!(f.db.get_message_by_id(&kept.id).unwrap().is_some());

        assert!(!f.db.delete_chat_by_id("c1").unwrap());
    }

    #[test]
    fn rename_chat_updates_title() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();
        assert!(f.db.rename_chat("c1", "Trip planning").unwrap());
        assert_eq!(
            f.db.get_chat_by_id("c1").unwrap().unwrap().title.as_deref(),
            Some("Trip planning")
        );
        assert!(!f.db.rename_chat("missing", "x").unwrap());
    }

    #[test]
    fn toggling_a_reaction_twice_removes_it() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();
        let msg = post(&f.db, "c1", &f.alice.id, None, "hi");

        assert!(f.db.toggle_reaction(&msg.id, &f.alice.id, "🎉").unwrap());
        assert!(f.db.toggle_reaction(&msg.id, &f.bob.id, "🎉").unwrap());
        assert_eq!(f.db.get_reactions_for_messages(&[msg.id.clone()]).unwrap().len(), 2);

        assert!(!f.db.toggle_reaction(&msg.id, &f.alice.id, "🎉").unwrap());
        let left = f.db.get_reactions_for_messages(&[msg.id.clone()]).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_id, f.bob.id);
    }

    #[test]
    fn file_attachments_round_trip_through_storage() {
        let f = setup();
        f.db.create_chat(&f.alice.id, &f.bot.id, None, Some("c1")).unwrap();
        let attachment = tara_types::models::FileAttachment {
            name: "notes.pdf".into(),
            url: "https://files.example.com/notes.pdf".into(),
            mime: "application/pdf".into(),
        };
        let msg = f
            .db
            .create_message(&NewMessage {
                chat_id: "c1".into(),
                sender_id: f.alice.id.clone(),
                body: "see attached".into(),
                files: vec![attachment.clone()],
                ..Default::default()
            })
            .unwrap();

        let stored = f.db.get_message_by_id(&msg.id).unwrap().unwrap();
        assert_eq!(stored.files, vec![attachment]);
        assert!(stored.is_top_level());
    }
}
