//! Context assembly: decides which stored messages the model sees for a turn.
//!
//! A main-conversation turn sends the whole top-level history. A reply-thread
//! turn sends a bounded slice of the main conversation leading up to the
//! parent, the parent itself, and the thread's existing replies. Assembly is
//! read-only.

use tara_types::models::Role;

use crate::models::MessageRow;
use crate::{Database, DbError, Result};

/// Top-level messages preceding the parent that a threaded turn pulls in.
pub const DEFAULT_THREAD_WINDOW: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTarget {
    /// A message in the main conversation
    Main,
    /// A reply anchored on a top-level message
    Thread { parent_id: String },
}

/// Bound on how much main-conversation history a threaded turn includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextPolicy {
    /// `None` pulls in every earlier top-level message.
    pub thread_window: Option<usize>,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            thread_window: Some(DEFAULT_THREAD_WINDOW),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub role: Role,
    pub content: String,
}

impl From<&MessageRow> for ContextEntry {
    fn from(row: &MessageRow) -> Self {
        Self {
            role: row.role,
            content: row.body.clone(),
        }
    }
}

impl Database {
    /// Build the ordered, role-tagged history for a turn, ending with `new_input`.
    ///
    /// Call before the new input is stored, otherwise it appears twice.
    pub fn assemble_context(
        &self,
        chat_id: &str,
        target: &TurnTarget,
        new_input: &str,
        policy: ContextPolicy,
    ) -> Result<Vec<ContextEntry>> {
        let history = match target {
            TurnTarget::Main => self.get_top_level_messages(chat_id)?,
            TurnTarget::Thread { parent_id } => {
                let parent = self
                    .get_message_by_id(parent_id)?
                    .ok_or(DbError::NotFound("parent message"))?;
                if parent.chat_id != chat_id || !parent.is_top_level() {
                    return Err(DbError::InvalidParent(parent_id.clone()));
                }

                let mut rows = self.get_top_level_messages_before(&parent, policy.thread_window)?;
                let replies = self.get_thread_messages(&parent.id)?;
                rows.push(parent);
                rows.extend(replies);
                rows
            }
        };

        let mut entries: Vec<ContextEntry> = history.iter().map(ContextEntry::from).collect();
        entries.push(ContextEntry {
            role: Role::User,
            content: new_input.to_string(),
        });
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMessage, NewUser};

    struct Conversation {
        db: Database,
        user: String,
        bot: String,
    }

    impl Conversation {
        fn new() -> Self {
            let db = Database::open_in_memory().unwrap();
            let user = db
                .create_user(&NewUser {
                    email: "u@example.com".into(),
                    display_name: "U".into(),
                    ..Default::default()
                })
                .unwrap()
                .id;
            let bot = db.ensure_assistant_user("ai@assistant.local", "AI").unwrap().id;
            db.create_chat(&user, &bot, None, Some("c1")).unwrap();
            Self { db, user, bot }
        }

        fn say(&self, body: &str, parent: Option<&str>) -> MessageRow {
            self.db
                .create_message(&NewMessage {
                    chat_id: "c1".into(),
                    sender_id: self.user.clone(),
                    parent_msg_id: parent.map(str::to_string),
                    body: body.into(),
                    files: vec![],
                })
                .unwrap()
        }

        fn answer(&self, body: &str, parent: Option<&str>) -> MessageRow {
            self.db
                .create_message(&NewMessage {
                    chat_id: "c1".into(),
                    sender_id: self.bot.clone(),
                    parent_msg_id: parent.map(str::to_string),
                    body: body.into(),
                    files: vec![],
                })
                .unwrap()
        }
    }

    fn contents(entries: &[ContextEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.content.as_str()).collect()
    }

    #[test]
    fn main_turn_sends_full_top_level_history() {
        let c = Conversation::new();
        let q = c.say("q1", None);
        c.answer("a1", None);
        c.say("side", Some(&q.id));

        let ctx = c
            .db
            .assemble_context("c1", &TurnTarget::Main, "q2", ContextPolicy::default())
            .unwrap();

        assert_eq!(contents(&ctx), vec!["q1", "a1", "q2"]);
        let roles: Vec<_> = ctx.iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn empty_chat_yields_only_new_input() {
        let c = Conversation::new();
        let ctx = c
            .db
            .assemble_context("c1", &TurnTarget::Main, "hello", ContextPolicy::default())
            .unwrap();
        assert_eq!(
            ctx,
            vec![ContextEntry {
                role: Role::User,
                content: "hello".into()
            }]
        );
    }

    #[test]
    fn thread_turn_stops_at_parent() {
        let c = Conversation::new();
        c.say("q1", None);
        c.answer("a1", None);
        let parent = c.say("m1", None);
        c.answer("after-1", None);
        c.say("after-2", None);
        c.say("r1", Some(&parent.id));
        c.answer("r2", Some(&parent.id));

        let target = TurnTarget::Thread {
            parent_id: parent.id.clone(),
        };
        let ctx = c
            .db
            .assemble_context("c1", &target, "follow-up", ContextPolicy::default())
            .unwrap();

        assert_eq!(contents(&ctx), vec!["q1", "a1", "m1", "r1", "r2", "follow-up"]);
        assert!(!contents(&ctx).contains(&"after-1"));
        assert_eq!(ctx[4].role, Role::Assistant);
    }

    #[test]
    fn thread_window_bounds_main_history() {
        let c = Conversation::new();
        for i in 0..6 {
            c.say(&format!("m{i}"), None);
        }
        let parent = c.answer("anchor", None);
        let target = TurnTarget::Thread {
            parent_id: parent.id.clone(),
        };

        let bounded = c
            .db
            .assemble_context("c1", &target, "why?", ContextPolicy::default())
            .unwrap();
        assert_eq!(contents(&bounded), vec!["m2", "m3", "m4", "m5", "anchor", "why?"]);

        let unbounded = c
            .db
            .assemble_context("c1", &target, "why?", ContextPolicy { thread_window: None })
            .unwrap();
        assert_eq!(unbounded.len(), 8);
        assert_eq!(unbounded[0].content, "m0");
    }

    #[test]
    fn first_reply_in_thread_has_no_replies_yet() {
        let c = Conversation::new();
        let parent = c.say("only", None);
        let target = TurnTarget::Thread {
            parent_id: parent.id.clone(),
        };

        let ctx = c
            .db
            .assemble_context("c1", &target, "expand", ContextPolicy::default())
            .unwrap();
        assert_eq!(contents(&ctx), vec!["only", "expand"]);
    }

    #[test]
    fn thread_parent_must_belong_to_chat() {
        let c = Conversation::new();
        let parent = c.say("root", None);
        let reply = c.say("reply", Some(&parent.id));

        let missing = c.db.assemble_context(
            "c1",
            &TurnTarget::Thread {
                parent_id: "nope".into(),
            },
            "x",
            ContextPolicy::default(),
        );
        assert!(matches!(missing, Err(DbError::NotFound(_))));

        let nested = c.db.assemble_context(
            "c1",
            &TurnTarget::Thread {
                parent_id: reply.id.clone(),
            },
            "x",
            ContextPolicy::default(),
        );
        assert!(matches!(nested, Err(DbError::InvalidParent(_))));

        let wrong_chat = c.db.assemble_context(
            "c2",
            &TurnTarget::Thread {
                parent_id: parent.id.clone(),
            },
            "x",
            ContextPolicy::default(),
        );
        assert!(matches!(wrong_chat, Err(DbError::InvalidParent(_))));
    }

    #[test]
    fn assembly_does_not_write() {
        let c = Conversation::new();
        c.say("q1", None);
        let before = c.db.get_chat_by_id("c1").unwrap().unwrap().last_msg_at;

        c.db.assemble_context("c1", &TurnTarget::Main, "q2", ContextPolicy::default())
            .unwrap();

        assert_eq!(c.db.get_top_level_messages("c1").unwrap().len(), 1);
        assert_eq!(c.db.get_chat_by_id("c1").unwrap().unwrap().last_msg_at, before);
    }
}
