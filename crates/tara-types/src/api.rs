use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FileAttachment, Plan, Role};

// -- JWT Claims --

/// Bearer token claims. Issued by the auth handlers, checked by the auth
/// middleware on every protected route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    #[serde(default)]
    pub plan: Plan,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
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
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub plan: Plan,
    pub token: String,
}

// -- Chat turns --

/// One entry of the client-side transcript. Only the trailing `user` entry is
/// read; the server rebuilds history from storage.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTurnRequest {
    pub id: String,
    pub messages: Vec<ClientMessage>,
    pub parent_message_id: Option<String>,
    pub main_chat_id: Option<String>,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
}

impl SubmitTurnRequest {
    /// Content of the last non-empty user entry, if any.
    pub fn latest_user_input(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user" && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameChatRequest {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatIdQuery {
    pub id: Option<String>,
}

/// Chat metadata as listed in the history sidebar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub last_msg_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<u32>,
    /// Id of the oldest message on the previous page
    pub before: Option<String>,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub chat_id: String,
    pub sender_id: Uuid,
    pub role: Role,
    pub parent_msg_id: Option<Uuid>,
    pub body: String,
    pub files: Vec<FileAttachment>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub reply_count: u64,
    pub reactions: Vec<ReactionGroup>,
}

// -- Threads --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadQuery {
    pub parent_message_id: Option<String>,
    pub main_chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadListResponse {
    pub threads: Vec<ThreadMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadCountResponse {
    pub count: u64,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}
