use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent to the client over the turn-submission SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The human message was stored; the completion is about to start
    Start {
        chat_id: String,
        user_message_id: Uuid,
        parent_msg_id: Option<Uuid>,
    },

    /// A chunk of assistant text
    Delta { text: String },

    /// The completion finished. `message_id` is `None` when the reply could
    /// not be persisted.
    Done { message_id: Option<Uuid> },

    /// The model provider failed mid-turn
    Error { message: String },
}

impl TurnEvent {
    /// SSE event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Delta { .. } => "delta",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
