//! Tara LLM: the completion-provider port used by the chat handlers plus an
//! OpenAI-compatible streaming client.
//!
//! Handlers only see `CompletionProvider`; the concrete client is chosen at
//! startup and can be swapped for a scripted one in tests.

pub mod openai;
pub mod persona;

use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use tara_types::models::Role;

pub use openai::OpenAiCompatible;
pub use persona::{DisplayMode, Persona, UnknownDisplayMode, clean_title};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to model provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("completion stream failed: {0}")]
    Stream(String),

    #[error("model returned an empty completion")]
    Empty,

    #[error("completion receiver dropped")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<Role> for PromptRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: impl Into<PromptRole>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Messages as sent on the wire: the system prompt first, then the history.
    pub fn wire_messages(&self) -> Vec<PromptMessage> {
        self.system
            .iter()
            .map(|s| PromptMessage::new(PromptRole::System, s.clone()))
            .chain(self.messages.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    Delta(String),
    Done,
}

pub trait CompletionProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Stream a completion as `Delta` events followed by one `Done`.
    /// Returns `ChannelClosed` if the receiver goes away mid-stream.
    fn stream_chat<'a>(
        &'a self,
        request: CompletionRequest,
        tx: mpsc::Sender<CompletionEvent>,
    ) -> BoxFuture<'a, Result<(), LlmError>>;

    /// Single-shot completion. The default drains `stream_chat`.
    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, Result<String, LlmError>> {
        Box::pin(async move {
            let (tx, mut rx) = mpsc::channel(64);
            let collect = async {
                let mut text = String::new();
                while let Some(event) = rx.recv().await {
                    if let CompletionEvent::Delta(delta) = event {
                        text.push_str(&delta);
                    }
                }
                text
            };

            let (result, text) = tokio::join!(self.stream_chat(request, tx), collect);
            result?;

            if text.trim().is_empty() {
                return Err(LlmError::Empty);
            }
            Ok(text)
        })
    }
}
