use std::sync::Arc;

use tracing::error;

use tara_db::Database;
use tara_db::context::ContextPolicy;
use tara_llm::{CompletionProvider, Persona};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

/// Account the assistant's messages are stored under.
#[derive(Debug, Clone)]
pub struct AssistantIdentity {
    pub email: String,
    pub display_name: String,
}

impl Default for AssistantIdentity {
    fn default() -> Self {
        Self {
            email: "ai@assistant.local".into(),
            display_name: "AI Assistant".into(),
        }
    }
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub provider: Arc<dyn CompletionProvider>,
    pub persona: Persona,
    pub context: ContextPolicy,
    pub assistant: AssistantIdentity,
}

impl AppStateInner {
    /// Run a blocking database call off the async runtime.
    pub async fn blocking<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> tara_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }
}
