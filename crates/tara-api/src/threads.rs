use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};

use tara_db::models::MessageRow;
use tara_types::api::{Claims, ThreadCountResponse, ThreadListResponse, ThreadMessage, ThreadQuery};

use crate::chat::owned_chat;
use crate::error::ApiError;
use crate::messages::to_uuid;
use crate::state::AppState;

/// Replies under a top-level message, oldest first.
pub async fn list_threads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ThreadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let parent = thread_parent(&state, &claims, query).await?;

    let replies = state
        .blocking(move |db| db.get_thread_messages(&parent.id))
        .await?;

    let threads = replies
        .into_iter()
        .map(|row| ThreadMessage {
            id: to_uuid(&row.id, "message"),
            role: row.role,
            content: row.body,
        })
        .collect();

    Ok(Json(ThreadListResponse { threads }))
}

pub async fn count_threads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ThreadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let parent = thread_parent(&state, &claims, query).await?;

    let count = state
        .blocking(move |db| db.get_thread_count_by_parent_message(&parent.id))
        .await?;

    Ok(Json(ThreadCountResponse { count }))
}

/// Resolve the query to a top-level message in a chat the caller owns.
async fn thread_parent(
    state: &AppState,
    claims: &Claims,
    query: ThreadQuery,
) -> Result<MessageRow, ApiError> {
    let (Some(parent_id), Some(chat_id)) = (
        query.parent_message_id.filter(|p| !p.trim().is_empty()),
        query.main_chat_id.filter(|c| !c.trim().is_empty()),
    ) else {
        return Err(ApiError::BadRequest("parentMessageId and mainChatId are required".into()));
    };

    let chat = owned_chat(state, &chat_id, claims.sub).await?;

    let parent = state
        .blocking(move |db| db.get_message_by_id(&parent_id))
        .await?
        .ok_or(ApiError::NotFound("parent message"))?;

    if parent.chat_id != chat.id || !parent.is_top_level() {
        return Err(ApiError::NotFound("parent message"));
    }
    Ok(parent)
}
