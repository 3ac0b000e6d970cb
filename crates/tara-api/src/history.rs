use axum::{Extension, Json, extract::State, response::IntoResponse};

use tara_types::api::{ChatResponse, Claims};

use crate::chat::chat_response;
use crate::error::ApiError;
use crate::state::AppState;

/// The caller's chats, most recently active first.
pub async fn get_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub.to_string();
    let chats = state
        .blocking(move |db| db.get_chats_by_user_id(&user_id))
        .await?;

    let chats: Vec<ChatResponse> = chats.into_iter().map(chat_response).collect();
    Ok(Json(chats))
}
