use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::debug;

use tara_types::api::{Claims, ToggleReactionRequest};

use crate::chat::owned_chat;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() || emoji.chars().count() > 16 {
        return Err(ApiError::BadRequest("invalid emoji".into()));
    }

    owned_chat(&state, &chat_id, claims.sub).await?;

    let user_id = claims.sub.to_string();
    let added = state
        .blocking(move |db| {
            match db.get_message_by_id(&message_id)? {
                Some(message) if message.chat_id == chat_id => {}
                _ => return Err(tara_db::DbError::NotFound("message")),
            }
            db.toggle_reaction(&message_id, &user_id, &emoji)
        })
        .await?;

    debug!("User {} toggled a reaction (added: {})", claims.sub, added);
    Ok(Json(serde_json::json!({ "added": added })))
}
