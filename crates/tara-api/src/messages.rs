use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use tara_db::models::{MessageRow, ReactionRow, parse_ts};
use tara_db::queries::DEFAULT_MESSAGE_LIMIT;
use tara_types::api::{Claims, MessageQuery, MessageResponse, ReactionGroup};

use crate::chat::owned_chat;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_MESSAGE_LIMIT: u32 = 200;

/// One page of a chat's main conversation, annotated with reply counts and
/// grouped reactions.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    owned_chat(&state, &chat_id, claims.sub).await?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_MESSAGE_LIMIT)
        .clamp(1, MAX_MESSAGE_LIMIT);
    let before = query.before;

    let (rows, reaction_rows, counts) = state
        .blocking(move |db| {
            let rows = db.get_messages(&chat_id, limit, before.as_deref())?;

            let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let reaction_rows = db.get_reactions_for_messages(&message_ids)?;
            let counts = db.get_thread_counts_for_messages(&message_ids)?;

            Ok((rows, reaction_rows, counts))
        })
        .await?;

    let mut reactions = group_reactions(&reaction_rows);
    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .map(|row| {
            let reply_count = counts.get(&row.id).copied().unwrap_or(0);
            let groups = reactions.remove(&row.id).unwrap_or_default();
            message_response(row, reply_count, groups)
        })
        .collect();

    Ok(Json(messages))
}

/// Group reactions by message, then by emoji, keeping first-reaction order.
pub(crate) fn group_reactions(rows: &[ReactionRow]) -> HashMap<String, Vec<ReactionGroup>> {
    let mut grouped: HashMap<String, Vec<ReactionGroup>> = HashMap::new();
    for r in rows {
        let Ok(user_id) = r.user_id.parse::<Uuid>() else {
            warn!("Corrupt reaction user id '{}'", r.user_id);
            continue;
        };

        let groups = grouped.entry(r.message_id.clone()).or_default();
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(user_id);
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji.clone(),
                count: 1,
                user_ids: vec![user_id],
            }),
        }
    }
    grouped
}

pub(crate) fn message_response(
    row: MessageRow,
    reply_count: u64,
    reactions: Vec<ReactionGroup>,
) -> MessageResponse {
    MessageResponse {
        id: to_uuid(&row.id, "message"),
        sender_id: to_uuid(&row.sender_id, "sender"),
        parent_msg_id: row.parent_msg_id.as_deref().map(|p| to_uuid(p, "parent")),
        created_at: to_datetime(&row.created_at),
        chat_id: row.chat_id,
        role: row.role,
        body: row.body,
        files: row.files,
        reply_count,
        reactions,
    }
}

pub(crate) fn to_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn to_datetime(raw: &str) -> DateTime<Utc> {
    parse_ts(raw).unwrap_or_else(|| {
        warn!("Corrupt timestamp '{}'", raw);
        DateTime::<Utc>::default()
    })
}
