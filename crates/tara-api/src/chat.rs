use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tara_db::context::TurnTarget;
use tara_db::models::{ChatRow, NewMessage};
use tara_llm::{CompletionEvent, CompletionRequest, PromptMessage, PromptRole, clean_title};
use tara_types::api::{ChatIdQuery, ChatResponse, Claims, RenameChatRequest, SubmitTurnRequest};
use tara_types::events::TurnEvent;

use crate::error::ApiError;
use crate::messages::{to_datetime, to_uuid};
use crate::state::AppState;

const STREAM_BUFFER: usize = 32;
const TITLE_MAX_TOKENS: u32 = 24;
const TITLE_TEMPERATURE: f32 = 0.3;

/// Submit one conversational turn and stream the assistant's reply back as
/// server-sent events.
///
/// Without `parentMessageId` the turn goes to the main conversation keyed by
/// `id`, creating the chat on first use. With it the turn is a reply-thread
/// message under that parent, inside the chat named by `mainChatId`.
pub async fn submit_turn(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitTurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let input = req
        .latest_user_input()
        .ok_or_else(|| ApiError::BadRequest("no user message to answer".into()))?
        .to_string();
    let user_id = claims.sub.to_string();

    let parent_id = req
        .parent_message_id
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let (chat, created, target) = match parent_id {
        None => {
            let chat_id = req.id.trim().to_string();
            if chat_id.is_empty() {
                return Err(ApiError::BadRequest("chat id is required".into()));
            }

            let assistant = state.assistant.clone();
            let owner = user_id.clone();
            let (chat, created) = state
                .blocking(move |db| {
                    let bot = db.ensure_assistant_user(&assistant.email, &assistant.display_name)?;
                    db.upsert_chat(&chat_id, &owner, &bot.id, None)
                })
                .await?;

            if chat.user_id != user_id {
                warn!("User {} submitted a turn to chat {} they do not own", user_id, chat.id);
                return Err(ApiError::Unauthorized);
            }
            if created {
                info!("Created chat {} for user {}", chat.id, user_id);
            }
            (chat, created, TurnTarget::Main)
        }
        Some(parent_id) => {
            let chat_id = req
                .main_chat_id
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| ApiError::BadRequest("mainChatId is required for thread replies".into()))?;

            let chat = owned_chat(&state, chat_id, claims.sub).await?;
            (chat, false, TurnTarget::Thread { parent_id })
        }
    };

    // Context is read before the new input is stored so it appears exactly once
    let policy = state.context;
    let new_message = NewMessage {
        chat_id: chat.id.clone(),
        sender_id: user_id,
        parent_msg_id: match &target {
            TurnTarget::Main => None,
            TurnTarget::Thread { parent_id } => Some(parent_id.clone()),
        },
        body: input.clone(),
        files: req.files,
    };
    let turn_target = target.clone();
    let (context, user_message) = state
        .blocking(move |db| {
            let context = db.assemble_context(&new_message.chat_id, &turn_target, &new_message.body, policy)?;
            let stored = db.create_message(&new_message)?;
            Ok((context, stored))
        })
        .await?;

    let threaded = matches!(target, TurnTarget::Thread { .. });
    let request = CompletionRequest {
        system: Some(state.persona.system_prompt(threaded, chrono::Utc::now().date_naive())),
        messages: context
            .into_iter()
            .map(|entry| PromptMessage::new(entry.role, entry.content))
            .collect(),
        ..Default::default()
    };
    debug!(
        "Turn in chat {} ({} context messages, threaded: {})",
        chat.id,
        request.messages.len(),
        threaded
    );

    let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
    let provider = state.provider.clone();
    let producer = tokio::spawn(async move { provider.stream_chat(request, tx).await });

    let start = TurnEvent::Start {
        chat_id: chat.id.clone(),
        user_message_id: to_uuid(&user_message.id, "message"),
        parent_msg_id: user_message.parent_msg_id.as_deref().map(|p| to_uuid(p, "parent")),
    };

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(sse_event(&start));

        let mut reply = String::new();
        let mut finished = false;
        while let Some(event) = rx.recv().await {
            match event {
                CompletionEvent::Delta(text) => {
                    reply.push_str(&text);
                    yield Ok(sse_event(&TurnEvent::Delta { text }));
                }
                CompletionEvent::Done => {
                    finished = true;
                    break;
                }
            }
        }

        let outcome = match producer.await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(message) = outcome {
            error!("Completion for chat {} failed: {}", chat.id, message);
            yield Ok(sse_event(&TurnEvent::Error { message: "the model provider failed to respond".into() }));
            return;
        }
        if !finished || reply.trim().is_empty() {
            warn!("Completion for chat {} produced no reply", chat.id);
            yield Ok(sse_event(&TurnEvent::Error { message: "the model returned an empty reply".into() }));
            return;
        }

        let message_id = persist_reply(&state, &chat, user_message.parent_msg_id.clone(), reply.clone()).await;
        yield Ok(sse_event(&TurnEvent::Done { message_id }));

        if created {
            tokio::spawn(generate_title(state.clone(), chat.id.clone(), input.clone(), reply));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Store the assistant's reply. Failures are logged and reported as a missing id.
async fn persist_reply(
    state: &AppState,
    chat: &ChatRow,
    parent_msg_id: Option<String>,
    body: String,
) -> Option<Uuid> {
    let new_message = NewMessage {
        chat_id: chat.id.clone(),
        sender_id: chat.assistant_id.clone(),
        parent_msg_id,
        body,
        files: vec![],
    };

    match state.blocking(move |db| db.create_message(&new_message)).await {
        Ok(row) => Some(to_uuid(&row.id, "message")),
        Err(e) => {
            error!("Failed to store assistant reply in chat {}: {}", chat.id, e);
            None
        }
    }
}

/// Ask the model for a short title summarising the first exchange.
async fn generate_title(state: AppState, chat_id: String, user_text: String, assistant_text: String) {
    let request = CompletionRequest {
        messages: vec![PromptMessage::new(
            PromptRole::User,
            state.persona.title_prompt(&user_text, &assistant_text),
        )],
        max_tokens: Some(TITLE_MAX_TOKENS),
        temperature: Some(TITLE_TEMPERATURE),
        ..Default::default()
    };

    let raw = match state.provider.complete(request).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Title generation for chat {} failed: {}", chat_id, e);
            return;
        }
    };
    let Some(title) = clean_title(&raw) else {
        warn!("Title generation for chat {} returned nothing usable", chat_id);
        return;
    };

    let id = chat_id.clone();
    match state.blocking(move |db| db.rename_chat(&id, &title)).await {
        Ok(true) => debug!("Titled chat {}", chat_id),
        // Deleted while the title was being generated
        Ok(false) => debug!("Chat {} vanished before it could be titled", chat_id),
        Err(e) => error!("Failed to store title for chat {}: {}", chat_id, e),
    }
}

pub async fn rename_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RenameChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() || title.chars().count() > 200 {
        return Err(ApiError::BadRequest("title must be 1-200 characters".into()));
    }

    let chat = owned_chat(&state, &req.id, claims.sub).await?;

    let id = chat.id.clone();
    let renamed = state
        .blocking(move |db| {
            db.rename_chat(&id, &title)?;
            db.get_chat_by_id(&id)
        })
        .await?
        .ok_or(ApiError::NotFound("chat"))?;

    Ok(Json(chat_response(renamed)))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ChatIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing chat id".into()))?;

    let chat = owned_chat(&state, &id, claims.sub).await?;

    let deleted = state.blocking(move |db| db.delete_chat_by_id(&chat.id)).await?;
    if !deleted {
        return Err(ApiError::NotFound("chat"));
    }

    info!("User {} deleted chat {}", claims.sub, id);
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = owned_chat(&state, &id, claims.sub).await?;
    Ok(Json(chat_response(chat)))
}

/// Load a chat and check that `user` owns it.
pub(crate) async fn owned_chat(state: &AppState, chat_id: &str, user: Uuid) -> Result<ChatRow, ApiError> {
    let id = chat_id.to_string();
    let chat = state
        .blocking(move |db| db.get_chat_by_id(&id))
        .await?
        .ok_or(ApiError::NotFound("chat"))?;

    if chat.user_id != user.to_string() {
        return Err(ApiError::Unauthorized);
    }
    Ok(chat)
}

pub(crate) fn chat_response(row: ChatRow) -> ChatResponse {
    ChatResponse {
        user_id: to_uuid(&row.user_id, "user"),
        last_msg_at: to_datetime(&row.last_msg_at),
        created_at: to_datetime(&row.created_at),
        id: row.id,
        title: row.title,
    }
}

fn sse_event(event: &TurnEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            error!("Failed to encode turn event: {}", e);
            Event::default().event("error").data("encoding failure")
        })
}
