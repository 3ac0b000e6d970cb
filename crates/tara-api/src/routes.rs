use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, chat, history, messages, reactions, threads};

/// Every HTTP route, with bearer auth on everything under `/api`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/api/chat",
            post(chat::submit_turn)
                .put(chat::rename_chat)
                .delete(chat::delete_chat),
        )
        .route("/api/chat/{id}", get(chat::get_chat))
        .route("/api/chat/{id}/messages", get(messages::get_messages))
        .route(
            "/api/chat/{id}/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .route("/api/history", get(history::get_history))
        .route("/api/threads", get(threads::list_threads))
        .route("/api/threads/count", get(threads::count_threads))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> &'static str {
    "ok"
}
