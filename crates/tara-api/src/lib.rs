pub mod auth;
pub mod chat;
pub mod error;
pub mod history;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod routes;
pub mod state;
pub mod threads;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner, AssistantIdentity};
