mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use tara_api::{AppState, AppStateInner, AssistantIdentity};
use tara_db::ConnectionManager;
use tara_llm::{CompletionProvider, OpenAiCompatible, Persona};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tara=debug,tara_api=debug,tara_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let connections = ConnectionManager::new(Some(config.database_url.clone()));
    let db = connections.ensure_connection().await?;

    let provider: Arc<dyn CompletionProvider> = Arc::new(OpenAiCompatible::new(
        &config.llm_base_url,
        &config.llm_api_key,
        &config.llm_model,
    ));
    let persona = Persona::new(config.display_mode);
    info!(
        "Using model {} ({}) at {}, display mode {}",
        config.llm_model,
        persona.display_name(&config.llm_model),
        config.llm_base_url,
        persona.mode()
    );

    let assistant = AssistantIdentity {
        email: config.assistant_email.clone(),
        ..Default::default()
    };

    // Claim the assistant identity before any registration can take its email
    let bot = {
        let db = db.clone();
        let identity = assistant.clone();
        tokio::task::spawn_blocking(move || db.ensure_assistant_user(&identity.email, &identity.display_name))
            .await??
    };
    info!("Assistant identity {} ({})", bot.email, bot.id);

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        provider,
        persona,
        context: config.context,
        assistant,
    });

    let app = tara_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Tara server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Handlers dropped their state clones with the server
    if let Err(e) = connections.shutdown().await {
        error!("Failed to close database cleanly: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
