use std::net::SocketAddr;

use anyhow::{Context, bail};

use tara_db::context::{ContextPolicy, DEFAULT_THREAD_WINDOW};
use tara_llm::DisplayMode;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub display_mode: DisplayMode,
    pub context: ContextPolicy,
    pub assistant_email: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{key} must be set"));

        let database_url = required("TARA_DATABASE_URL")?;

        let jwt_secret = get("TARA_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TARA_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("TARA_PORT") {
            Some(raw) => raw.parse::<u16>().with_context(|| format!("invalid TARA_PORT '{raw}'"))?,
            None => 3000,
        };

        let display_mode = match get("TARA_MODEL_DISPLAY_MODE") {
            Some(raw) => raw.parse::<DisplayMode>().context("invalid TARA_MODEL_DISPLAY_MODE")?,
            None => DisplayMode::default(),
        };

        // 0 lifts the bound on main-conversation history in threads
        let thread_window = match get("TARA_THREAD_CONTEXT_WINDOW") {
            Some(raw) => match raw
                .parse::<usize>()
                .with_context(|| format!("invalid TARA_THREAD_CONTEXT_WINDOW '{raw}'"))?
            {
                0 => None,
                n => Some(n),
            },
            None => Some(DEFAULT_THREAD_WINDOW),
        };

        Ok(Self {
            database_url,
            jwt_secret,
            host: get("TARA_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            llm_base_url: get("TARA_LLM_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".into()),
            llm_api_key: required("TARA_LLM_API_KEY")?,
            llm_model: get("TARA_LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            display_mode,
            context: ContextPolicy { thread_window },
            assistant_email: get("TARA_ASSISTANT_EMAIL").unwrap_or_else(|| "ai@assistant.local".into()),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
