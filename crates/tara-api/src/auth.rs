use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::{error, info, warn};
use uuid::Uuid;

use tara_db::models::NewUser;
use tara_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use tara_types::models::Plan;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let display_name = req.display_name.trim().to_string();

    // Validate input
    if !email.contains('@') || email.len() > 254 {
        return Err(ApiError::BadRequest("invalid email".into()));
    }
    if display_name.is_empty() || display_name.chars().count() > 64 {
        return Err(ApiError::BadRequest("display name must be 1-64 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }
    if email.eq_ignore_ascii_case(state.assistant.email.trim()) {
        warn!("Refused registration with the assistant's email");
        return Err(ApiError::Conflict("email is reserved".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal
        })?
        .to_string();

    let new_user = NewUser {
        email: email.clone(),
        display_name,
        password_hash: Some(password_hash),
        avatar_url: req.avatar_url,
        is_bot: false,
    };
    // A taken email surfaces as a unique-constraint Conflict
    let user = state.blocking(move |db| db.create_user(&new_user)).await?;

    let user_id = parse_user_id(&user.id)?;
    let token = create_token(&state.jwt_secret, user_id, &email, user.plan).map_err(|e| {
        error!("Token signing failed: {}", e);
        ApiError::Internal
    })?;

    info!("Registered user {}", user_id);
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let user = state
        .blocking(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Bot accounts have no password and cannot log in
    let stored = user.password.as_deref().ok_or(ApiError::Unauthorized)?;
    let parsed_hash = PasswordHash::new(stored).map_err(|e| {
        error!("Stored password hash for {} is unreadable: {}", user.id, e);
        ApiError::Internal
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id = parse_user_id(&user.id)?;
    let token = create_token(&state.jwt_secret, user_id, &user.email, user.plan).map_err(|e| {
        error!("Token signing failed: {}", e);
        ApiError::Internal
    })?;

    Ok(Json(LoginResponse {
        user_id,
        email: user.email,
        display_name: user.display_name,
        plan: user.plan,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str, plan: Plan) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        plan,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|e| {
        error!("Corrupt user id '{}': {}", raw, e);
        ApiError::Internal
    })
}
