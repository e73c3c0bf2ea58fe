use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
    Json,
};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::db::{
    actions, resource_types, LoginRequest, LoginResponse, Role, Session, User, UserResponse,
};
use crate::utils::{format_instant, timestamp};
use crate::{AppState, DbPool};

use super::activity::record_activity;
use super::error::ApiError;

/// Id of the synthetic user behind the configured admin token
pub const SYSTEM_USER_ID: &str = "system";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random session token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bearer token from the Authorization header
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("Authorization").and_then(|h| h.to_str().ok())?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn system_user() -> User {
    let now = timestamp();
    User {
        id: SYSTEM_USER_ID.to_string(),
        username: "system".to_string(),
        password_hash: String::new(),
        role: Role::Admin,
        permissions: "[]".to_string(),
        created_at: now.clone(),
        updated_at: now,
    }
}

/// Resolve a token to a user: the configured admin token or a live session
pub async fn get_current_user(state: &AppState, token: &str) -> Result<User, ApiError> {
    // Constant-time comparison against the admin token
    let admin_token = state.config.auth.admin_token.as_bytes();
    let provided = token.as_bytes();
    if admin_token.len() == provided.len() && bool::from(admin_token.ct_eq(provided)) {
        return Ok(system_user());
    }

    let session: Option<Session> =
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(hash_token(token))
            .bind(timestamp())
            .fetch_optional(&state.db)
            .await?;
    let session = session.ok_or_else(|| ApiError::unauthorized("Session expired or invalid"))?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&session.user_id)
        .fetch_optional(&state.db)
        .await?;

    user.ok_or_else(|| ApiError::unauthorized("Session expired or invalid"))
}

/// Reject non-admin users
pub fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin access required"))
    }
}

/// Auth middleware: resolves the caller and stores it in request extensions
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
    let user = get_current_user(&state, &token).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Extractor for the authenticated user
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>() {
            return Ok(user.clone());
        }
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
        get_current_user(state, &token).await
    }
}

/// Login endpoint
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(request.username.trim())
        .fetch_optional(&state.db)
        .await?;

    let user = match user {
        Some(user) if verify_password(&request.password, &user.password_hash) => user,
        _ => {
            tracing::info!(username = %request.username, "Failed login attempt");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    let token = generate_token();
    let now = chrono::Utc::now();
    let expires_at =
        format_instant(now + chrono::Duration::hours(state.config.auth.session_ttl_hours.max(1)));

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&user.id)
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(format_instant(now))
    .execute(&state.db)
    .await?;

    tracing::info!(username = %user.username, "User logged in");
    record_activity(
        &state,
        &user,
        &headers,
        actions::AUTH_LOGIN,
        resource_types::SESSION,
        None,
        None,
    )
    .await;

    Ok(Json(LoginResponse {
        token,
        user: UserResponse::from(user),
    }))
}

/// Logout endpoint, invalidates the presented session
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
) -> Result<axum::http::StatusCode, ApiError> {
    if let Some(token) = extract_token(&headers) {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(hash_token(&token))
            .execute(&state.db)
            .await?;
    }

    record_activity(
        &state,
        &user,
        &headers,
        actions::AUTH_LOGOUT,
        resource_types::SESSION,
        None,
        None,
    )
    .await;

    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// The authenticated user
///
/// GET /api/auth/me
pub async fn me(user: User) -> Json<UserResponse> {
    Json(UserResponse::from(user))
}

/// Create the bootstrap admin when the users table is empty
pub async fn ensure_admin_user(db: &DbPool, username: &str, password: &str) -> anyhow::Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(db)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let password_hash = hash_password(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    let now = timestamp();

    sqlx::query(
        "INSERT INTO users (id, username, password_hash, role, permissions, created_at, updated_at) VALUES (?, ?, ?, 'admin', '[]', ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(username)
    .bind(&password_hash)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::info!(username = %username, "Created bootstrap admin user");
    if password == "admin123" {
        tracing::warn!("Bootstrap admin uses the default password, change it after first login");
    }

    Ok(())
}

/// Drop sessions that can no longer be used
pub async fn purge_expired_sessions(db: &DbPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(timestamp())
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "plaintext"));
    }

    #[test]
    fn test_tokens_are_random_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert!(extract_token(&headers).is_none());
        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("abc123"));
        headers.insert("Authorization", "Bearer ".parse().unwrap());
        assert!(extract_token(&headers).is_none());
    }

    #[tokio::test]
    async fn test_ensure_admin_user_only_on_empty_db() {
        let db = crate::db::connect("sqlite::memory:").await.unwrap();
        ensure_admin_user(&db, "admin", "first-pass").await.unwrap();
        ensure_admin_user(&db, "other", "second-pass").await.unwrap();

        let users: Vec<User> = sqlx::query_as("SELECT * FROM users").fetch_all(&db).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "admin");
        assert_eq!(users[0].role, Role::Admin);
        assert!(verify_password("first-pass", &users[0].password_hash));
    }
}
