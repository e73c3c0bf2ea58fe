//! Staff account management. Admin only.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    actions, resource_types, serialize_permissions, CreateUserRequest, Role, UpdateUserRequest,
    User, UserResponse,
};
use crate::utils::timestamp;
use crate::AppState;

use super::activity::record_activity;
use super::auth::{hash_password, require_admin};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_password, validate_permissions, validate_username};

async fn admin_count(state: &AppState) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin'")
        .fetch_one(&state.db)
        .await
}

fn hash(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        ApiError::internal("Failed to hash password")
    })
}

/// List staff accounts
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    require_admin(&user)?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY username")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Create a staff account
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    require_admin(&user)?;

    let username = req.username.trim().to_string();
    let mut errors = ValidationErrorBuilder::new();
    errors.check("username", validate_username(&username));
    errors.check("password", validate_password(&req.password));
    errors.check("permissions", validate_permissions(&req.permissions));
    errors.finish()?;

    let now = timestamp();
    let created = User {
        id: Uuid::new_v4().to_string(),
        username,
        password_hash: hash(&req.password)?,
        role: req.role,
        permissions: serialize_permissions(&req.permissions),
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO users (id, username, password_hash, role, permissions, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&created.id)
    .bind(&created.username)
    .bind(&created.password_hash)
    .bind(created.role)
    .bind(&created.permissions)
    .bind(&created.created_at)
    .bind(&created.updated_at)
    .execute(&state.db)
    .await?;

    tracing::info!(username = %created.username, role = %created.role, "Staff user created");
    record_activity(
        &state,
        &user,
        &headers,
        actions::USER_CREATE,
        resource_types::USER,
        Some(&created.id),
        Some(serde_json::json!({ "username": created.username, "role": created.role })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Update a staff account; the password is re-hashed when supplied
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    require_admin(&user)?;

    let existing = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let username = req.username.as_deref().map(str::trim);
    let mut errors = ValidationErrorBuilder::new();
    if let Some(username) = username {
        errors.check("username", validate_username(username));
    }
    if let Some(ref password) = req.password {
        errors.check("password", validate_password(password));
    }
    if let Some(ref permissions) = req.permissions {
        errors.check("permissions", validate_permissions(permissions));
    }
    errors.finish()?;

    if existing.role == Role::Admin
        && req.role == Some(Role::Mentor)
        && admin_count(&state).await? <= 1
    {
        return Err(ApiError::conflict("Cannot demote the last admin"));
    }

    let password_hash = match req.password {
        Some(ref password) => hash(password)?,
        None => existing.password_hash.clone(),
    };

    let updated = User {
        username: username.map(str::to_string).unwrap_or(existing.username.clone()),
        password_hash,
        role: req.role.unwrap_or(existing.role),
        permissions: req
            .permissions
            .as_deref()
            .map(serialize_permissions)
            .unwrap_or(existing.permissions.clone()),
        updated_at: timestamp(),
        ..existing
    };

    sqlx::query(
        r#"
        UPDATE users SET username = ?, password_hash = ?, role = ?, permissions = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&updated.username)
    .bind(&updated.password_hash)
    .bind(updated.role)
    .bind(&updated.permissions)
    .bind(&updated.updated_at)
    .bind(&id)
    .execute(&state.db)
    .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::USER_UPDATE,
        resource_types::USER,
        Some(&id),
        Some(serde_json::json!({
            "username": updated.username,
            "password_changed": req.password.is_some(),
        })),
    )
    .await;

    Ok(Json(updated.into()))
}

/// Delete a staff account and its sessions
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(&user)?;

    if id == user.id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let existing = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if existing.is_admin() && admin_count(&state).await? <= 1 {
        return Err(ApiError::conflict("Cannot delete the last admin"));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(username = %existing.username, "Staff user deleted");
    record_activity(
        &state,
        &user,
        &headers,
        actions::USER_DELETE,
        resource_types::USER,
        Some(&id),
        Some(serde_json::json!({ "username": existing.username })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
