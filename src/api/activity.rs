//! Staff activity log API endpoints and helpers.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use crate::db::{
    list_activity_logs, log_activity, ActivityLogListResponse, ActivityLogQuery, Actor, User,
};
use crate::AppState;

use super::auth::require_admin;
use super::error::ApiError;

/// Client IP address from reverse proxy headers
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    // X-Forwarded-For is a comma-separated list, first is the client
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first_ip) = forwarded.split(',').next() {
            let ip = first_ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Record an activity entry for `user`. Failures are logged, never returned.
pub async fn record_activity(
    state: &AppState,
    user: &User,
    headers: &HeaderMap,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    details: Option<serde_json::Value>,
) {
    let ip = extract_client_ip(headers);
    let actor = Actor {
        user_id: Some(&user.id),
        username: Some(&user.username),
        ip_address: ip.as_deref(),
    };

    if let Err(e) = log_activity(&state.db, actor, action, resource_type, resource_id, details).await {
        tracing::warn!(
            action = action,
            resource_type = resource_type,
            error = %e,
            "Failed to record activity"
        );
    }
}

/// List activity logs with filtering and pagination
///
/// GET /api/activity-logs
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<ActivityLogQuery>,
) -> Result<Json<ActivityLogListResponse>, ApiError> {
    require_admin(&user)?;
    let result = list_activity_logs(&state.db, &query).await?;
    Ok(Json(result))
}
