mod activity;
pub mod auth;
pub mod error;
mod fines;
mod leaves;
mod passes;
mod phone;
pub mod rate_limit;
pub mod student_cache;
mod students;
mod tallies;
mod users;
mod validation;

#[cfg(test)]
mod tests;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Login is public but rate limited per client IP
    let login_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_login,
        ));

    // Protected API routes
    let api_routes = Router::new()
        // Session
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        // Staff users
        .route("/users", get(users::list_users))
        .route("/users", post(users::create_user))
        .route("/users/:id", put(users::update_user))
        .route("/users/:id", delete(users::delete_user))
        // Students
        .route("/students", get(students::list_students))
        .route("/students", post(students::create_student))
        .route("/students/bulk", post(students::bulk_create_students))
        .route("/students/:id", get(students::get_student))
        .route("/students/:id", put(students::update_student))
        .route("/students/:id", delete(students::delete_student))
        // Passes
        .route("/passes", get(passes::list_passes))
        .route("/passes", post(passes::issue_pass))
        .route("/passes/:id", get(passes::get_pass))
        .route("/passes/:id/out", post(passes::check_out_pass))
        .route("/passes/:id/return", post(passes::return_pass))
        .route("/passes/:id/cancel", post(passes::cancel_pass))
        // Phone custody
        .route("/phone-status", get(phone::list_phone_status))
        .route("/phone-history", get(phone::list_phone_history))
        // Fines
        .route("/fines", get(fines::list_fines))
        .route("/fines", post(fines::create_fine))
        .route("/fines/:id", put(fines::update_fine))
        .route("/fines/:id", delete(fines::delete_fine))
        .route("/fines/:id/issue", post(fines::issue_fine))
        .route("/student-fines", get(fines::list_student_fines))
        .route("/student-fines/:id", patch(fines::update_student_fine))
        .route("/student-fines/:id", delete(fines::delete_student_fine))
        // Tallies
        .route("/tally-types", get(tallies::list_tally_types))
        .route("/tally-types", post(tallies::create_tally_type))
        .route("/tally-types/:id", put(tallies::update_tally_type))
        .route("/tally-types/:id", delete(tallies::delete_tally_type))
        .route("/tally-types/:id/issue", post(tallies::issue_tally))
        .route("/tallies", get(tallies::list_tallies))
        .route("/tallies/summary", get(tallies::tally_summary))
        .route("/tallies/:id", delete(tallies::delete_tally))
        // Monthly leaves
        .route("/monthly-leaves", get(leaves::list_leaves))
        .route("/monthly-leaves", post(leaves::create_leave))
        .route("/monthly-leaves/run", post(leaves::run_activator))
        .route("/monthly-leaves/activator", get(leaves::activator_status))
        .route("/monthly-leaves/:id", get(leaves::get_leave))
        .route("/monthly-leaves/:id", put(leaves::update_leave))
        .route("/monthly-leaves/:id", delete(leaves::delete_leave))
        .route("/monthly-leaves/:id/exclusions", post(leaves::add_exclusions))
        .route(
            "/monthly-leaves/:id/exclusions/:student_id",
            delete(leaves::remove_exclusion),
        )
        // Activity log
        .route("/activity-logs", get(activity::list_logs))
        // Protected by auth
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", login_routes.merge(api_routes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
