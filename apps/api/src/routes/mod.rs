pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post, put},
    Router,
};

use crate::state::AppState;
use crate::uploads::MAX_UPLOAD_BYTES;
use crate::{
    allocations, auth, cv, dashboard, notifications, projects, recommendations,
    resource_requests, skills, users, work_requests,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Session
        .route("/api/v1/auth/session", post(auth::handlers::handle_sign_in))
        // Users
        .route("/api/v1/users", get(users::handlers::handle_list))
        .route("/api/v1/users/me", get(users::handlers::handle_me))
        .route(
            "/api/v1/users/:id",
            get(users::handlers::handle_get).patch(users::handlers::handle_update),
        )
        .route(
            "/api/v1/users/:id/role",
            patch(users::handlers::handle_update_role),
        )
        .route(
            "/api/v1/users/:id/reports",
            get(users::handlers::handle_reports),
        )
        .route(
            "/api/v1/users/:id/skills",
            get(skills::handlers::handle_list_user_skills),
        )
        .route(
            "/api/v1/users/:id/recommendations",
            get(recommendations::handlers::handle_for_user),
        )
        .route(
            "/api/v1/users/me/skills/:skill_id",
            put(skills::handlers::handle_upsert_my_skill)
                .delete(skills::handlers::handle_remove_my_skill),
        )
        .route(
            "/api/v1/users/me/skills/:skill_id/proofs",
            post(skills::handlers::handle_upload_proof)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        // Skill taxonomy
        .route(
            "/api/v1/skills",
            get(skills::handlers::handle_search).post(skills::handlers::handle_create),
        )
        .route(
            "/api/v1/skills/distribution",
            get(skills::handlers::handle_distribution),
        )
        .route(
            "/api/v1/skills/:id",
            patch(skills::handlers::handle_update).delete(skills::handlers::handle_delete),
        )
        // Projects
        .route(
            "/api/v1/projects",
            get(projects::handlers::handle_list).post(projects::handlers::handle_create),
        )
        .route(
            "/api/v1/projects/:id",
            get(projects::handlers::handle_get).patch(projects::handlers::handle_update),
        )
        .route(
            "/api/v1/projects/:id/skills",
            put(projects::handlers::handle_replace_skills),
        )
        .route(
            "/api/v1/projects/:id/recommendations",
            get(recommendations::handlers::handle_for_project),
        )
        // Allocations
        .route(
            "/api/v1/allocations",
            get(allocations::handlers::handle_list).post(allocations::handlers::handle_create),
        )
        .route(
            "/api/v1/allocations/:id",
            delete(allocations::handlers::handle_end),
        )
        // Resource requests
        .route(
            "/api/v1/resource-requests",
            get(resource_requests::handlers::handle_list)
                .post(resource_requests::handlers::handle_create),
        )
        .route(
            "/api/v1/resource-requests/:id",
            get(resource_requests::handlers::handle_get),
        )
        .route(
            "/api/v1/resource-requests/:id/lm-decision",
            post(resource_requests::handlers::handle_lm_decision),
        )
        .route(
            "/api/v1/resource-requests/:id/hr-decision",
            post(resource_requests::handlers::handle_hr_decision),
        )
        .route(
            "/api/v1/resource-requests/:id/cancel",
            post(resource_requests::handlers::handle_cancel),
        )
        // Work requests (leave / overtime)
        .route(
            "/api/v1/work-requests",
            get(work_requests::handlers::handle_list).post(work_requests::handlers::handle_create),
        )
        .route(
            "/api/v1/work-requests/:id/decision",
            post(work_requests::handlers::handle_decision),
        )
        .route(
            "/api/v1/work-requests/:id/cancel",
            post(work_requests::handlers::handle_cancel),
        )
        // Notifications
        .route(
            "/api/v1/notifications",
            get(notifications::handlers::handle_list),
        )
        .route(
            "/api/v1/notifications/unread-count",
            get(notifications::handlers::handle_unread_count),
        )
        .route(
            "/api/v1/notifications/read-all",
            post(notifications::handlers::handle_mark_all_read),
        )
        .route(
            "/api/v1/notifications/:id/read",
            post(notifications::handlers::handle_mark_read),
        )
        // CV
        .route(
            "/api/v1/cv",
            post(cv::handlers::handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/v1/cv/latest", get(cv::handlers::handle_latest))
        .route("/api/v1/cv/confirm", post(cv::handlers::handle_confirm))
        // Dashboards
        .route(
            "/api/v1/dashboard/employee",
            get(dashboard::handlers::handle_employee),
        )
        .route("/api/v1/dashboard/pm", get(dashboard::handlers::handle_pm))
        .route(
            "/api/v1/dashboard/manager",
            get(dashboard::handlers::handle_manager),
        )
        .route("/api/v1/dashboard/hr", get(dashboard::handlers::handle_hr))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support;
