use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::allocations::{free_capacity, load_on};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::allocation::AllocationRow;
use crate::models::skill::UserSkillDetail;
use crate::models::user::{Availability, Role, UserRow};
use crate::skills::user_skill_details;
use crate::state::AppState;
use crate::users::{get_user, is_in_management_chain};

const DIRECTORY_ROLES: &[Role] = &[Role::Pm, Role::LineManager, Role::Hr];

#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: UserRow,
    pub skills: Vec<UserSkillDetail>,
    pub current_load: i32,
    pub free_capacity: i32,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub department: Option<String>,
    pub role: Option<Role>,
    pub availability: Option<Availability>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub manager_id: Option<Uuid>,
    #[serde(default)]
    pub clear_manager: bool,
    #[serde(default)]
    pub clear_department: bool,
    #[serde(default)]
    pub clear_job_title: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

/// GET /api/v1/users/me
pub async fn handle_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserProfile>, AppError> {
    let profile = load_profile(&state, auth.user).await?;
    Ok(Json(profile))
}

/// GET /api/v1/users
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<ListUsersQuery>,
) -> Result<Json<Vec<UserRow>>, AppError> {
    auth.require_any(DIRECTORY_ROLES)?;

    let rows = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT * FROM users
        WHERE ($1::text IS NULL OR department = $1)
          AND ($2::text IS NULL OR role = $2)
          AND ($3::text IS NULL OR availability = $3)
        ORDER BY name
        "#,
    )
    .bind(params.department.as_deref())
    .bind(params.role.map(|r| r.as_str()))
    .bind(params.availability.map(|a| a.as_str()))
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

/// GET /api/v1/users/:id
pub async fn handle_get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserProfile>, AppError> {
    auth.require_self_or_any(id, DIRECTORY_ROLES)?;
    let mut conn = state.db.acquire().await?;
    let user = get_user(&mut conn, id).await?;
    drop(conn);
    Ok(Json(load_profile(&state, user).await?))
}

/// PATCH /api/v1/users/:id
pub async fn handle_update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserRow>, AppError> {
    auth.require_any(&[Role::Hr])?;

    let mut tx = state.db.begin().await?;
    let user = get_user(&mut tx, id).await?;

    let manager_id = if req.clear_manager {
        None
    } else if let Some(manager_id) = req.manager_id {
        if manager_id == id {
            return Err(AppError::Validation(
                "a user cannot be their own manager".to_string(),
            ));
        }
        get_user(&mut tx, manager_id).await?;
        if is_in_management_chain(&mut tx, manager_id, id).await? {
            return Err(AppError::Validation(format!(
                "user {manager_id} reports to {id}; assignment would create a cycle"
            )));
        }
        Some(manager_id)
    } else {
        user.manager_id
    };

    let updated = sqlx::query_as::<_, UserRow>(
        r#"
        UPDATE users
        SET department = $1, job_title = $2, manager_id = $3, updated_at = now()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(patched_text(
        req.clear_department,
        req.department.as_deref(),
        user.department.as_deref(),
    ))
    .bind(patched_text(
        req.clear_job_title,
        req.job_title.as_deref(),
        user.job_title.as_deref(),
    ))
    .bind(manager_id)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Json(updated))
}

/// PATCH /api/v1/users/:id/role
pub async fn handle_update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<UserRow>, AppError> {
    auth.require_any(&[Role::Hr])?;

    let mut tx = state.db.begin().await?;
    let user = get_user(&mut tx, id).await?;
    check_role_change(&auth, user.role(), req.role)?;

    let updated = sqlx::query_as::<_, UserRow>(
        "UPDATE users SET role = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(req.role.as_str())
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(
        "User {} role changed from {} to {} by {}",
        id,
        user.role,
        updated.role,
        auth.id()
    );
    Ok(Json(updated))
}

/// GET /api/v1/users/:id/reports
pub async fn handle_reports(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<UserRow>>, AppError> {
    auth.require_self_or_any(id, &[Role::Hr])?;
    let rows = direct_reports(&state.db, id).await?;
    Ok(Json(rows))
}

pub async fn direct_reports(pool: &sqlx::PgPool, manager_id: Uuid) -> Result<Vec<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE manager_id = $1 ORDER BY name")
        .bind(manager_id)
        .fetch_all(pool)
        .await
}

async fn load_profile(state: &AppState, user: UserRow) -> Result<UserProfile, AppError> {
    let mut conn = state.db.acquire().await?;
    let skills = user_skill_details(&mut conn, &[user.id]).await?;

    let today = Utc::now().date_naive();
    let active = sqlx::query_as::<_, AllocationRow>(
        "SELECT * FROM allocations WHERE user_id = $1 AND start_date <= $2 AND end_date >= $2",
    )
    .bind(user.id)
    .bind(today)
    .fetch_all(&mut *conn)
    .await?;
    let current_load = load_on(&active, today);

    Ok(UserProfile {
        user,
        skills,
        current_load,
        free_capacity: free_capacity(current_load),
    })
}

/// Only admins may grant or revoke the admin role.
fn check_role_change(actor: &AuthUser, current: Role, next: Role) -> Result<(), AppError> {
    if (current == Role::Admin || next == Role::Admin) && !actor.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// A clear flag wins; otherwise a non-blank value replaces the existing one.
fn patched_text<'a>(clear: bool, value: Option<&'a str>, existing: Option<&'a str>) -> Option<&'a str> {
    if clear {
        None
    } else {
        non_blank(value).or(existing)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
