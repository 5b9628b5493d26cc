use std::collections::HashMap;

use axum::{extract::State, Json};
use chrono::Utc;
use uuid::Uuid;

use crate::allocations::{allocations_active_on, loads_by_user};
use crate::auth::AuthUser;
use crate::dashboard::{
    build_employee_dashboard, build_hr_dashboard, build_manager_dashboard, build_pm_dashboard,
    EmployeeCounts, EmployeeDashboard, HrDashboard, ManagerDashboard, PmDashboard,
};
use crate::errors::AppError;
use crate::models::allocation::AllocationRow;
use crate::models::project::ProjectRow;
use crate::models::user::{Role, UserRow};
use crate::notifications::handlers::unread_count;
use crate::projects::required_skills;
use crate::skills::{aggregate_distribution, all_skills, user_skill_details};
use crate::state::AppState;
use crate::users::handlers::direct_reports;

/// GET /api/v1/dashboard/employee
pub async fn handle_employee(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<EmployeeDashboard>, AppError> {
    let today = Utc::now().date_naive();
    let mut conn = state.db.acquire().await?;

    let allocations = sqlx::query_as::<_, AllocationRow>(
        "SELECT * FROM allocations WHERE user_id = $1 AND start_date <= $2 AND end_date >= $2",
    )
    .bind(auth.id())
    .bind(today)
    .fetch_all(&mut *conn)
    .await?;
    let project_ids: Vec<Uuid> = allocations.iter().map(|a| a.project_id).collect();
    let project_names: HashMap<Uuid, String> =
        sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM projects WHERE id = ANY($1)")
            .bind(&project_ids)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    let skills = user_skill_details(&mut conn, &[auth.id()]).await?;
    let pending_work_requests: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM work_requests WHERE user_id = $1 AND status = 'pending_lm'",
    )
    .bind(auth.id())
    .fetch_one(&mut *conn)
    .await?;
    drop(conn);
    let unread_notifications = unread_count(&state.db, auth.id()).await?;

    Ok(Json(build_employee_dashboard(
        &allocations,
        &project_names,
        &skills,
        EmployeeCounts {
            pending_work_requests,
            unread_notifications,
        },
        today,
    )))
}

/// GET /api/v1/dashboard/pm
pub async fn handle_pm(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<PmDashboard>, AppError> {
    auth.require_any(&[Role::Pm])?;
    let today = Utc::now().date_naive();
    let mut conn = state.db.acquire().await?;

    let projects = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT * FROM projects
        WHERE pm_id = $1 AND status NOT IN ('completed', 'cancelled')
        ORDER BY start_date, name
        "#,
    )
    .bind(auth.id())
    .fetch_all(&mut *conn)
    .await?;
    let ids: Vec<Uuid> = projects.iter().map(|p| p.id).collect();

    let allocations = sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT * FROM allocations
        WHERE project_id = ANY($1) AND start_date <= $2 AND end_date >= $2
        "#,
    )
    .bind(&ids)
    .bind(today)
    .fetch_all(&mut *conn)
    .await?;
    let mut member_ids: Vec<Uuid> = allocations.iter().map(|a| a.user_id).collect();
    member_ids.sort();
    member_ids.dedup();

    let required = required_skills(&mut conn, &ids).await?;
    let member_skills = user_skill_details(&mut conn, &member_ids).await?;
    let pending: HashMap<Uuid, i64> = sqlx::query_as::<_, (Uuid, i64)>(
        r#"
        SELECT project_id, COUNT(*) FROM resource_requests
        WHERE project_id = ANY($1) AND status IN ('pending_lm', 'pending_hr')
        GROUP BY project_id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .collect();

    Ok(Json(build_pm_dashboard(
        &projects,
        &allocations,
        &required,
        &member_skills,
        &pending,
    )))
}

/// GET /api/v1/dashboard/manager
pub async fn handle_manager(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ManagerDashboard>, AppError> {
    let today = Utc::now().date_naive();
    let reports = direct_reports(&state.db, auth.id()).await?;
    if reports.is_empty() && !auth.has_any(&[Role::LineManager]) {
        return Err(AppError::Forbidden);
    }

    let mut conn = state.db.acquire().await?;
    let active = allocations_active_on(&mut conn, today).await?;
    let loads = loads_by_user(&active, today);

    let (pending_work, pending_resource): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM work_requests w JOIN users u ON u.id = w.user_id
             WHERE w.status = 'pending_lm' AND u.manager_id = $1),
            (SELECT COUNT(*) FROM resource_requests r JOIN users u ON u.id = r.requested_user_id
             WHERE r.status = 'pending_lm' AND u.manager_id = $1)
        "#,
    )
    .bind(auth.id())
    .fetch_one(&mut *conn)
    .await?;

    Ok(Json(build_manager_dashboard(
        &reports,
        &loads,
        pending_work,
        pending_resource,
    )))
}

/// GET /api/v1/dashboard/hr
pub async fn handle_hr(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<HrDashboard>, AppError> {
    auth.require_any(&[Role::Hr])?;
    let today = Utc::now().date_naive();
    let mut conn = state.db.acquire().await?;

    let users = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY name")
        .fetch_all(&mut *conn)
        .await?;
    let active = allocations_active_on(&mut conn, today).await?;
    let loads = loads_by_user(&active, today);

    let pending_hr: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM resource_requests WHERE status = 'pending_hr'")
            .fetch_one(&mut *conn)
            .await?;

    let taxonomy = all_skills(&mut conn).await?;
    let ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
    let held = user_skill_details(&mut conn, &ids).await?;
    let distribution = aggregate_distribution(&taxonomy, &held);

    Ok(Json(build_hr_dashboard(
        &users,
        &loads,
        pending_hr,
        distribution.skills,
    )))
}
