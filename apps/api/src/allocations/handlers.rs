use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::allocations::{
    check_capacity, insert_allocation, recompute_availability, validate_span, NewAllocation,
};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::allocation::AllocationRow;
use crate::models::user::Role;
use crate::notifications::{fan_out, NotificationKind, NotificationTemplate};
use crate::projects::{get_project, staffing_project};
use crate::state::AppState;
use crate::users::get_user;

const VIEWER_ROLES: &[Role] = &[Role::Pm, Role::LineManager, Role::Hr];

#[derive(Debug, Deserialize)]
pub struct ListAllocationsQuery {
    pub user_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub active_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAllocationRequest {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub percentage: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// GET /api/v1/allocations
///
/// Without a viewer role only one's own allocations are visible.
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<ListAllocationsQuery>,
) -> Result<Json<Vec<AllocationRow>>, AppError> {
    let user_filter = if auth.has_any(VIEWER_ROLES) {
        params.user_id
    } else {
        auth.require_self_or_any(params.user_id.unwrap_or(auth.id()), VIEWER_ROLES)?;
        Some(auth.id())
    };

    let rows = sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT * FROM allocations
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::uuid IS NULL OR project_id = $2)
          AND ($3::date IS NULL OR (start_date <= $3 AND end_date >= $3))
        ORDER BY start_date, created_at
        "#,
    )
    .bind(user_filter)
    .bind(params.project_id)
    .bind(params.active_on)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

/// POST /api/v1/allocations
///
/// Direct allocation by HR, bypassing the resource request workflow.
pub async fn handle_create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateAllocationRequest>,
) -> Result<(StatusCode, Json<AllocationRow>), AppError> {
    auth.require_any(&[Role::Hr])?;
    validate_span(req.percentage, req.start_date, req.end_date)?;

    let mut tx = state.db.begin().await?;

    let project = staffing_project(&mut tx, req.project_id).await?;
    let user = get_user(&mut tx, req.user_id).await?;

    let capacity = check_capacity(
        &mut tx,
        user.id,
        req.percentage,
        req.start_date,
        req.end_date,
    )
    .await?;
    if !capacity.fits() {
        return Err(AppError::UnprocessableEntity(capacity.describe()));
    }

    let allocation = insert_allocation(
        &mut tx,
        NewAllocation {
            user_id: user.id,
            project_id: project.id,
            percentage: req.percentage,
            start_date: req.start_date,
            end_date: req.end_date,
            resource_request_id: None,
        },
    )
    .await?;
    recompute_availability(&mut tx, user.id).await?;

    let template = NotificationTemplate::new(
        NotificationKind::AllocationCreated,
        "New allocation",
        format!(
            "{} is allocated to '{}' at {}% from {} to {}",
            user.name, project.name, allocation.percentage, allocation.start_date, allocation.end_date
        ),
    )
    .link("allocation", allocation.id);
    fan_out(&mut tx, &[user.id, project.pm_id], Some(auth.id()), &template).await?;

    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(allocation)))
}

/// DELETE /api/v1/allocations/:id
///
/// Ends an allocation today, or removes it entirely if it has not started yet.
pub async fn handle_end(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let mut tx = state.db.begin().await?;

    let allocation =
        sqlx::query_as::<_, AllocationRow>("SELECT * FROM allocations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Allocation {id} not found")))?;

    let project = get_project(&mut tx, allocation.project_id).await?;
    if project.pm_id != auth.id() {
        auth.require_any(&[Role::Hr])?;
    }

    let today = Utc::now().date_naive();
    let message = match end_action(&allocation, today) {
        EndAction::Remove => {
            sqlx::query("DELETE FROM allocations WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            format!("Your upcoming allocation to '{}' was withdrawn", project.name)
        }
        EndAction::Truncate => {
            sqlx::query("UPDATE allocations SET end_date = $1, updated_at = now() WHERE id = $2")
                .bind(today)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            format!("Your allocation to '{}' ends today", project.name)
        }
        EndAction::AlreadyEnded => {
            return Err(AppError::Conflict(format!(
                "allocation already ended on {}",
                allocation.end_date
            )))
        }
    };

    recompute_availability(&mut tx, allocation.user_id).await?;
    let template = NotificationTemplate::new(
        NotificationKind::AllocationEnded,
        "Allocation ended",
        message,
    )
    .link("project", project.id);
    fan_out(&mut tx, &[allocation.user_id], Some(auth.id()), &template).await?;

    tx.commit().await?;
    info!("Allocation {id} ended by {}", auth.id());
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, PartialEq, Eq)]
enum EndAction {
    Remove,
    Truncate,
    AlreadyEnded,
}

fn end_action(allocation: &AllocationRow, today: NaiveDate) -> EndAction {
    if allocation.start_date > today {
        EndAction::Remove
    } else if allocation.end_date > today {
        EndAction::Truncate
    } else {
        EndAction::AlreadyEnded
    }
}
