use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::request::{LeaveType, RequestScope, WorkRequestKind, WorkRequestRow};
use crate::notifications::{fan_out, notify, NotificationKind, NotificationTemplate};
use crate::state::AppState;
use crate::users::{approvers_for, get_user, is_line_approver};
use crate::work_requests::{
    get_request, list_requests, record_transition, validate_work_request, Visibility,
    WorkRequestView,
};
use crate::workflow::{decision_comment, ApprovalStage, Decision, RequestKind, RequestStatus};

#[derive(Debug, Deserialize)]
pub struct CreateWorkRequest {
    pub kind: WorkRequestKind,
    pub leave_type: Option<LeaveType>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub hours: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListWorkRequestsQuery {
    pub status: Option<RequestStatus>,
    pub scope: Option<RequestScope>,
}

#[derive(Debug, Deserialize)]
pub struct WorkDecisionRequest {
    pub decision: Decision,
    pub comment: Option<String>,
}

fn describe(request: &WorkRequestRow) -> String {
    match (request.kind.as_str(), request.hours) {
        ("overtime", Some(hours)) => format!(
            "{hours}h overtime from {} to {}",
            request.start_date, request.end_date
        ),
        _ => format!(
            "{} leave from {} to {}",
            request.leave_type.as_deref().unwrap_or("other"),
            request.start_date,
            request.end_date
        ),
    }
}

/// POST /api/v1/work-requests
pub async fn handle_create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateWorkRequest>,
) -> Result<(StatusCode, Json<WorkRequestView>), AppError> {
    validate_work_request(
        req.kind,
        req.leave_type,
        req.hours,
        req.start_date,
        req.end_date,
    )?;
    let reason = req.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());

    let mut tx = state.db.begin().await?;
    let request = sqlx::query_as::<_, WorkRequestRow>(
        r#"
        INSERT INTO work_requests (user_id, kind, leave_type, start_date, end_date, hours, reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(auth.id())
    .bind(req.kind.as_str())
    .bind(req.leave_type.map(|t| t.as_str()))
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(req.hours)
    .bind(reason)
    .fetch_one(&mut *tx)
    .await?;

    let approvers = approvers_for(&mut tx, &auth.user).await?;
    let template = NotificationTemplate::new(
        NotificationKind::WorkRequestSubmitted,
        "Approval needed",
        format!("{} requested {}", auth.user.name, describe(&request)),
    )
    .link("work_request", request.id);
    fan_out(&mut tx, &approvers, Some(auth.id()), &template).await?;

    tx.commit().await?;
    info!("Work request {} ({}) created by {}", request.id, request.kind, auth.id());
    Ok((StatusCode::CREATED, Json(request.into())))
}

/// GET /api/v1/work-requests
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<ListWorkRequestsQuery>,
) -> Result<Json<Vec<WorkRequestView>>, AppError> {
    let visibility = Visibility::for_role(auth.role(), params.scope);
    let mut conn = state.db.acquire().await?;
    let rows = list_requests(&mut conn, auth.id(), visibility, params.status).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// POST /api/v1/work-requests/:id/decision
pub async fn handle_decision(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<WorkDecisionRequest>,
) -> Result<Json<WorkRequestView>, AppError> {
    let comment = decision_comment(req.decision, req.comment.as_deref())?;

    let mut tx = state.db.begin().await?;
    let request = get_request(&mut tx, id).await?;
    if request.user_id == auth.id() && !auth.is_admin() {
        return Err(AppError::Forbidden);
    }
    let requester = get_user(&mut tx, request.user_id).await?;
    if !is_line_approver(auth.id(), auth.role(), requester.manager_id) {
        return Err(AppError::Forbidden);
    }

    let current = request.status();
    let next = RequestKind::Work.decide(current, ApprovalStage::LineManager, req.decision)?;
    let updated = record_transition(
        &mut tx,
        id,
        current,
        next,
        Some(auth.id()),
        comment.as_deref(),
    )
    .await?
    .ok_or_else(|| already_decided(id))?;

    let template = match req.decision {
        Decision::Approve => NotificationTemplate::new(
            NotificationKind::WorkRequestApproved,
            "Request approved",
            format!("{} approved your {}", auth.user.name, describe(&updated)),
        ),
        Decision::Reject => NotificationTemplate::new(
            NotificationKind::WorkRequestRejected,
            "Request rejected",
            format!(
                "{} rejected your {}: {}",
                auth.user.name,
                describe(&updated),
                updated.comment.as_deref().unwrap_or_default()
            ),
        ),
    }
    .link("work_request", updated.id);
    notify(&mut tx, updated.user_id, Some(auth.id()), &template).await?;

    tx.commit().await?;
    info!("Work request {} moved {} -> {} by {}", id, current, next, auth.id());
    Ok(Json(updated.into()))
}

/// POST /api/v1/work-requests/:id/cancel
pub async fn handle_cancel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkRequestView>, AppError> {
    let mut tx = state.db.begin().await?;
    let request = get_request(&mut tx, id).await?;
    if request.user_id != auth.id() && !auth.is_admin() {
        return Err(AppError::Forbidden);
    }

    let current = request.status();
    let next = RequestKind::Work.cancel(current)?;
    let updated = record_transition(&mut tx, id, current, next, None, None)
        .await?
        .ok_or_else(|| already_decided(id))?;

    let requester = get_user(&mut tx, updated.user_id).await?;
    let approvers = approvers_for(&mut tx, &requester).await?;
    let template = NotificationTemplate::new(
        NotificationKind::RequestCancelled,
        "Request withdrawn",
        format!("{} withdrew their {}", requester.name, describe(&updated)),
    )
    .link("work_request", updated.id);
    fan_out(&mut tx, &approvers, Some(auth.id()), &template).await?;

    tx.commit().await?;
    info!("Work request {} cancelled by {}", id, auth.id());
    Ok(Json(updated.into()))
}

fn already_decided(id: Uuid) -> AppError {
    AppError::Conflict(format!(
        "work request {id} was changed by someone else; reload and try again"
    ))
}
