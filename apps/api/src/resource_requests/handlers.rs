use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::allocations::{
    check_capacity, insert_allocation, recompute_availability, validate_span, NewAllocation,
};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::allocation::AllocationRow;
use crate::models::request::{RequestScope, ResourceRequestRow};
use crate::models::user::Role;
use crate::notifications::{fan_out, hr_user_ids, NotificationKind, NotificationTemplate};
use crate::projects::{get_project, staffing_project};
use crate::resource_requests::{
    already_decided, get_request, list_requests, record_cancellation, record_decision,
    DecisionRequest, ResourceRequestView, Visibility,
};
use crate::state::AppState;
use crate::users::{approvers_for, get_user, is_line_approver};
use crate::workflow::{decision_comment, ApprovalStage, Decision, RequestKind, RequestStatus};

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub percentage: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListResourceRequestsQuery {
    pub status: Option<RequestStatus>,
    pub project_id: Option<Uuid>,
    pub scope: Option<RequestScope>,
}

#[derive(Debug, Serialize)]
pub struct HrDecisionResponse {
    pub request: ResourceRequestView,
    pub allocation: Option<AllocationRow>,
}

/// POST /api/v1/resource-requests
pub async fn handle_create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateResourceRequest>,
) -> Result<(StatusCode, Json<ResourceRequestView>), AppError> {
    validate_span(req.percentage, req.start_date, req.end_date)?;

    let mut tx = state.db.begin().await?;

    let project = get_project(&mut tx, req.project_id).await?;
    if project.pm_id != auth.id() && !auth.is_admin() {
        return Err(AppError::Forbidden);
    }
    let project = staffing_project(&mut tx, project.id).await?;
    let subject = get_user(&mut tx, req.user_id).await?;

    let duplicate: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM resource_requests
            WHERE project_id = $1 AND requested_user_id = $2
              AND status IN ('pending_lm', 'pending_hr')
        )
        "#,
    )
    .bind(project.id)
    .bind(subject.id)
    .fetch_one(&mut *tx)
    .await?;
    if duplicate {
        return Err(AppError::Conflict(format!(
            "{} already has a pending request for '{}'",
            subject.name, project.name
        )));
    }

    let capacity = check_capacity(
        &mut tx,
        subject.id,
        req.percentage,
        req.start_date,
        req.end_date,
    )
    .await?;
    if !capacity.fits() {
        return Err(AppError::UnprocessableEntity(capacity.describe()));
    }

    let note = req.note.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let request = sqlx::query_as::<_, ResourceRequestRow>(
        r#"
        INSERT INTO resource_requests
            (project_id, requested_user_id, requester_id, percentage, start_date, end_date, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(project.id)
    .bind(subject.id)
    .bind(auth.id())
    .bind(req.percentage)
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(note)
    .fetch_one(&mut *tx)
    .await?;

    let mut recipients = approvers_for(&mut tx, &subject).await?;
    recipients.push(subject.id);
    let template = NotificationTemplate::new(
        NotificationKind::ResourceRequestSubmitted,
        "Resource request submitted",
        format!(
            "{} asked for {} on '{}' at {}% from {} to {}",
            auth.user.name,
            subject.name,
            project.name,
            request.percentage,
            request.start_date,
            request.end_date
        ),
    )
    .link("resource_request", request.id);
    fan_out(&mut tx, &recipients, Some(auth.id()), &template).await?;

    tx.commit().await?;
    info!(
        "Resource request {} created by {} for user {} on project {}",
        request.id, request.requester_id, request.requested_user_id, request.project_id
    );
    Ok((StatusCode::CREATED, Json(request.into())))
}

/// GET /api/v1/resource-requests
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<ListResourceRequestsQuery>,
) -> Result<Json<Vec<ResourceRequestView>>, AppError> {
    let visibility = Visibility::for_role(auth.role(), params.scope);
    let mut conn = state.db.acquire().await?;
    let rows = list_requests(
        &mut conn,
        auth.id(),
        visibility,
        params.status,
        params.project_id,
    )
    .await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/resource-requests/:id
pub async fn handle_get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ResourceRequestView>, AppError> {
    let mut conn = state.db.acquire().await?;
    let request = get_request(&mut conn, id).await?;
    if !auth.has_any(&[Role::Hr])
        && request.requester_id != auth.id()
        && request.requested_user_id != auth.id()
    {
        let subject = get_user(&mut conn, request.requested_user_id).await?;
        let project = get_project(&mut conn, request.project_id).await?;
        if subject.manager_id != Some(auth.id()) && project.pm_id != auth.id() {
            return Err(AppError::NotFound(format!("Resource request {id} not found")));
        }
    }
    Ok(Json(request.into()))
}

/// POST /api/v1/resource-requests/:id/lm-decision
pub async fn handle_lm_decision(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<ResourceRequestView>, AppError> {
    let comment = decision_comment(req.decision, req.comment.as_deref())?;

    let mut tx = state.db.begin().await?;
    let request = get_request(&mut tx, id).await?;
    let subject = get_user(&mut tx, request.requested_user_id).await?;
    if !is_line_approver(auth.id(), auth.role(), subject.manager_id) {
        return Err(AppError::Forbidden);
    }

    let current = request.status();
    let next = RequestKind::Resource.decide(current, ApprovalStage::LineManager, req.decision)?;
    if req.decision == Decision::Approve {
        staffing_project(&mut tx, request.project_id).await?;
    }
    let updated = record_decision(
        &mut tx,
        id,
        current,
        next,
        ApprovalStage::LineManager,
        auth.id(),
        comment.as_deref(),
    )
    .await?
    .ok_or_else(|| already_decided(id))?;

    let project = get_project(&mut tx, updated.project_id).await?;
    match req.decision {
        Decision::Approve => {
            let hr = hr_user_ids(&mut tx).await?;
            let template = NotificationTemplate::new(
                NotificationKind::ResourceRequestNeedsHr,
                "Resource request awaiting HR",
                format!(
                    "{} approved {} for '{}' at {}%; HR approval is needed",
                    auth.user.name, subject.name, project.name, updated.percentage
                ),
            )
            .link("resource_request", updated.id);
            fan_out(&mut tx, &hr, Some(auth.id()), &template).await?;
        }
        Decision::Reject => {
            let template = rejection_template(&updated, &subject.name, &project.name, &auth);
            fan_out(&mut tx, &[updated.requester_id], Some(auth.id()), &template).await?;
        }
    }

    tx.commit().await?;
    info!(
        "Resource request {} moved {} -> {} by line manager {}",
        id,
        current,
        next,
        auth.id()
    );
    Ok(Json(updated.into()))
}

/// POST /api/v1/resource-requests/:id/hr-decision
///
/// Approval creates the allocation in the same transaction, after re-checking
/// capacity against allocations made since the request was filed.
pub async fn handle_hr_decision(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<HrDecisionResponse>, AppError> {
    auth.require_any(&[Role::Hr])?;
    let comment = decision_comment(req.decision, req.comment.as_deref())?;

    let mut tx = state.db.begin().await?;
    let request = get_request(&mut tx, id).await?;
    let current = request.status();
    let next = RequestKind::Resource.decide(current, ApprovalStage::Hr, req.decision)?;

    if next == RequestStatus::Approved {
        staffing_project(&mut tx, request.project_id).await?;
        let capacity = check_capacity(
            &mut tx,
            request.requested_user_id,
            request.percentage,
            request.start_date,
            request.end_date,
        )
        .await?;
        if !capacity.fits() {
            return Err(AppError::Conflict(capacity.describe()));
        }
    }

    let updated = record_decision(
        &mut tx,
        id,
        current,
        next,
        ApprovalStage::Hr,
        auth.id(),
        comment.as_deref(),
    )
    .await?
    .ok_or_else(|| already_decided(id))?;

    let subject = get_user(&mut tx, updated.requested_user_id).await?;
    let project = get_project(&mut tx, updated.project_id).await?;

    let allocation = match req.decision {
        Decision::Approve => {
            let allocation = insert_allocation(
                &mut tx,
                NewAllocation {
                    user_id: updated.requested_user_id,
                    project_id: updated.project_id,
                    percentage: updated.percentage,
                    start_date: updated.start_date,
                    end_date: updated.end_date,
                    resource_request_id: Some(updated.id),
                },
            )
            .await?;
            recompute_availability(&mut tx, subject.id).await?;

            let template = NotificationTemplate::new(
                NotificationKind::ResourceRequestApproved,
                "Resource request approved",
                format!(
                    "{} joins '{}' at {}% from {} to {}",
                    subject.name,
                    project.name,
                    allocation.percentage,
                    allocation.start_date,
                    allocation.end_date
                ),
            )
            .link("resource_request", updated.id);
            fan_out(
                &mut tx,
                &[updated.requester_id, subject.id],
                Some(auth.id()),
                &template,
            )
            .await?;
            Some(allocation)
        }
        Decision::Reject => {
            let template = rejection_template(&updated, &subject.name, &project.name, &auth);
            fan_out(&mut tx, &[updated.requester_id], Some(auth.id()), &template).await?;
            None
        }
    };

    tx.commit().await?;
    info!("Resource request {} moved {} -> {} by HR {}", id, current, next, auth.id());
    Ok(Json(HrDecisionResponse {
        request: updated.into(),
        allocation,
    }))
}

/// POST /api/v1/resource-requests/:id/cancel
pub async fn handle_cancel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ResourceRequestView>, AppError> {
    let mut tx = state.db.begin().await?;
    let request = get_request(&mut tx, id).await?;
    if request.requester_id != auth.id() && !auth.is_admin() {
        return Err(AppError::Forbidden);
    }

    let current = request.status();
    RequestKind::Resource.cancel(current)?;
    let updated = record_cancellation(&mut tx, id, current)
        .await?
        .ok_or_else(|| already_decided(id))?;

    let subject = get_user(&mut tx, updated.requested_user_id).await?;
    let waiting_on = match RequestKind::Resource.pending_stage(current) {
        Some(ApprovalStage::LineManager) => approvers_for(&mut tx, &subject).await?,
        Some(ApprovalStage::Hr) => hr_user_ids(&mut tx).await?,
        None => Vec::new(),
    };
    let mut recipients = waiting_on;
    recipients.push(subject.id);

    let template = NotificationTemplate::new(
        NotificationKind::RequestCancelled,
        "Resource request withdrawn",
        format!("The request for {} was withdrawn", subject.name),
    )
    .link("resource_request", updated.id);
    fan_out(&mut tx, &recipients, Some(auth.id()), &template).await?;

    tx.commit().await?;
    info!("Resource request {} cancelled by {}", id, auth.id());
    Ok(Json(updated.into()))
}

fn rejection_template(
    request: &ResourceRequestRow,
    subject_name: &str,
    project_name: &str,
    approver: &AuthUser,
) -> NotificationTemplate {
    let reason = request
        .hr_comment
        .as_deref()
        .or(request.lm_comment.as_deref())
        .unwrap_or_default();
    NotificationTemplate::new(
        NotificationKind::ResourceRequestRejected,
        "Resource request rejected",
        format!(
            "{} rejected {} for '{}': {}",
            approver.user.name, subject_name, project_name, reason
        ),
    )
    .link("resource_request", request.id)
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;
    use sqlx::PgPool;

    use super::*;
    use crate::routes::test_support::{
        in_days, notification_count, seed_allocation, seed_project, seed_user, send, set_project_status,
        sorted, state_with, today,
    };

    struct Staffing {
        state: AppState,
        pm: Uuid,
        dev: Uuid,
        project: Uuid,
    }

    /// An HR user, a line manager, a PM with an active project and one developer.
    async fn staffing(pool: &PgPool) -> Staffing {
        seed_user(pool, "hr", Role::Hr, None).await;
        let lm = seed_user(pool, "lm", Role::LineManager, None).await;
        let pm = seed_user(pool, "pm", Role::Pm, None).await;
        let dev = seed_user(pool, "dev", Role::Employee, Some(lm)).await;
        let project = seed_project(pool, pm, "active").await;
        Staffing {
            state: state_with(pool.clone()),
            pm,
            dev,
            project,
        }
    }

    async fn seed_request(pool: &PgPool, s: &Staffing, percentage: i32, status: &str) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO resource_requests
                (project_id, requested_user_id, requester_id, percentage, start_date, end_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(s.project)
        .bind(s.dev)
        .bind(s.pm)
        .bind(percentage)
        .bind(today())
        .bind(in_days(30))
        .bind(status)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn status_of(pool: &PgPool, id: Uuid) -> String {
        sqlx::query_scalar("SELECT status FROM resource_requests WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn allocations_from(pool: &PgPool, id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM allocations WHERE resource_request_id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn approve() -> Option<serde_json::Value> {
        Some(json!({ "decision": "approve" }))
    }

    #[sqlx::test]
    async fn test_hr_approval_allocates_and_notifies(pool: PgPool) {
        let s = staffing(&pool).await;
        let id = seed_request(&pool, &s, 100, "pending_hr").await;

        let path = format!("/api/v1/resource-requests/{id}/hr-decision");
        let (status, body) = send(&s.state, Method::POST, &path, "hr", approve()).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["request"]["status"], "approved");
        assert_eq!(body["allocation"]["percentage"], 100);

        assert_eq!(allocations_from(&pool, id).await, 1);
        let availability: String =
            sqlx::query_scalar("SELECT availability FROM users WHERE id = $1")
                .bind(s.dev)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(availability, "fully_allocated");
        assert_eq!(notification_count(&pool, s.dev, "resource_request_approved").await, 1);
        assert_eq!(notification_count(&pool, s.pm, "resource_request_approved").await, 1);
    }

    #[sqlx::test]
    async fn test_hr_approval_conflicts_when_capacity_was_taken(pool: PgPool) {
        let s = staffing(&pool).await;
        let id = seed_request(&pool, &s, 60, "pending_hr").await;
        let other = seed_project(&pool, s.pm, "active").await;
        seed_allocation(&pool, s.dev, other, 50).await;

        let path = format!("/api/v1/resource-requests/{id}/hr-decision");
        let (status, _) = send(&s.state, Method::POST, &path, "hr", approve()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        assert_eq!(status_of(&pool, id).await, "pending_hr");
        assert_eq!(allocations_from(&pool, id).await, 0);
        assert_eq!(notification_count(&pool, s.pm, "resource_request_approved").await, 0);
    }

    #[sqlx::test]
    async fn test_hr_approval_on_cancelled_project_is_rejected(pool: PgPool) {
        let s = staffing(&pool).await;
        let id = seed_request(&pool, &s, 50, "pending_hr").await;
        set_project_status(&pool, s.project, "cancelled").await;

        let path = format!("/api/v1/resource-requests/{id}/hr-decision");
        let (status, _) = send(&s.state, Method::POST, &path, "hr", approve()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_of(&pool, id).await, "pending_hr");
        assert_eq!(allocations_from(&pool, id).await, 0);
    }

    #[sqlx::test]
    async fn test_hr_can_still_reject_on_cancelled_project(pool: PgPool) {
        let s = staffing(&pool).await;
        let id = seed_request(&pool, &s, 50, "pending_hr").await;
        set_project_status(&pool, s.project, "cancelled").await;

        let path = format!("/api/v1/resource-requests/{id}/hr-decision");
        let body = json!({ "decision": "reject", "comment": "project was cancelled" });
        let (status, _) = send(&s.state, Method::POST, &path, "hr", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(status_of(&pool, id).await, "rejected");
    }

    #[sqlx::test]
    async fn test_lm_approval_on_paused_project_is_rejected(pool: PgPool) {
        let s = staffing(&pool).await;
        let id = seed_request(&pool, &s, 50, "pending_lm").await;
        set_project_status(&pool, s.project, "on_hold").await;

        let path = format!("/api/v1/resource-requests/{id}/lm-decision");
        let (status, _) = send(&s.state, Method::POST, &path, "lm", approve()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_of(&pool, id).await, "pending_lm");
    }

    #[sqlx::test]
    async fn test_racing_lm_decisions_apply_once(pool: PgPool) {
        let s = staffing(&pool).await;
        let hr: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE external_id = 'hr'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let id = seed_request(&pool, &s, 50, "pending_lm").await;

        let path = format!("/api/v1/resource-requests/{id}/lm-decision");
        let (first, second) = tokio::join!(
            send(&s.state, Method::POST, &path, "lm", approve()),
            send(&s.state, Method::POST, &path, "lm", approve()),
        );
        assert_eq!(sorted(first.0, second.0), [StatusCode::OK, StatusCode::CONFLICT]);

        assert_eq!(status_of(&pool, id).await, "pending_hr");
        // The losing transaction wrote nothing, its notifications included.
        assert_eq!(notification_count(&pool, hr, "resource_request_needs_hr").await, 1);
    }

    #[sqlx::test]
    async fn test_repeated_hr_decision_conflicts(pool: PgPool) {
        let s = staffing(&pool).await;
        let id = seed_request(&pool, &s, 30, "pending_hr").await;

        let path = format!("/api/v1/resource-requests/{id}/hr-decision");
        let (first, _) = send(&s.state, Method::POST, &path, "hr", approve()).await;
        let (second, _) = send(&s.state, Method::POST, &path, "hr", approve()).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(allocations_from(&pool, id).await, 1);
    }

    #[sqlx::test]
    async fn test_repeated_lm_decision_conflicts(pool: PgPool) {
        let s = staffing(&pool).await;
        let id = seed_request(&pool, &s, 30, "pending_lm").await;

        let path = format!("/api/v1/resource-requests/{id}/lm-decision");
        let (first, _) = send(&s.state, Method::POST, &path, "lm", approve()).await;
        let (second, _) = send(&s.state, Method::POST, &path, "lm", approve()).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::CONFLICT);
    }

    #[sqlx::test]
    async fn test_duplicate_pending_request_conflicts(pool: PgPool) {
        let s = staffing(&pool).await;
        seed_request(&pool, &s, 30, "pending_lm").await;

        let body = json!({
            "project_id": s.project,
            "user_id": s.dev,
            "percentage": 20,
            "start_date": today(),
            "end_date": in_days(5),
        });
        let (status, _) =
            send(&s.state, Method::POST, "/api/v1/resource-requests", "pm", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
