//! Leave and overtime requests, decided by the requester's line manager.

pub mod handlers;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::request::{LeaveType, RequestScope, WorkRequestKind, WorkRequestRow};
use crate::models::user::Role;
use crate::workflow::{ApprovalStage, RequestKind, RequestStatus};

pub const MAX_HOURS_PER_DAY: f64 = 24.0;

#[derive(Debug, Clone, Serialize)]
pub struct WorkRequestView {
    #[serde(flatten)]
    pub request: WorkRequestRow,
    pub awaiting: Option<ApprovalStage>,
}

impl From<WorkRequestRow> for WorkRequestView {
    fn from(request: WorkRequestRow) -> Self {
        let awaiting = RequestKind::Work.pending_stage(request.status());
        Self { request, awaiting }
    }
}

/// Inclusive day count of `[start, end]`.
pub fn span_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// Leave needs a leave type and no hours; overtime needs hours within the span.
pub fn validate_work_request(
    kind: WorkRequestKind,
    leave_type: Option<LeaveType>,
    hours: Option<f64>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), AppError> {
    if end < start {
        return Err(AppError::Validation(
            "end_date must not be before start_date".to_string(),
        ));
    }

    match kind {
        WorkRequestKind::Leave => {
            if leave_type.is_none() {
                return Err(AppError::Validation(
                    "leave requests need a leave_type".to_string(),
                ));
            }
            if hours.is_some() {
                return Err(AppError::Validation(
                    "hours only apply to overtime requests".to_string(),
                ));
            }
        }
        WorkRequestKind::Overtime => {
            if leave_type.is_some() {
                return Err(AppError::Validation(
                    "leave_type only applies to leave requests".to_string(),
                ));
            }
            let max = MAX_HOURS_PER_DAY * span_days(start, end) as f64;
            match hours {
                Some(h) if h.is_finite() && h > 0.0 && h <= max => {}
                Some(_) => {
                    return Err(AppError::Validation(format!(
                        "overtime hours must be greater than 0 and at most {max}"
                    )))
                }
                None => {
                    return Err(AppError::Validation(
                        "overtime requests need hours".to_string(),
                    ))
                }
            }
        }
    }
    Ok(())
}

/// Row filter applied by the listing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    All,
    MineAndReports,
    Mine,
    LineQueue,
    LineAndOrphanQueue,
    AllPending,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::All => "all",
            Visibility::MineAndReports => "mine_reports",
            Visibility::Mine => "mine",
            Visibility::LineQueue => "line_queue",
            Visibility::LineAndOrphanQueue => "line_orphan_queue",
            Visibility::AllPending => "all_pending",
        }
    }

    pub fn for_role(role: Role, scope: Option<RequestScope>) -> Self {
        match (scope, role) {
            (Some(RequestScope::Mine), _) => Visibility::Mine,
            (Some(RequestScope::Approvals), Role::Admin) => Visibility::AllPending,
            (Some(RequestScope::Approvals), Role::Hr) => Visibility::LineAndOrphanQueue,
            (Some(RequestScope::Approvals), _) => Visibility::LineQueue,
            (None, Role::Admin | Role::Hr) => Visibility::All,
            (None, _) => Visibility::MineAndReports,
        }
    }
}

pub async fn list_requests(
    conn: &mut PgConnection,
    viewer: Uuid,
    visibility: Visibility,
    status: Option<RequestStatus>,
) -> Result<Vec<WorkRequestRow>, sqlx::Error> {
    sqlx::query_as::<_, WorkRequestRow>(
        r#"
        SELECT w.* FROM work_requests w
        JOIN users u ON u.id = w.user_id
        WHERE ($1::text IS NULL OR w.status = $1)
          AND CASE $2
                WHEN 'all' THEN TRUE
                WHEN 'mine' THEN w.user_id = $3
                WHEN 'mine_reports' THEN w.user_id = $3 OR u.manager_id = $3
                WHEN 'line_queue' THEN w.status = 'pending_lm' AND u.manager_id = $3
                WHEN 'line_orphan_queue' THEN w.status = 'pending_lm'
                                          AND (u.manager_id = $3 OR u.manager_id IS NULL)
                WHEN 'all_pending' THEN w.status = 'pending_lm'
                ELSE FALSE
              END
        ORDER BY w.created_at DESC
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .bind(visibility.as_str())
    .bind(viewer)
    .fetch_all(&mut *conn)
    .await
}

pub async fn get_request(conn: &mut PgConnection, id: Uuid) -> Result<WorkRequestRow, AppError> {
    sqlx::query_as::<_, WorkRequestRow>("SELECT * FROM work_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Work request {id} not found")))
}

/// Conditional transition; `None` when the request left `expected` meanwhile.
pub async fn record_transition(
    conn: &mut PgConnection,
    id: Uuid,
    expected: RequestStatus,
    next: RequestStatus,
    approver: Option<Uuid>,
    comment: Option<&str>,
) -> Result<Option<WorkRequestRow>, sqlx::Error> {
    sqlx::query_as::<_, WorkRequestRow>(
        r#"
        UPDATE work_requests
        SET status = $1,
            approver_id = COALESCE($2, approver_id),
            decided_at = CASE WHEN $2::uuid IS NULL THEN decided_at ELSE now() END,
            comment = COALESCE($3, comment),
            updated_at = now()
        WHERE id = $4 AND status = $5
        RETURNING *
        "#,
    )
    .bind(next.as_str())
    .bind(approver)
    .bind(comment)
    .bind(id)
    .bind(expected.as_str())
    .fetch_optional(&mut *conn)
    .await
}
