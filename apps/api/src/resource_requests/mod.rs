//! PM-initiated staffing requests, approved by the line manager and then HR.

pub mod handlers;

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::request::{RequestScope, ResourceRequestRow};
use crate::models::user::Role;
use crate::workflow::{ApprovalStage, Decision, RequestKind, RequestStatus};

/// A request together with the stage that has to act on it next.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRequestView {
    #[serde(flatten)]
    pub request: ResourceRequestRow,
    pub awaiting: Option<ApprovalStage>,
}

impl From<ResourceRequestRow> for ResourceRequestView {
    fn from(request: ResourceRequestRow) -> Self {
        let awaiting = RequestKind::Resource.pending_stage(request.status());
        Self { request, awaiting }
    }
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    pub comment: Option<String>,
}

/// Row filter applied by the listing query; see `LIST_SQL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    All,
    Involved,
    Mine,
    LineQueue,
    LineAndHrQueue,
    AllPending,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::All => "all",
            Visibility::Involved => "involved",
            Visibility::Mine => "mine",
            Visibility::LineQueue => "line_queue",
            Visibility::LineAndHrQueue => "line_hr_queue",
            Visibility::AllPending => "all_pending",
        }
    }

    pub fn for_role(role: Role, scope: Option<RequestScope>) -> Self {
        match (scope, role) {
            (Some(RequestScope::Mine), _) => Visibility::Mine,
            (Some(RequestScope::Approvals), Role::Admin) => Visibility::AllPending,
            (Some(RequestScope::Approvals), Role::Hr) => Visibility::LineAndHrQueue,
            (Some(RequestScope::Approvals), _) => Visibility::LineQueue,
            (None, Role::Admin | Role::Hr) => Visibility::All,
            (None, _) => Visibility::Involved,
        }
    }
}

const LIST_SQL: &str = r#"
    SELECT r.* FROM resource_requests r
    JOIN users u ON u.id = r.requested_user_id
    JOIN projects p ON p.id = r.project_id
    WHERE ($1::text IS NULL OR r.status = $1)
      AND ($2::uuid IS NULL OR r.project_id = $2)
      AND CASE $3
            WHEN 'all' THEN TRUE
            WHEN 'mine' THEN r.requester_id = $4 OR r.requested_user_id = $4
            WHEN 'involved' THEN r.requester_id = $4 OR r.requested_user_id = $4
                                 OR p.pm_id = $4 OR u.manager_id = $4
            WHEN 'line_queue' THEN r.status = 'pending_lm' AND u.manager_id = $4
            WHEN 'line_hr_queue' THEN r.status = 'pending_hr'
                                 OR (r.status = 'pending_lm'
                                     AND (u.manager_id = $4 OR u.manager_id IS NULL))
            WHEN 'all_pending' THEN r.status IN ('pending_lm', 'pending_hr')
            ELSE FALSE
          END
    ORDER BY r.created_at DESC
"#;

pub async fn list_requests(
    conn: &mut PgConnection,
    viewer: Uuid,
    visibility: Visibility,
    status: Option<RequestStatus>,
    project_id: Option<Uuid>,
) -> Result<Vec<ResourceRequestRow>, sqlx::Error> {
    sqlx::query_as::<_, ResourceRequestRow>(LIST_SQL)
        .bind(status.map(|s| s.as_str()))
        .bind(project_id)
        .bind(visibility.as_str())
        .bind(viewer)
        .fetch_all(&mut *conn)
        .await
}

pub async fn get_request(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<ResourceRequestRow, AppError> {
    sqlx::query_as::<_, ResourceRequestRow>("SELECT * FROM resource_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resource request {id} not found")))
}

/// Applies a stage decision only if the request is still in `expected`.
/// Returns `None` when another approver got there first.
pub async fn record_decision(
    conn: &mut PgConnection,
    id: Uuid,
    expected: RequestStatus,
    next: RequestStatus,
    stage: ApprovalStage,
    approver: Uuid,
    comment: Option<&str>,
) -> Result<Option<ResourceRequestRow>, sqlx::Error> {
    let sql = match stage {
        ApprovalStage::LineManager => {
            r#"
            UPDATE resource_requests
            SET status = $1, lm_approver_id = $2, lm_comment = $3,
                lm_decided_at = now(), updated_at = now()
            WHERE id = $4 AND status = $5
            RETURNING *
            "#
        }
        ApprovalStage::Hr => {
            r#"
            UPDATE resource_requests
            SET status = $1, hr_approver_id = $2, hr_comment = $3,
                hr_decided_at = now(), updated_at = now()
            WHERE id = $4 AND status = $5
            RETURNING *
            "#
        }
    };

    sqlx::query_as::<_, ResourceRequestRow>(sql)
        .bind(next.as_str())
        .bind(approver)
        .bind(comment)
        .bind(id)
        .bind(expected.as_str())
        .fetch_optional(&mut *conn)
        .await
}

pub async fn record_cancellation(
    conn: &mut PgConnection,
    id: Uuid,
    expected: RequestStatus,
) -> Result<Option<ResourceRequestRow>, sqlx::Error> {
    sqlx::query_as::<_, ResourceRequestRow>(
        r#"
        UPDATE resource_requests SET status = 'cancelled', updated_at = now()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(expected.as_str())
    .fetch_optional(&mut *conn)
    .await
}

pub fn already_decided(id: Uuid) -> AppError {
    AppError::Conflict(format!(
        "resource request {id} was changed by someone else; reload and try again"
    ))
}
