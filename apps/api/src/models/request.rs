use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::workflow::RequestStatus;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResourceRequestRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub requested_user_id: Uuid,
    pub requester_id: Uuid,
    pub percentage: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub note: Option<String>,
    pub status: String,
    pub lm_approver_id: Option<Uuid>,
    pub lm_decided_at: Option<DateTime<Utc>>,
    pub lm_comment: Option<String>,
    pub hr_approver_id: Option<Uuid>,
    pub hr_decided_at: Option<DateTime<Utc>>,
    pub hr_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRequestRow {
    // The CHECK constraint keeps this parse total; an unknown value is treated as final.
    pub fn status(&self) -> RequestStatus {
        self.status.parse().unwrap_or(RequestStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkRequestRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub leave_type: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub hours: Option<f64>,
    pub reason: Option<String>,
    pub status: String,
    pub approver_id: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkRequestRow {
    pub fn status(&self) -> RequestStatus {
        self.status.parse().unwrap_or(RequestStatus::Cancelled)
    }
}

/// Which slice of requests a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestScope {
    /// Requests the caller raised or is the subject of.
    Mine,
    /// Requests waiting on the caller's decision.
    Approvals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkRequestKind {
    Leave,
    Overtime,
}

impl WorkRequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkRequestKind::Leave => "leave",
            WorkRequestKind::Overtime => "overtime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveType {
    Annual,
    Sick,
    Unpaid,
    Other,
}

impl LeaveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveType::Annual => "annual",
            LeaveType::Sick => "sick",
            LeaveType::Unpaid => "unpaid",
            LeaveType::Other => "other",
        }
    }
}
