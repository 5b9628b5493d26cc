use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AllocationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub percentage: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub resource_request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AllocationRow {
    pub fn is_active_on(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}
