use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CvCacheRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content_hash: String,
    pub file_key: Option<String>,
    pub raw_text: String,
    pub entities: Value,
    pub skills: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
