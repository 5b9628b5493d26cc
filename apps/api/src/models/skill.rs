use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SkillRow {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSkillRow {
    pub user_id: Uuid,
    pub skill_id: Uuid,
    pub proficiency: i16,
    pub is_desired: bool,
    pub proof_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user skill joined with its taxonomy entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSkillDetail {
    pub user_id: Uuid,
    pub skill_id: Uuid,
    pub skill_name: String,
    pub category: String,
    pub proficiency: i16,
    pub is_desired: bool,
    pub proof_keys: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

pub const USER_SKILL_DETAIL_SELECT: &str = r#"
    SELECT us.user_id, us.skill_id, s.name AS skill_name, s.category,
           us.proficiency, us.is_desired, us.proof_keys, us.updated_at
    FROM user_skills us
    JOIN skills s ON s.id = us.skill_id
"#;
