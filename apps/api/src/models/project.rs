use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub pm_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRow {
    pub fn status(&self) -> ProjectStatus {
        self.status.parse().unwrap_or(ProjectStatus::Planning)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RequiredSkillRow {
    pub project_id: Uuid,
    pub skill_id: Uuid,
    pub skill_name: String,
    pub min_proficiency: i16,
}

pub const REQUIRED_SKILL_SELECT: &str = r#"
    SELECT prs.project_id, prs.skill_id, s.name AS skill_name, prs.min_proficiency
    FROM project_required_skills prs
    JOIN skills s ON s.id = prs.skill_id
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::Active => "active",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }

    /// Whether the project can still take on people.
    pub fn accepts_staffing(&self) -> bool {
        matches!(self, ProjectStatus::Planning | ProjectStatus::Active)
    }

    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, next),
            (Planning, Active)
                | (Planning, Cancelled)
                | (Active, OnHold)
                | (Active, Completed)
                | (Active, Cancelled)
                | (OnHold, Active)
                | (OnHold, Cancelled)
        )
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(ProjectStatus::Planning),
            "active" => Ok(ProjectStatus::Active),
            "on_hold" => Ok(ProjectStatus::OnHold),
            "completed" => Ok(ProjectStatus::Completed),
            "cancelled" => Ok(ProjectStatus::Cancelled),
            other => Err(format!("unknown project status '{other}'")),
        }
    }
}
