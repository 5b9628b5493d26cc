//! Projects, their required skills, and staffing coverage.

pub mod handlers;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::project::{ProjectRow, RequiredSkillRow, REQUIRED_SKILL_SELECT};
use crate::models::skill::UserSkillDetail;

pub async fn get_project(conn: &mut PgConnection, id: Uuid) -> Result<ProjectRow, AppError> {
    sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {id} not found")))
}

/// Loads a project that is about to receive staff and holds a share lock on it
/// until the transaction ends, so its status cannot change underneath.
pub async fn staffing_project(conn: &mut PgConnection, id: Uuid) -> Result<ProjectRow, AppError> {
    let project = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1 FOR SHARE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {id} not found")))?;
    ensure_accepts_staffing(&project)?;
    Ok(project)
}

pub fn ensure_accepts_staffing(project: &ProjectRow) -> Result<(), AppError> {
    if project.status().accepts_staffing() {
        Ok(())
    } else {
        Err(AppError::UnprocessableEntity(format!(
            "project '{}' is {} and cannot take new staff",
            project.name, project.status
        )))
    }
}

pub async fn required_skills(
    conn: &mut PgConnection,
    project_ids: &[Uuid],
) -> Result<Vec<RequiredSkillRow>, sqlx::Error> {
    sqlx::query_as::<_, RequiredSkillRow>(&format!(
        "{REQUIRED_SKILL_SELECT} WHERE prs.project_id = ANY($1) ORDER BY s.name"
    ))
    .bind(project_ids)
    .fetch_all(&mut *conn)
    .await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredSkillInput {
    pub skill_id: Uuid,
    pub min_proficiency: i16,
}

pub fn validate_required_skills(skills: &[RequiredSkillInput]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for skill in skills {
        if !(1..=5).contains(&skill.min_proficiency) {
            return Err(AppError::Validation(format!(
                "min_proficiency for skill {} must be between 1 and 5",
                skill.skill_id
            )));
        }
        if !seen.insert(skill.skill_id) {
            return Err(AppError::Validation(format!(
                "skill {} is listed more than once",
                skill.skill_id
            )));
        }
    }
    Ok(())
}

/// Replaces the project's required skills. Unknown skill ids are rejected.
pub async fn replace_required_skills(
    conn: &mut PgConnection,
    project_id: Uuid,
    skills: &[RequiredSkillInput],
) -> Result<(), AppError> {
    validate_required_skills(skills)?;

    let ids: Vec<Uuid> = skills.iter().map(|s| s.skill_id).collect();
    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skills WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_one(&mut *conn)
        .await?;
    if known != ids.len() as i64 {
        return Err(AppError::Validation(
            "required_skills references an unknown skill".to_string(),
        ));
    }

    sqlx::query("DELETE FROM project_required_skills WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *conn)
        .await?;

    let levels: Vec<i16> = skills.iter().map(|s| s.min_proficiency).collect();
    sqlx::query(
        r#"
        INSERT INTO project_required_skills (project_id, skill_id, min_proficiency)
        SELECT $1, skill_id, min_proficiency
        FROM UNNEST($2::uuid[], $3::smallint[]) AS t(skill_id, min_proficiency)
        "#,
    )
    .bind(project_id)
    .bind(&ids)
    .bind(&levels)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillCoverage {
    pub skill_id: Uuid,
    pub skill_name: String,
    pub min_proficiency: i16,
    pub best_proficiency: Option<i16>,
    /// Members holding the skill at or above the minimum.
    pub covered_by: Vec<Uuid>,
    pub covered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffingCoverage {
    /// covered / required; 1.0 when nothing is required.
    pub ratio: f64,
    pub skills: Vec<SkillCoverage>,
}

/// Checks each required skill against the skills of the allocated members.
pub fn staffing_coverage(
    required: &[RequiredSkillRow],
    member_skills: &[UserSkillDetail],
) -> StaffingCoverage {
    let skills: Vec<SkillCoverage> = required
        .iter()
        .map(|req| {
            let holders: Vec<&UserSkillDetail> = member_skills
                .iter()
                .filter(|s| s.skill_id == req.skill_id && !s.is_desired)
                .collect();
            let best_proficiency = holders.iter().map(|s| s.proficiency).max();
            let covered_by: Vec<Uuid> = holders
                .iter()
                .filter(|s| s.proficiency >= req.min_proficiency)
                .map(|s| s.user_id)
                .collect();
            SkillCoverage {
                skill_id: req.skill_id,
                skill_name: req.skill_name.clone(),
                min_proficiency: req.min_proficiency,
                best_proficiency,
                covered: !covered_by.is_empty(),
                covered_by,
            }
        })
        .collect();

    let ratio = if skills.is_empty() {
        1.0
    } else {
        skills.iter().filter(|s| s.covered).count() as f64 / skills.len() as f64
    };

    StaffingCoverage { ratio, skills }
}
