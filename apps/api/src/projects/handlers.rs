use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::allocation::AllocationRow;
use crate::models::project::{ProjectRow, ProjectStatus, RequiredSkillRow};
use crate::models::user::Role;
use crate::projects::{
    get_project, replace_required_skills, required_skills, staffing_coverage,
    RequiredSkillInput, StaffingCoverage,
};
use crate::skills::user_skill_details;
use crate::state::AppState;
use crate::users::get_user;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Admins may create a project on behalf of a PM.
    pub pm_id: Option<Uuid>,
    #[serde(default)]
    pub required_skills: Vec<RequiredSkillInput>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    pub status: Option<ProjectStatus>,
    pub pm_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetailResponse {
    pub project: ProjectRow,
    pub required_skills: Vec<RequiredSkillRow>,
    pub active_allocations: Vec<AllocationRow>,
    pub coverage: StaffingCoverage,
}

/// POST /api/v1/projects
pub async fn handle_create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectRow>), AppError> {
    auth.require_any(&[Role::Pm])?;
    validate_name(&req.name)?;
    if matches!(req.end_date, Some(end) if end < req.start_date) {
        return Err(AppError::Validation(
            "end_date must not be before start_date".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;

    let pm_id = match req.pm_id {
        Some(pm_id) if pm_id != auth.id() => {
            if !auth.is_admin() {
                return Err(AppError::Forbidden);
            }
            let pm = get_user(&mut tx, pm_id).await?;
            if !matches!(pm.role(), Role::Pm | Role::Admin) {
                return Err(AppError::Validation(format!(
                    "user {pm_id} is not a project manager"
                )));
            }
            pm_id
        }
        _ => auth.id(),
    };

    let project = sqlx::query_as::<_, ProjectRow>(
        r#"
        INSERT INTO projects (name, description, pm_id, start_date, end_date)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(req.name.trim())
    .bind(req.description.as_deref())
    .bind(pm_id)
    .bind(req.start_date)
    .bind(req.end_date)
    .fetch_one(&mut *tx)
    .await?;

    replace_required_skills(&mut tx, project.id, &req.required_skills).await?;
    tx.commit().await?;

    info!("Project {} '{}' created by {}", project.id, project.name, auth.id());
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/v1/projects
pub async fn handle_list(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(params): Query<ListProjectsQuery>,
) -> Result<Json<Vec<ProjectRow>>, AppError> {
    let rows = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT * FROM projects
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::uuid IS NULL OR pm_id = $2)
        ORDER BY start_date DESC, name
        "#,
    )
    .bind(params.status.map(|s| s.as_str()))
    .bind(params.pm_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

/// GET /api/v1/projects/:id
pub async fn handle_get(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectDetailResponse>, AppError> {
    let mut conn = state.db.acquire().await?;
    let project = get_project(&mut conn, id).await?;
    let required = required_skills(&mut conn, &[id]).await?;

    let today = Utc::now().date_naive();
    let active_allocations = sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT * FROM allocations
        WHERE project_id = $1 AND start_date <= $2 AND end_date >= $2
        ORDER BY start_date
        "#,
    )
    .bind(id)
    .bind(today)
    .fetch_all(&mut *conn)
    .await?;

    let mut member_ids: Vec<Uuid> = active_allocations.iter().map(|a| a.user_id).collect();
    member_ids.sort();
    member_ids.dedup();
    let member_skills = user_skill_details(&mut conn, &member_ids).await?;
    let coverage = staffing_coverage(&required, &member_skills);

    Ok(Json(ProjectDetailResponse {
        project,
        required_skills: required,
        active_allocations,
        coverage,
    }))
}

/// PATCH /api/v1/projects/:id
pub async fn handle_update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectRow>, AppError> {
    let mut tx = state.db.begin().await?;
    let project = get_project(&mut tx, id).await?;
    require_owner(&auth, &project)?;

    if let Some(name) = &req.name {
        validate_name(name)?;
    }
    if let Some(next) = req.status {
        let current = project.status();
        if next != current && !current.can_transition_to(next) {
            return Err(AppError::UnprocessableEntity(format!(
                "project cannot move from {} to {}",
                current.as_str(),
                next.as_str()
            )));
        }
    }
    let end_date = req.end_date.or(project.end_date);
    if matches!(end_date, Some(end) if end < project.start_date) {
        return Err(AppError::Validation(
            "end_date must not be before start_date".to_string(),
        ));
    }

    let updated = sqlx::query_as::<_, ProjectRow>(
        r#"
        UPDATE projects
        SET name = $1, description = $2, end_date = $3, status = $4, updated_at = now()
        WHERE id = $5
        RETURNING *
        "#,
    )
    .bind(req.name.as_deref().map(str::trim).unwrap_or(&project.name))
    .bind(req.description.as_deref().or(project.description.as_deref()))
    .bind(end_date)
    .bind(req.status.map(|s| s.as_str()).unwrap_or(&project.status))
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    if updated.status != project.status {
        info!(
            "Project {} moved from {} to {}",
            id, project.status, updated.status
        );
    }
    Ok(Json(updated))
}

/// PUT /api/v1/projects/:id/skills
pub async fn handle_replace_skills(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(skills): Json<Vec<RequiredSkillInput>>,
) -> Result<Json<Vec<RequiredSkillRow>>, AppError> {
    let mut tx = state.db.begin().await?;
    let project = get_project(&mut tx, id).await?;
    require_owner(&auth, &project)?;
    if project.status().is_final() {
        return Err(AppError::UnprocessableEntity(format!(
            "project is {}",
            project.status
        )));
    }

    replace_required_skills(&mut tx, id, &skills).await?;
    let rows = required_skills(&mut tx, &[id]).await?;
    tx.commit().await?;
    Ok(Json(rows))
}

fn require_owner(auth: &AuthUser, project: &ProjectRow) -> Result<(), AppError> {
    if project.pm_id == auth.id() || auth.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

fn validate_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    Ok(())
}
