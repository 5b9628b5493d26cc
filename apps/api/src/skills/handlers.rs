use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use aws_sdk_s3::primitives::ByteStream;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::skill::{SkillRow, UserSkillDetail, UserSkillRow};
use crate::models::user::Role;
use crate::skills::{
    aggregate_distribution, all_skills, normalize_aliases, user_skill_details,
    validate_proficiency, SkillDistribution,
};
use crate::state::AppState;
use crate::uploads::{read_file_field, sanitize_file_name};

const TAXONOMY_ROLES: &[Role] = &[Role::Hr];
const INSIGHT_ROLES: &[Role] = &[Role::Pm, Role::LineManager, Role::Hr];

#[derive(Debug, Deserialize)]
pub struct SearchSkillsQuery {
    pub q: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSkillRequest {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSkillRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub aliases: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertUserSkillRequest {
    pub proficiency: i16,
    #[serde(default)]
    pub is_desired: bool,
}

#[derive(Debug, Deserialize)]
pub struct DistributionQuery {
    pub department: Option<String>,
}

/// GET /api/v1/skills
pub async fn handle_search(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(params): Query<SearchSkillsQuery>,
) -> Result<Json<Vec<SkillRow>>, AppError> {
    let q = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());

    let rows = sqlx::query_as::<_, SkillRow>(
        r#"
        SELECT * FROM skills
        WHERE ($1::text IS NULL
               OR name ILIKE '%' || $1 || '%'
               OR EXISTS (SELECT 1 FROM unnest(aliases) AS a WHERE a LIKE '%' || lower($1) || '%'))
          AND ($2::text IS NULL OR category = $2)
        ORDER BY name
        "#,
    )
    .bind(q)
    .bind(params.category.as_deref())
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

/// POST /api/v1/skills
pub async fn handle_create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateSkillRequest>,
) -> Result<(StatusCode, Json<SkillRow>), AppError> {
    auth.require_any(TAXONOMY_ROLES)?;
    let name = required_text("name", &req.name)?;
    let category = required_text("category", &req.category)?;
    let aliases = normalize_aliases(name, &req.aliases);

    let skill = sqlx::query_as::<_, SkillRow>(
        "INSERT INTO skills (name, category, aliases) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(name)
    .bind(category)
    .bind(&aliases)
    .fetch_one(&state.db)
    .await
    .map_err(|e| unique_violation(e, name))?;

    info!("Skill '{}' added to taxonomy by {}", skill.name, auth.id());
    Ok((StatusCode::CREATED, Json(skill)))
}

/// PATCH /api/v1/skills/:id
pub async fn handle_update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSkillRequest>,
) -> Result<Json<SkillRow>, AppError> {
    auth.require_any(TAXONOMY_ROLES)?;

    let existing = sqlx::query_as::<_, SkillRow>("SELECT * FROM skills WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Skill {id} not found")))?;

    let name = match &req.name {
        Some(name) => required_text("name", name)?,
        None => existing.name.as_str(),
    };
    let category = match &req.category {
        Some(category) => required_text("category", category)?,
        None => existing.category.as_str(),
    };
    let aliases = normalize_aliases(name, req.aliases.as_ref().unwrap_or(&existing.aliases));

    let skill = sqlx::query_as::<_, SkillRow>(
        r#"
        UPDATE skills SET name = $1, category = $2, aliases = $3, updated_at = now()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(category)
    .bind(&aliases)
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| unique_violation(e, name))?;

    Ok(Json(skill))
}

/// DELETE /api/v1/skills/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.require_any(TAXONOMY_ROLES)?;
    let result = sqlx::query("DELETE FROM skills WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Skill {id} not found")));
    }
    info!("Skill {id} removed from taxonomy by {}", auth.id());
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/skills/distribution
pub async fn handle_distribution(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<DistributionQuery>,
) -> Result<Json<SkillDistribution>, AppError> {
    auth.require_any(INSIGHT_ROLES)?;

    let mut conn = state.db.acquire().await?;
    let taxonomy = all_skills(&mut conn).await?;
    let user_skills = sqlx::query_as::<_, UserSkillDetail>(
        r#"
        SELECT us.user_id, us.skill_id, s.name AS skill_name, s.category,
               us.proficiency, us.is_desired, us.proof_keys, us.updated_at
        FROM user_skills us
        JOIN skills s ON s.id = us.skill_id
        JOIN users u ON u.id = us.user_id
        WHERE ($1::text IS NULL OR u.department = $1)
        "#,
    )
    .bind(params.department.as_deref())
    .fetch_all(&mut *conn)
    .await?;

    Ok(Json(aggregate_distribution(&taxonomy, &user_skills)))
}

/// GET /api/v1/users/:id/skills
pub async fn handle_list_user_skills(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<UserSkillDetail>>, AppError> {
    auth.require_self_or_any(user_id, INSIGHT_ROLES)?;
    let mut conn = state.db.acquire().await?;
    Ok(Json(user_skill_details(&mut conn, &[user_id]).await?))
}

/// PUT /api/v1/users/me/skills/:skill_id
pub async fn handle_upsert_my_skill(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(skill_id): Path<Uuid>,
    Json(req): Json<UpsertUserSkillRequest>,
) -> Result<Json<UserSkillRow>, AppError> {
    validate_proficiency(req.proficiency)?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM skills WHERE id = $1)")
        .bind(skill_id)
        .fetch_one(&state.db)
        .await?;
    if !exists {
        return Err(AppError::NotFound(format!("Skill {skill_id} not found")));
    }

    let row = sqlx::query_as::<_, UserSkillRow>(
        r#"
        INSERT INTO user_skills (user_id, skill_id, proficiency, is_desired)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, skill_id) DO UPDATE
            SET proficiency = EXCLUDED.proficiency,
                is_desired = EXCLUDED.is_desired,
                updated_at = now()
        RETURNING *
        "#,
    )
    .bind(auth.id())
    .bind(skill_id)
    .bind(req.proficiency)
    .bind(req.is_desired)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(row))
}

/// DELETE /api/v1/users/me/skills/:skill_id
pub async fn handle_remove_my_skill(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(skill_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query("DELETE FROM user_skills WHERE user_id = $1 AND skill_id = $2")
        .bind(auth.id())
        .bind(skill_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Skill {skill_id} is not on your profile"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/users/me/skills/:skill_id/proofs
///
/// Stores an uploaded certificate or work sample and links it to the user's skill.
pub async fn handle_upload_proof(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(skill_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UserSkillRow>), AppError> {
    let has_skill: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM user_skills WHERE user_id = $1 AND skill_id = $2)",
    )
    .bind(auth.id())
    .bind(skill_id)
    .fetch_one(&state.db)
    .await?;
    if !has_skill {
        return Err(AppError::NotFound(format!(
            "Skill {skill_id} is not on your profile"
        )));
    }

    let upload = read_file_field(&mut multipart).await?;

    let key = format!(
        "proofs/{}/{}/{}-{}",
        auth.id(),
        skill_id,
        Uuid::new_v4(),
        sanitize_file_name(&upload.file_name)
    );
    state
        .s3
        .put_object()
        .bucket(&state.config.s3_bucket)
        .key(&key)
        .body(ByteStream::from(upload.data))
        .content_type(upload.content_type)
        .send()
        .await
        .map_err(|e| AppError::S3(format!("proof upload failed: {e}")))?;
    info!("Uploaded skill proof to s3://{}/{}", state.config.s3_bucket, key);

    let row = sqlx::query_as::<_, UserSkillRow>(
        r#"
        UPDATE user_skills SET proof_keys = array_append(proof_keys, $1), updated_at = now()
        WHERE user_id = $2 AND skill_id = $3
        RETURNING *
        "#,
    )
    .bind(&key)
    .bind(auth.id())
    .bind(skill_id)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

fn required_text<'a>(field: &str, value: &'a str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed)
}

fn unique_violation(err: sqlx::Error, name: &str) -> AppError {
    let is_unique = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505");
    if is_unique {
        AppError::Conflict(format!("a skill named '{name}' already exists"))
    } else {
        AppError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_proficiency_bounds() {
        assert!(validate_proficiency(1).is_ok());
        assert!(validate_proficiency(5).is_ok());
        assert!(validate_proficiency(0).is_err());
        assert!(validate_proficiency(6).is_err());
    }

    #[test]
    fn test_required_text_trims() {
        assert_eq!(required_text("name", "  Rust ").unwrap(), "Rust");
        assert!(required_text("name", "   ").is_err());
    }
}
