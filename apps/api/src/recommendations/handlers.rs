use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::allocations::{allocations_active_on, loads_by_user, MAX_LOAD_PERCENT};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::project::ProjectRow;
use crate::models::user::{Role, UserRow};
use crate::projects::{ensure_accepts_staffing, get_project, required_skills};
use crate::recommendations::cache::{self, Subject};
use crate::recommendations::{Candidate, Opening, Recommendation};
use crate::skills::user_skill_details;
use crate::state::AppState;
use crate::users::get_user;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationList {
    pub subject_id: Uuid,
    pub backend: &'static str,
    pub cached: bool,
    pub recommendations: Vec<Recommendation>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Every user with spare capacity today who is not already on `project_id`.
async fn load_candidates(
    conn: &mut PgConnection,
    project_id: Uuid,
) -> Result<Vec<Candidate>, sqlx::Error> {
    let today = Utc::now().date_naive();
    let active = allocations_active_on(conn, today).await?;
    let loads = loads_by_user(&active, today);
    let on_project: HashSet<Uuid> = active
        .iter()
        .filter(|a| a.project_id == project_id)
        .map(|a| a.user_id)
        .collect();

    let users = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY name")
        .fetch_all(&mut *conn)
        .await?;
    let users: Vec<UserRow> = users
        .into_iter()
        .filter(|u| !on_project.contains(&u.id))
        .filter(|u| loads.get(&u.id).copied().unwrap_or(0) < MAX_LOAD_PERCENT)
        .collect();

    let ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
    let skills = user_skill_details(conn, &ids).await?;

    Ok(users
        .into_iter()
        .map(|u| Candidate {
            user_id: u.id,
            current_load: loads.get(&u.id).copied().unwrap_or(0),
            skills: skills.iter().filter(|s| s.user_id == u.id).cloned().collect(),
            name: u.name,
        })
        .collect())
}

/// Projects still taking staff that the user is not already working on.
async fn load_openings(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<Opening>, sqlx::Error> {
    let today = Utc::now().date_naive();
    let projects = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT p.* FROM projects p
        WHERE p.status IN ('planning', 'active')
          AND NOT EXISTS (
              SELECT 1 FROM allocations a
              WHERE a.project_id = p.id AND a.user_id = $1
                AND a.start_date <= $2 AND a.end_date >= $2
          )
        ORDER BY p.name
        "#,
    )
    .bind(user_id)
    .bind(today)
    .fetch_all(&mut *conn)
    .await?;

    let ids: Vec<Uuid> = projects.iter().map(|p| p.id).collect();
    let required = required_skills(conn, &ids).await?;

    Ok(projects
        .into_iter()
        .map(|p| Opening {
            project_id: p.id,
            required: required.iter().filter(|r| r.project_id == p.id).cloned().collect(),
            name: p.name,
        })
        .collect())
}

/// GET /api/v1/projects/:id/recommendations
pub async fn handle_for_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Query(params): Query<RecommendationQuery>,
) -> Result<Json<RecommendationList>, AppError> {
    auth.require_any(&[Role::Pm, Role::Hr])?;
    let limit = clamp_limit(params.limit);
    let backend = state.recommender.backend();
    let key = cache::cache_key(Subject::Project(project_id), backend);

    let mut conn = state.db.acquire().await?;
    let project = get_project(&mut conn, project_id).await?;
    ensure_accepts_staffing(&project)?;

    let (mut recommendations, cached) = match cache::get(&state.redis, &key).await {
        Some(recs) => (recs, true),
        None => {
            let opening = Opening {
                project_id: project.id,
                required: required_skills(&mut conn, &[project.id]).await?,
                name: project.name,
            };
            let candidates = load_candidates(&mut conn, project_id).await?;
            drop(conn);

            let recs = state
                .recommender
                .recommend_users_for_project(&opening, &candidates)
                .await?;
            cache::put(
                &state.redis,
                &key,
                &recs,
                state.config.recommendation_cache_ttl_secs,
            )
            .await;
            info!(
                "Ranked {} candidate(s) for project {} with {}",
                recs.len(),
                project_id,
                backend
            );
            (recs, false)
        }
    };

    recommendations.truncate(limit);
    Ok(Json(RecommendationList {
        subject_id: project_id,
        backend,
        cached,
        recommendations,
    }))
}

/// GET /api/v1/users/:id/recommendations
pub async fn handle_for_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Query(params): Query<RecommendationQuery>,
) -> Result<Json<RecommendationList>, AppError> {
    auth.require_self_or_any(user_id, &[Role::LineManager, Role::Hr])?;
    let limit = clamp_limit(params.limit);
    let backend = state.recommender.backend();
    let key = cache::cache_key(Subject::User(user_id), backend);

    let (mut recommendations, cached) = match cache::get(&state.redis, &key).await {
        Some(recs) => (recs, true),
        None => {
            let mut conn = state.db.acquire().await?;
            let user = get_user(&mut conn, user_id).await?;
            let today = Utc::now().date_naive();
            let active = allocations_active_on(&mut conn, today).await?;
            let candidate = Candidate {
                user_id: user.id,
                current_load: loads_by_user(&active, today)
                    .get(&user.id)
                    .copied()
                    .unwrap_or(0),
                skills: user_skill_details(&mut conn, &[user.id]).await?,
                name: user.name,
            };
            let openings = load_openings(&mut conn, user_id).await?;
            drop(conn);

            let recs = state
                .recommender
                .recommend_projects_for_user(&candidate, &openings)
                .await?;
            cache::put(
                &state.redis,
                &key,
                &recs,
                state.config.recommendation_cache_ttl_secs,
            )
            .await;
            (recs, false)
        }
    };

    recommendations.truncate(limit);
    Ok(Json(RecommendationList {
        subject_id: user_id,
        backend,
        cached,
        recommendations,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use sqlx::PgPool;

    use super::*;
    use crate::routes::test_support::{seed_project, seed_user, send, set_project_status, state_with};

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(500)), MAX_LIMIT);
        assert_eq!(clamp_limit(Some(5)), 5);
    }

    #[sqlx::test]
    async fn test_closed_project_gets_no_recommendations(pool: PgPool) {
        let state = state_with(pool.clone());
        let pm = seed_user(&pool, "pm", Role::Pm, None).await;
        seed_user(&pool, "dev", Role::Employee, None).await;
        let project = seed_project(&pool, pm, "active").await;
        let path = format!("/api/v1/projects/{project}/recommendations");

        let (status, body) = send(&state, Method::GET, &path, "pm", None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["cached"], false);

        set_project_status(&pool, project, "cancelled").await;
        let (status, _) = send(&state, Method::GET, &path, "pm", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
