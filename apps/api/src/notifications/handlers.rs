use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::notification::NotificationRow;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

/// GET /api/v1/notifications
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<ListNotificationsQuery>,
) -> Result<Json<Vec<NotificationRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let rows = sqlx::query_as::<_, NotificationRow>(
        r#"
        SELECT * FROM notifications
        WHERE user_id = $1 AND (NOT $2 OR is_read = FALSE)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(auth.id())
    .bind(params.unread_only)
    .bind(limit)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

/// GET /api/v1/notifications/unread-count
pub async fn handle_unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let unread = unread_count(&state.db, auth.id()).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

/// POST /api/v1/notifications/:id/read
pub async fn handle_mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, updated_at = now() WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(auth.id())
    .execute(&state.db)
    .await?;

    // Someone else's notification looks exactly like a missing one.
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Notification {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/notifications/read-all
pub async fn handle_mark_all_read(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<MarkAllReadResponse>, AppError> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, updated_at = now() WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(auth.id())
    .execute(&state.db)
    .await?;
    Ok(Json(MarkAllReadResponse {
        updated: result.rows_affected(),
    }))
}

pub async fn unread_count(pool: &sqlx::PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use sqlx::PgPool;

    use super::*;
    use crate::models::user::Role;
    use crate::notifications::{notify, NotificationKind, NotificationTemplate};
    use crate::routes::test_support::{seed_user, send, state_with};

    async fn seed_notification(pool: &PgPool, user_id: Uuid) -> Uuid {
        let template = NotificationTemplate::new(
            NotificationKind::AllocationCreated,
            "New allocation",
            "You are allocated to 'Atlas' at 50%",
        );
        let mut conn = pool.acquire().await.unwrap();
        assert!(notify(&mut conn, user_id, None, &template).await.unwrap());
        sqlx::query_scalar("SELECT id FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_marking_someone_elses_notification_is_not_found(pool: PgPool) {
        let state = state_with(pool.clone());
        let owner = seed_user(&pool, "owner", Role::Employee, None).await;
        seed_user(&pool, "other", Role::Hr, None).await;
        let id = seed_notification(&pool, owner).await;

        let path = format!("/api/v1/notifications/{id}/read");
        let (status, _) = send(&state, Method::POST, &path, "other", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(unread_count(&pool, owner).await.unwrap(), 1);

        let (status, _) = send(&state, Method::POST, &path, "owner", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(unread_count(&pool, owner).await.unwrap(), 0);
    }
}
