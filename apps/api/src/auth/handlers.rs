use axum::{extract::State, Json};
use tracing::info;

use crate::auth::Identity;
use crate::errors::AppError;
use crate::models::user::{Role, UserRow};
use crate::state::AppState;

/// POST /api/v1/auth/session
///
/// Maps the token subject onto a user record, creating it on first sign-in.
/// Email and display name follow the identity provider on every sign-in;
/// the role is only set at creation.
pub async fn handle_sign_in(
    State(state): State<AppState>,
    Identity(claims): Identity,
) -> Result<Json<UserRow>, AppError> {
    let initial_role = if state.config.is_bootstrap_admin(&claims.email) {
        Role::Admin
    } else {
        Role::Employee
    };

    let user = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO users (external_id, email, name, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (external_id) DO UPDATE
            SET email = EXCLUDED.email, name = EXCLUDED.name, updated_at = now()
        RETURNING *
        "#,
    )
    .bind(&claims.sub)
    .bind(claims.email.trim())
    .bind(claims.name.trim())
    .bind(initial_role.as_str())
    .fetch_one(&state.db)
    .await?;

    info!("User {} signed in as {}", user.id, user.role);
    Ok(Json(user))
}
