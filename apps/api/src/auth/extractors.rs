use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::debug;
use uuid::Uuid;

use crate::auth::{bearer_token, decode_claims, Claims};
use crate::errors::AppError;
use crate::models::user::{Role, UserRow};
use crate::state::AppState;

/// Verified token claims without a user lookup. Only sign-in uses this directly.
#[derive(Debug, Clone)]
pub struct Identity(pub Claims);

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let claims = decode_claims(token, &state.config.jwt_secret).map_err(|e| {
            debug!("Rejected token: {e}");
            AppError::Unauthorized
        })?;
        Ok(Identity(claims))
    }
}

/// The signed-in user, loaded from the database on every request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: UserRow,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Identity(claims) = Identity::from_request_parts(parts, state).await?;

        let user = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE external_id = $1")
            .bind(&claims.sub)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| {
                debug!("No user record for subject {}; sign-in required", claims.sub);
                AppError::Unauthorized
            })?;

        Ok(AuthUser { user })
    }
}

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role()
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Role::Admin
    }

    /// Whether the user holds one of `roles`. Admins hold every role.
    pub fn has_any(&self, roles: &[Role]) -> bool {
        self.is_admin() || roles.contains(&self.role())
    }

    pub fn require_any(&self, roles: &[Role]) -> Result<(), AppError> {
        if self.has_any(roles) {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Passes when acting on one's own record or when holding one of `roles`.
    pub fn require_self_or_any(&self, user_id: Uuid, roles: &[Role]) -> Result<(), AppError> {
        if self.id() == user_id {
            Ok(())
        } else {
            self.require_any(roles)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn auth_user(role: Role) -> AuthUser {
        AuthUser {
            user: UserRow {
                id: Uuid::new_v4(),
                external_id: "oauth|1".to_string(),
                email: "a@example.com".to_string(),
                name: "A".to_string(),
                role: role.as_str().to_string(),
                department: None,
                job_title: None,
                availability: "available".to_string(),
                manager_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_admin_passes_every_role_check() {
        let admin = auth_user(Role::Admin);
        assert!(admin.require_any(&[Role::Hr]).is_ok());
        assert!(admin.require_any(&[]).is_ok());
    }

    #[test]
    fn test_employee_is_forbidden_from_hr_actions() {
        let employee = auth_user(Role::Employee);
        assert!(matches!(
            employee.require_any(&[Role::Hr]),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn test_self_access_is_always_allowed() {
        let employee = auth_user(Role::Employee);
        assert!(employee.require_self_or_any(employee.id(), &[]).is_ok());
        assert!(employee
            .require_self_or_any(Uuid::new_v4(), &[Role::Hr])
            .is_err());
    }
}
