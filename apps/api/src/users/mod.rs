pub mod handlers;

use sqlx::PgConnection;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::{Role, UserRow};

pub async fn get_user(conn: &mut PgConnection, id: Uuid) -> Result<UserRow, AppError> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {id} not found")))
}

/// Whether `candidate` appears in the management chain above `user_id`
/// (or is `user_id` itself). Used to refuse manager assignments that would loop.
pub async fn is_in_management_chain(
    conn: &mut PgConnection,
    start_manager: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        WITH RECURSIVE chain(id, manager_id, depth) AS (
            SELECT id, manager_id, 0 FROM users WHERE id = $1
            UNION ALL
            SELECT u.id, u.manager_id, c.depth + 1
            FROM users u JOIN chain c ON u.id = c.manager_id
            WHERE c.depth < 64
        )
        SELECT EXISTS (SELECT 1 FROM chain WHERE id = $2)
        "#,
    )
    .bind(start_manager)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await
}

/// The user's line manager, or every HR user when no manager is set.
pub async fn approvers_for(
    conn: &mut PgConnection,
    user: &UserRow,
) -> Result<Vec<Uuid>, sqlx::Error> {
    match user.manager_id {
        Some(manager_id) => Ok(vec![manager_id]),
        None => crate::notifications::hr_user_ids(conn).await,
    }
}

/// Whether the actor may take the line-manager decision for a subject whose
/// manager is `manager_id`. Without a manager the decision falls to HR.
pub fn is_line_approver(actor_id: Uuid, actor_role: Role, manager_id: Option<Uuid>) -> bool {
    if actor_role == Role::Admin {
        return true;
    }
    match manager_id {
        Some(manager_id) => manager_id == actor_id,
        None => actor_role == Role::Hr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_approver_is_the_manager() {
        let manager = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(is_line_approver(manager, Role::Employee, Some(manager)));
        assert!(!is_line_approver(other, Role::LineManager, Some(manager)));
        assert!(!is_line_approver(other, Role::Hr, Some(manager)));
        assert!(is_line_approver(other, Role::Admin, Some(manager)));
    }

    #[test]
    fn test_hr_decides_when_no_manager() {
        let actor = Uuid::new_v4();
        assert!(is_line_approver(actor, Role::Hr, None));
        assert!(!is_line_approver(actor, Role::LineManager, None));
    }
}
