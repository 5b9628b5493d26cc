//! Per-user notifications and the fan-out used by workflow transitions.

pub mod handlers;

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ResourceRequestSubmitted,
    ResourceRequestNeedsHr,
    ResourceRequestApproved,
    ResourceRequestRejected,
    WorkRequestSubmitted,
    WorkRequestApproved,
    WorkRequestRejected,
    AllocationCreated,
    AllocationEnded,
    RequestCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ResourceRequestSubmitted => "resource_request_submitted",
            NotificationKind::ResourceRequestNeedsHr => "resource_request_needs_hr",
            NotificationKind::ResourceRequestApproved => "resource_request_approved",
            NotificationKind::ResourceRequestRejected => "resource_request_rejected",
            NotificationKind::WorkRequestSubmitted => "work_request_submitted",
            NotificationKind::WorkRequestApproved => "work_request_approved",
            NotificationKind::WorkRequestRejected => "work_request_rejected",
            NotificationKind::AllocationCreated => "allocation_created",
            NotificationKind::AllocationEnded => "allocation_ended",
            NotificationKind::RequestCancelled => "request_cancelled",
        }
    }
}

/// Content shared by every recipient of one fan-out.
#[derive(Debug, Clone)]
pub struct NotificationTemplate {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link_entity: Option<&'static str>,
    pub link_id: Option<Uuid>,
}

impl NotificationTemplate {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            link_entity: None,
            link_id: None,
        }
    }

    pub fn link(mut self, entity: &'static str, id: Uuid) -> Self {
        self.link_entity = Some(entity);
        self.link_id = Some(id);
        self
    }
}

/// De-duplicates recipients (keeping first-seen order) and drops the acting user.
pub fn resolve_recipients(candidates: &[Uuid], actor: Option<Uuid>) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::with_capacity(candidates.len());
    for id in candidates {
        if Some(*id) == actor || out.contains(id) {
            continue;
        }
        out.push(*id);
    }
    out
}

/// Inserts one notification per resolved recipient. Runs on the caller's
/// connection so it commits or rolls back with the transition that caused it.
pub async fn fan_out(
    conn: &mut PgConnection,
    candidates: &[Uuid],
    actor: Option<Uuid>,
    template: &NotificationTemplate,
) -> Result<usize, sqlx::Error> {
    let recipients = resolve_recipients(candidates, actor);
    if recipients.is_empty() {
        return Ok(0);
    }

    sqlx::query(
        r#"
        INSERT INTO notifications (user_id, kind, title, message, link_entity, link_id)
        SELECT recipient, $2, $3, $4, $5, $6
        FROM UNNEST($1::uuid[]) AS recipient
        "#,
    )
    .bind(&recipients)
    .bind(template.kind.as_str())
    .bind(&template.title)
    .bind(&template.message)
    .bind(template.link_entity)
    .bind(template.link_id)
    .execute(&mut *conn)
    .await?;

    debug!(
        "Sent {} notification to {} recipient(s)",
        template.kind.as_str(),
        recipients.len()
    );
    Ok(recipients.len())
}

/// Single-recipient form of [`fan_out`].
pub async fn notify(
    conn: &mut PgConnection,
    user_id: Uuid,
    actor: Option<Uuid>,
    template: &NotificationTemplate,
) -> Result<bool, sqlx::Error> {
    Ok(fan_out(conn, &[user_id], actor, template).await? == 1)
}

/// Ids of every HR user; the fallback audience when nobody else is responsible.
pub async fn hr_user_ids(conn: &mut PgConnection) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM users WHERE role = 'hr' ORDER BY created_at")
        .fetch_all(&mut *conn)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;
    use crate::models::user::Role;
    use crate::routes::test_support::seed_user;

    #[test]
    fn test_recipients_are_deduplicated_in_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(resolve_recipients(&[a, b, a, b], None), vec![a, b]);
    }

    #[test]
    fn test_actor_never_notifies_themselves() {
        let actor = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_eq!(resolve_recipients(&[actor, other], Some(actor)), vec![other]);
        assert!(resolve_recipients(&[actor], Some(actor)).is_empty());
    }

    #[test]
    fn test_template_link() {
        let id = Uuid::new_v4();
        let template = NotificationTemplate::new(
            NotificationKind::WorkRequestApproved,
            "Leave approved",
            "Your leave was approved",
        )
        .link("work_request", id);
        assert_eq!(template.link_entity, Some("work_request"));
        assert_eq!(template.link_id, Some(id));
        assert_eq!(template.kind.as_str(), "work_request_approved");
    }

    async fn stored(pool: &PgPool, user_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_fan_out_rolls_back_with_its_transaction(pool: PgPool) {
        let hr = seed_user(&pool, "hr", Role::Hr, None).await;
        let template =
            NotificationTemplate::new(NotificationKind::ResourceRequestNeedsHr, "Waiting", "x");

        let mut tx = pool.begin().await.unwrap();
        assert_eq!(fan_out(&mut tx, &[hr], None, &template).await.unwrap(), 1);
        tx.rollback().await.unwrap();
        assert_eq!(stored(&pool, hr).await, 0);

        let mut tx = pool.begin().await.unwrap();
        fan_out(&mut tx, &[hr, hr], None, &template).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(stored(&pool, hr).await, 1);
    }

    #[sqlx::test]
    async fn test_hr_user_ids_lists_only_hr(pool: PgPool) {
        let hr = seed_user(&pool, "hr", Role::Hr, None).await;
        seed_user(&pool, "dev", Role::Employee, None).await;
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(hr_user_ids(&mut conn).await.unwrap(), vec![hr]);
    }
}
