//! Allocation load arithmetic and capacity checks.

pub mod handlers;

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::allocation::AllocationRow;
use crate::models::user::Availability;

pub const MAX_LOAD_PERCENT: i32 = 100;

/// Summed percentage of the allocations active on `day`.
pub fn load_on(allocations: &[AllocationRow], day: NaiveDate) -> i32 {
    allocations
        .iter()
        .filter(|a| a.is_active_on(day))
        .map(|a| a.percentage)
        .sum()
}

pub fn free_capacity(load: i32) -> i32 {
    (MAX_LOAD_PERCENT - load).max(0)
}

/// Load per user on `day`. Users without an active allocation are absent.
pub fn loads_by_user(allocations: &[AllocationRow], day: NaiveDate) -> HashMap<Uuid, i32> {
    let mut loads: HashMap<Uuid, i32> = HashMap::new();
    for allocation in allocations.iter().filter(|a| a.is_active_on(day)) {
        *loads.entry(allocation.user_id).or_default() += allocation.percentage;
    }
    loads
}

/// The highest load on any day in `[start, end]`.
///
/// Load only rises where an allocation begins, so it is enough to sample the
/// window start and every allocation start inside the window.
pub fn peak_load(allocations: &[AllocationRow], start: NaiveDate, end: NaiveDate) -> i32 {
    let mut samples = vec![start];
    samples.extend(
        allocations
            .iter()
            .map(|a| a.start_date)
            .filter(|d| *d > start && *d <= end),
    );
    samples
        .into_iter()
        .map(|day| load_on(allocations, day))
        .max()
        .unwrap_or(0)
}

pub fn validate_span(percentage: i32, start: NaiveDate, end: NaiveDate) -> Result<(), AppError> {
    if !(1..=MAX_LOAD_PERCENT).contains(&percentage) {
        return Err(AppError::Validation(
            "percentage must be between 1 and 100".to_string(),
        ));
    }
    if end < start {
        return Err(AppError::Validation(
            "end_date must not be before start_date".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityCheck {
    pub existing_peak: i32,
    pub requested: i32,
}

impl CapacityCheck {
    pub fn fits(&self) -> bool {
        self.existing_peak + self.requested <= MAX_LOAD_PERCENT
    }

    pub fn describe(&self) -> String {
        format!(
            "user is already allocated {}% at peak in that period; {}% more would exceed {}%",
            self.existing_peak, self.requested, MAX_LOAD_PERCENT
        )
    }
}

pub async fn allocations_overlapping(
    conn: &mut PgConnection,
    user_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<AllocationRow>, sqlx::Error> {
    sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT * FROM allocations
        WHERE user_id = $1 AND start_date <= $3 AND end_date >= $2
        ORDER BY start_date
        "#,
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .fetch_all(&mut *conn)
    .await
}

pub async fn allocations_active_on(
    conn: &mut PgConnection,
    day: NaiveDate,
) -> Result<Vec<AllocationRow>, sqlx::Error> {
    sqlx::query_as::<_, AllocationRow>(
        "SELECT * FROM allocations WHERE start_date <= $1 AND end_date >= $1",
    )
    .bind(day)
    .fetch_all(&mut *conn)
    .await
}

/// Takes the row lock on the user. Every writer of that user's allocations
/// goes through here first, so capacity checks for one user run one at a time.
pub async fn lock_user_allocations(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Must run inside the transaction that inserts the allocation; the user lock
/// it takes is held until that transaction ends.
pub async fn check_capacity(
    conn: &mut PgConnection,
    user_id: Uuid,
    percentage: i32,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<CapacityCheck, sqlx::Error> {
    lock_user_allocations(conn, user_id).await?;
    let existing = allocations_overlapping(conn, user_id, start, end).await?;
    Ok(CapacityCheck {
        existing_peak: peak_load(&existing, start, end),
        requested: percentage,
    })
}

pub struct NewAllocation {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub percentage: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub resource_request_id: Option<Uuid>,
}

pub async fn insert_allocation(
    conn: &mut PgConnection,
    new: NewAllocation,
) -> Result<AllocationRow, sqlx::Error> {
    let row = sqlx::query_as::<_, AllocationRow>(
        r#"
        INSERT INTO allocations
            (user_id, project_id, percentage, start_date, end_date, resource_request_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(new.user_id)
    .bind(new.project_id)
    .bind(new.percentage)
    .bind(new.start_date)
    .bind(new.end_date)
    .bind(new.resource_request_id)
    .fetch_one(&mut *conn)
    .await?;

    info!(
        "Allocated user {} to project {} at {}% ({} – {})",
        row.user_id, row.project_id, row.percentage, row.start_date, row.end_date
    );
    Ok(row)
}

/// Re-derives `users.availability` from today's load.
pub async fn recompute_availability(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Availability, sqlx::Error> {
    let today = Utc::now().date_naive();
    let load: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(percentage), 0)::BIGINT FROM allocations
        WHERE user_id = $1 AND start_date <= $2 AND end_date >= $2
        "#,
    )
    .bind(user_id)
    .bind(today)
    .fetch_one(&mut *conn)
    .await?;

    let availability = Availability::from_load(load as i32);
    sqlx::query("UPDATE users SET availability = $1, updated_at = now() WHERE id = $2")
        .bind(availability.as_str())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(availability)
}


#[cfg(test)]
mod tests {
    use super::test_support::{allocation, day};
    use super::*;

    #[test]
    fn test_load_on_counts_inclusive_bounds() {
        let user = Uuid::new_v4();
        let allocs = vec![allocation(
            user,
            Uuid::new_v4(),
            50,
            day(2025, 1, 1),
            day(2025, 1, 31),
        )];
        assert_eq!(load_on(&allocs, day(2025, 1, 1)), 50);
        assert_eq!(load_on(&allocs, day(2025, 1, 31)), 50);
        assert_eq!(load_on(&allocs, day(2025, 2, 1)), 0);
    }

    #[test]
    fn test_peak_load_finds_overlap_inside_window() {
        let user = Uuid::new_v4();
        let allocs = vec![
            allocation(user, Uuid::new_v4(), 50, day(2025, 1, 1), day(2025, 3, 31)),
            allocation(user, Uuid::new_v4(), 30, day(2025, 2, 15), day(2025, 2, 28)),
            allocation(user, Uuid::new_v4(), 40, day(2025, 4, 1), day(2025, 4, 30)),
        ];
        // Only the first two overlap, on 2025-02-15..28
        assert_eq!(peak_load(&allocs, day(2025, 1, 1), day(2025, 4, 30)), 80);
        assert_eq!(peak_load(&allocs, day(2025, 1, 1), day(2025, 2, 14)), 50);
    }

    #[test]
    fn test_peak_load_includes_allocations_started_before_window() {
        let user = Uuid::new_v4();
        let allocs = vec![allocation(
            user,
            Uuid::new_v4(),
            60,
            day(2024, 6, 1),
            day(2025, 6, 1),
        )];
        assert_eq!(peak_load(&allocs, day(2025, 1, 1), day(2025, 1, 31)), 60);
    }

    #[test]
    fn test_peak_load_empty() {
        assert_eq!(peak_load(&[], day(2025, 1, 1), day(2025, 12, 31)), 0);
    }

    #[test]
    fn test_capacity_check_boundary() {
        assert!(CapacityCheck {
            existing_peak: 60,
            requested: 40
        }
        .fits());
        assert!(!CapacityCheck {
            existing_peak: 60,
            requested: 41
        }
        .fits());
    }

    #[test]
    fn test_validate_span() {
        assert!(validate_span(50, day(2025, 1, 1), day(2025, 1, 1)).is_ok());
        assert!(validate_span(0, day(2025, 1, 1), day(2025, 1, 2)).is_err());
        assert!(validate_span(101, day(2025, 1, 1), day(2025, 1, 2)).is_err());
        assert!(validate_span(50, day(2025, 1, 2), day(2025, 1, 1)).is_err());
    }

    #[test]
    fn test_loads_by_user_and_free_capacity() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let allocs = vec![
            allocation(a, Uuid::new_v4(), 60, day(2025, 1, 1), day(2025, 1, 31)),
            allocation(a, Uuid::new_v4(), 50, day(2025, 1, 10), day(2025, 1, 20)),
            allocation(b, Uuid::new_v4(), 30, day(2025, 2, 1), day(2025, 2, 28)),
        ];
        let loads = loads_by_user(&allocs, day(2025, 1, 15));
        assert_eq!(loads.get(&a), Some(&110));
        assert_eq!(loads.get(&b), None);
        assert_eq!(free_capacity(110), 0);
        assert_eq!(free_capacity(60), 40);
    }
}
