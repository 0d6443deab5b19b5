//! Schedule Store and Membership Resolver traits.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::Schedule;

/// Durable schedule records and their recurrence state.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Every schedule with `next_report_time < now`, as one point-in-time snapshot.
    async fn list_overdue(&self, now: i64) -> Result<Vec<Schedule>>;

    /// Every schedule, with panel references.
    async fn list(&self) -> Result<Vec<Schedule>>;

    /// Fetch one schedule; `ScheduleNotFound` if absent.
    async fn get(&self, id: &str) -> Result<Schedule>;

    /// Insert a schedule and its panel associations.
    async fn create(&self, schedule: &Schedule) -> Result<Schedule>;

    /// Atomically replace the mutable fields of schedule `id`.
    async fn update(&self, id: &str, schedule: &Schedule) -> Result<Schedule>;

    /// Remove a schedule and cascade its panel associations.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Mark schedule `id` as sent for `sent_report_time` without its next due
    /// time saved. Held schedules are not dispatched again until released.
    async fn hold_for_reconciliation(&self, id: &str, sent_report_time: i64) -> Result<()>;

    /// Every held schedule with the due time its report was sent for.
    async fn reconciliation_holds(&self) -> Result<HashMap<String, i64>>;

    /// Clear a hold. Returns whether one existed.
    async fn release_hold(&self, id: &str) -> Result<bool>;
}

/// Expands a report group into member user IDs.
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    /// Member user IDs without duplicates. Unknown or empty groups yield an empty list.
    async fn members_of(&self, report_group_id: &str) -> Result<Vec<String>>;
}
