//! SQLite-backed Schedule Store.
//! One row per schedule, a separate ReportContent table for panel references
//! (cascade-deleted with the schedule), the report group tables read by the
//! membership resolver, and reconciliation holds for schedules whose report
//! went out without its next due time being saved.

use async_trait::async_trait;
use eres_core::error::{EresError, Result};
use eres_core::traits::ScheduleStore;
use eres_core::types::{ReportContent, Schedule};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::recurrence;

const SCHEDULE_COLUMNS: &str = "id, interval, nextReportTime, name, description, lookback, \
     reportGroupID, time, day, dateFormat, datePosition";

/// SQLite-backed persistence for schedules, panel references and report groups.
#[derive(Clone)]
pub struct SchedulerDb {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| EresError::StoreUnavailable(format!("DB open: {e}")))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EresError::StoreUnavailable(format!("DB open: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS Schedule (
                id TEXT PRIMARY KEY,
                interval INTEGER NOT NULL CHECK (interval > 0),
                nextReportTime INTEGER NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                lookback TEXT NOT NULL DEFAULT '',
                reportGroupID TEXT NOT NULL DEFAULT '',
                time TEXT NOT NULL DEFAULT '',
                day INTEGER NOT NULL DEFAULT 1,
                dateFormat TEXT NOT NULL DEFAULT '',
                datePosition TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_schedule_next ON Schedule(nextReportTime);

            -- Panel references, owned by their schedule
            CREATE TABLE IF NOT EXISTS ReportContent (
                id TEXT PRIMARY KEY,
                scheduleID TEXT NOT NULL,
                panelID INTEGER NOT NULL,
                dashboardID TEXT NOT NULL DEFAULT '',
                lookback TEXT NOT NULL DEFAULT '',
                variables TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (scheduleID) REFERENCES Schedule(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS ReportGroup (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS ReportGroupMembership (
                id TEXT PRIMARY KEY,
                userID TEXT NOT NULL,
                reportGroupID TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_membership_group
                ON ReportGroupMembership(reportGroupID);

            -- Sent but not rescheduled: skipped until released
            CREATE TABLE IF NOT EXISTS ReconciliationHold (
                scheduleID TEXT PRIMARY KEY,
                sentReportTime INTEGER NOT NULL,
                heldAt INTEGER NOT NULL,
                FOREIGN KEY (scheduleID) REFERENCES Schedule(id) ON DELETE CASCADE
            );
         ",
            )
            .map_err(|e| EresError::StoreUnavailable(format!("Migration: {e}")))
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EresError::StoreUnavailable("connection mutex poisoned".into()))
    }

    // ─── Sync helpers (called with the connection held) ─────────

    fn load_report_content(conn: &Connection, schedule_id: &str) -> rusqlite::Result<Vec<ReportContent>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, scheduleID, panelID, dashboardID, lookback, variables
             FROM ReportContent WHERE scheduleID = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([schedule_id], |row| {
            Ok(ReportContent {
                id: row.get(0)?,
                schedule_id: row.get(1)?,
                panel_id: row.get(2)?,
                dashboard_id: row.get(3)?,
                lookback: row.get(4)?,
                variables: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
        Ok(Schedule {
            id: row.get(0)?,
            interval: row.get(1)?,
            next_report_time: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            lookback: row.get(5)?,
            report_group_id: row.get(6)?,
            time: row.get(7)?,
            // rows written by other tools may hold a negative day
            day: u32::try_from(row.get::<_, i64>(8)?).unwrap_or(0),
            date_format: row.get(9)?,
            date_position: row.get(10)?,
            panel_details: Vec::new(),
        })
    }

    fn query_schedules(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> rusqlite::Result<Vec<Schedule>> {
        let mut stmt = conn.prepare(sql)?;
        let mut schedules: Vec<Schedule> = stmt
            .query_map(params, Self::row_to_schedule)?
            .collect::<rusqlite::Result<_>>()?;
        for schedule in schedules.iter_mut() {
            schedule.panel_details = Self::load_report_content(conn, &schedule.id)?;
        }
        Ok(schedules)
    }

    fn insert_report_content(tx: &rusqlite::Transaction<'_>, schedule: &Schedule) -> rusqlite::Result<()> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO ReportContent (id, scheduleID, panelID, dashboardID, lookback, variables)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for content in &schedule.panel_details {
            stmt.execute(params![
                content.id,
                schedule.id,
                content.panel_id,
                content.dashboard_id,
                content.lookback,
                content.variables,
            ])?;
        }
        Ok(())
    }

    /// Schedule count, for status output.
    pub fn schedule_count(&self) -> usize {
        self.lock()
            .ok()
            .and_then(|conn| {
                conn.query_row("SELECT COUNT(*) FROM Schedule", [], |r| r.get::<_, i64>(0))
                    .ok()
            })
            .unwrap_or(0) as usize
    }
}

fn store_err(context: &str) -> impl Fn(rusqlite::Error) -> EresError + '_ {
    move |e| EresError::StoreUnavailable(format!("{context}: {e}"))
}

#[async_trait]
impl ScheduleStore for SchedulerDb {
    async fn list_overdue(&self, now: i64) -> Result<Vec<Schedule>> {
        let mut conn = self.lock()?;
        // one read transaction so schedules and their panels come from the same snapshot
        let tx = conn.transaction().map_err(store_err("Begin overdue snapshot"))?;
        let schedules = Self::query_schedules(
            &tx,
            &format!(
                "SELECT {SCHEDULE_COLUMNS} FROM Schedule WHERE nextReportTime < ?1 ORDER BY nextReportTime, id"
            ),
            [now],
        )
        .map_err(store_err("Overdue schedules"))?;
        tx.commit().map_err(store_err("End overdue snapshot"))?;
        tracing::debug!("🗂️ {} overdue schedule(s) at {}", schedules.len(), now);
        Ok(schedules)
    }

    async fn list(&self) -> Result<Vec<Schedule>> {
        let conn = self.lock()?;
        Self::query_schedules(
            &conn,
            &format!("SELECT {SCHEDULE_COLUMNS} FROM Schedule ORDER BY name, id"),
            [],
        )
        .map_err(store_err("List schedules"))
    }

    async fn get(&self, id: &str) -> Result<Schedule> {
        let conn = self.lock()?;
        let schedule = conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM Schedule WHERE id = ?1"),
                [id],
                Self::row_to_schedule,
            )
            .optional()
            .map_err(store_err("Get schedule"))?;
        let mut schedule = schedule.ok_or_else(|| EresError::ScheduleNotFound(id.to_string()))?;
        schedule.panel_details =
            Self::load_report_content(&conn, id).map_err(store_err("Get panel details"))?;
        Ok(schedule)
    }

    async fn create(&self, schedule: &Schedule) -> Result<Schedule> {
        schedule.validate()?;
        let mut created = schedule.clone();
        if created.next_report_time == 0 {
            created.next_report_time = recurrence::first_report_time(
                created.interval,
                &created.time,
                created.day,
                chrono::Utc::now().timestamp(),
            )?;
        }
        for content in created.panel_details.iter_mut() {
            content.schedule_id = created.id.clone();
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err("Begin create"))?;
        tx.execute(
            &format!(
                "INSERT INTO Schedule ({SCHEDULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                created.id,
                created.interval,
                created.next_report_time,
                created.name,
                created.description,
                created.lookback,
                created.report_group_id,
                created.time,
                created.day,
                created.date_format,
                created.date_position,
            ],
        )
        .map_err(store_err("Insert schedule"))?;
        Self::insert_report_content(&tx, &created).map_err(store_err("Insert panel details"))?;
        tx.commit().map_err(store_err("Commit create"))?;

        tracing::info!("📅 Schedule created: '{}' ({})", created.name, created.id);
        Ok(created)
    }

    async fn update(&self, id: &str, schedule: &Schedule) -> Result<Schedule> {
        schedule.validate()?;
        if schedule.id != id {
            return Err(EresError::InvalidSchedule(format!(
                "schedule id is immutable ({} != {id})",
                schedule.id
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err("Begin update"))?;
        let changed = tx
            .execute(
                "UPDATE Schedule SET nextReportTime = ?1, interval = ?2, name = ?3, description = ?4,
                     lookback = ?5, reportGroupID = ?6, time = ?7, day = ?8, dateFormat = ?9,
                     datePosition = ?10
                 WHERE id = ?11",
                params![
                    schedule.next_report_time,
                    schedule.interval,
                    schedule.name,
                    schedule.description,
                    schedule.lookback,
                    schedule.report_group_id,
                    schedule.time,
                    schedule.day,
                    schedule.date_format,
                    schedule.date_position,
                    id,
                ],
            )
            .map_err(store_err("Update schedule"))?;
        if changed == 0 {
            return Err(EresError::ScheduleNotFound(id.to_string()));
        }
        tx.execute("DELETE FROM ReportContent WHERE scheduleID = ?1", [id])
            .map_err(store_err("Replace panel details"))?;
        Self::insert_report_content(&tx, schedule).map_err(store_err("Replace panel details"))?;
        tx.commit().map_err(store_err("Commit update"))?;

        tracing::debug!("💾 Schedule {} updated (next at {})", id, schedule.next_report_time);
        Ok(schedule.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err("Begin delete"))?;
        tx.execute("DELETE FROM ReportContent WHERE scheduleID = ?1", [id])
            .map_err(store_err("Delete panel details"))?;
        tx.execute("DELETE FROM ReconciliationHold WHERE scheduleID = ?1", [id])
            .map_err(store_err("Delete reconciliation hold"))?;
        let removed = tx
            .execute("DELETE FROM Schedule WHERE id = ?1", [id])
            .map_err(store_err("Delete schedule"))?;
        if removed == 0 {
            return Err(EresError::ScheduleNotFound(id.to_string()));
        }
        tx.commit().map_err(store_err("Commit delete"))?;
        tracing::info!("🗑️ Schedule deleted: {}", id);
        Ok(())
    }

    async fn hold_for_reconciliation(&self, id: &str, sent_report_time: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO ReconciliationHold (scheduleID, sentReportTime, heldAt)
             VALUES (?1, ?2, ?3)",
            params![id, sent_report_time, chrono::Utc::now().timestamp()],
        )
        .map_err(store_err("Hold schedule"))?;
        tracing::warn!("🔒 Schedule {} held for reconciliation (sent for {})", id, sent_report_time);
        Ok(())
    }

    async fn reconciliation_holds(&self) -> Result<HashMap<String, i64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT scheduleID, sentReportTime FROM ReconciliationHold")
            .map_err(store_err("List holds"))?;
        let holds = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(store_err("List holds"))?
            .collect::<rusqlite::Result<HashMap<String, i64>>>()
            .map_err(store_err("List holds"))?;
        Ok(holds)
    }

    async fn release_hold(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM ReconciliationHold WHERE scheduleID = ?1", [id])
            .map_err(store_err("Release hold"))?;
        if removed > 0 {
            tracing::info!("🔓 Reconciliation hold released: {}", id);
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_at(name: &str, next: i64) -> Schedule {
        let mut s = Schedule::new(name, 86400, "g1").with_panel("dash", 1);
        s.next_report_time = next;
        s
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let s = schedule_at("daily", 5000).with_panel("dash", 2);
        db.create(&s).await.unwrap();

        let loaded = db.get(&s.id).await.unwrap();
        assert_eq!(loaded.name, "daily");
        assert_eq!(loaded.next_report_time, 5000);
        let panels: Vec<i64> = loaded.panel_details.iter().map(|p| p.panel_id).collect();
        assert_eq!(panels, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_create_assigns_first_report_time() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut s = Schedule::new("fresh", 86400, "g1");
        s.time = "08:00".into();
        let created = db.create(&s).await.unwrap();
        assert!(created.next_report_time > chrono::Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = SchedulerDb::open_in_memory().unwrap();
        assert!(matches!(
            db.get("nope").await,
            Err(EresError::ScheduleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_overdue_excludes_boundary() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let early = schedule_at("early", 999);
        let exact = schedule_at("exact", 1000);
        let later = schedule_at("later", 1001);
        for s in [&early, &exact, &later] {
            db.create(s).await.unwrap();
        }

        let overdue = db.list_overdue(1000).await.unwrap();
        let ids: Vec<&str> = overdue.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str()]);
        assert_eq!(overdue[0].panel_details.len(), 1);

        assert_eq!(db.list_overdue(1002).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_replaces_fields() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let s = schedule_at("weekly", 1000);
        db.create(&s).await.unwrap();

        let mut changed = s.clone();
        changed.next_report_time = 87400;
        changed.name = "renamed".into();
        db.update(&s.id, &changed).await.unwrap();

        let loaded = db.get(&s.id).await.unwrap();
        assert_eq!(loaded.next_report_time, 87400);
        assert_eq!(loaded.name, "renamed");
        assert_eq!(loaded.panel_details.len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_id_change_and_missing() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let s = schedule_at("s", 1000);
        db.create(&s).await.unwrap();

        let mut other = s.clone();
        other.id = "other".into();
        assert!(matches!(
            db.update(&s.id, &other).await,
            Err(EresError::InvalidSchedule(_))
        ));
        assert!(matches!(
            db.update("other", &other).await,
            Err(EresError::ScheduleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades_panels() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let s = schedule_at("s", 1000).with_panel("dash", 9);
        db.create(&s).await.unwrap();
        db.delete(&s.id).await.unwrap();

        assert!(db.get(&s.id).await.is_err());
        let conn = db.lock().unwrap();
        let remaining: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM ReportContent WHERE scheduleID = ?1",
                [&s.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_interval() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut s = schedule_at("bad", 1000);
        s.interval = 0;
        assert!(matches!(
            db.create(&s).await,
            Err(EresError::InvalidSchedule(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_day_row_does_not_break_listing() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.create(&schedule_at("good", 500)).await.unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO Schedule (id, interval, nextReportTime, name, day)
                 VALUES ('legacy', 86400, 900, 'legacy', -3)",
                [],
            )
            .unwrap();

        let overdue = db.list_overdue(1000).await.unwrap();
        assert_eq!(overdue.len(), 2);
        let legacy = overdue.iter().find(|s| s.id == "legacy").unwrap();
        assert_eq!(legacy.day, 0);
        assert_eq!(db.get("legacy").await.unwrap().day, 0);
    }

    #[tokio::test]
    async fn test_reconciliation_hold_lifecycle() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let s = schedule_at("held", 1000);
        db.create(&s).await.unwrap();

        db.hold_for_reconciliation(&s.id, 1000).await.unwrap();
        // holding twice keeps one row with the latest sent time
        db.hold_for_reconciliation(&s.id, 1000).await.unwrap();
        let holds = db.reconciliation_holds().await.unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds.get(&s.id), Some(&1000));

        assert!(db.release_hold(&s.id).await.unwrap());
        assert!(!db.release_hold(&s.id).await.unwrap());
        assert!(db.reconciliation_holds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hold_survives_reopen_and_goes_with_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eres.db");
        let s = schedule_at("held", 1000);
        {
            let db = SchedulerDb::open(&path).unwrap();
            db.create(&s).await.unwrap();
            db.hold_for_reconciliation(&s.id, 1000).await.unwrap();
        }

        let db = SchedulerDb::open(&path).unwrap();
        assert_eq!(db.reconciliation_holds().await.unwrap().get(&s.id), Some(&1000));
        db.delete(&s.id).await.unwrap();
        assert!(db.reconciliation_holds().await.unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = SchedulerDb::open(&dir.path().join("nested").join("eres.db")).unwrap();
        assert_eq!(db.schedule_count(), 0);
    }
}
