//! Schedule data model: the records the pipeline reads, mutates and ships.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EresError, Result};

/// A recurring reporting job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Unique, immutable schedule ID.
    pub id: String,
    /// Seconds between runs.
    pub interval: i64,
    /// Absolute due time (unix seconds).
    pub next_report_time: i64,
    pub name: String,
    pub description: String,
    /// How far back panel queries look ("7d", "24h", "now-30m", ...).
    pub lookback: String,
    /// Owning audience group.
    #[serde(rename = "reportGroupID")]
    pub report_group_id: String,
    /// Time of day "HH:MM" used when computing the first due time.
    pub time: String,
    /// Day of the period (weekday or day of month) used with `time`.
    pub day: u32,
    pub date_format: String,
    pub date_position: String,
    /// Panels to render, in order.
    #[serde(default)]
    pub panel_details: Vec<ReportContent>,
}

impl Schedule {
    /// Create a schedule with a fresh ID. `next_report_time` stays 0 until the
    /// store assigns the first due time.
    pub fn new(name: &str, interval: i64, report_group_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            interval,
            next_report_time: 0,
            name: name.to_string(),
            description: String::new(),
            lookback: String::new(),
            report_group_id: report_group_id.to_string(),
            time: String::new(),
            day: 1,
            date_format: String::new(),
            date_position: String::new(),
            panel_details: Vec::new(),
        }
    }

    /// Builder-style panel attachment.
    pub fn with_panel(mut self, dashboard_id: &str, panel_id: i64) -> Self {
        self.panel_details
            .push(ReportContent::new(&self.id, dashboard_id, panel_id));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EresError::InvalidSchedule("empty schedule id".into()));
        }
        if self.interval <= 0 {
            return Err(EresError::InvalidSchedule(format!(
                "schedule {} has non-positive interval {}",
                self.id, self.interval
            )));
        }
        Ok(())
    }

    /// Whether this schedule is due at `now` (equality is not due).
    pub fn is_overdue(&self, now: i64) -> bool {
        self.next_report_time < now
    }
}

/// Association between a schedule and one panel it renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportContent {
    pub id: String,
    #[serde(rename = "scheduleID")]
    pub schedule_id: String,
    #[serde(rename = "panelID")]
    pub panel_id: i64,
    #[serde(rename = "dashboardID")]
    pub dashboard_id: String,
    /// Overrides the schedule lookback when non-empty.
    #[serde(default)]
    pub lookback: String,
    /// Opaque JSON forwarded with the panel query.
    #[serde(default)]
    pub variables: String,
}

impl ReportContent {
    pub fn new(schedule_id: &str, dashboard_id: &str, panel_id: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id: schedule_id.to_string(),
            panel_id,
            dashboard_id: dashboard_id.to_string(),
            lookback: String::new(),
            variables: String::new(),
        }
    }
}

/// An externally-owned audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Join record between a user and a report group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportGroupMembership {
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "reportGroupID")]
    pub report_group_id: String,
}

/// A materialized report ready to attach.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub schedule_id: String,
    pub path: PathBuf,
    /// Attachment file name shown to recipients.
    pub file_name: String,
    pub sections: usize,
    pub rows: usize,
}

/// One outbound email: a single document addressed to every resolved recipient.
#[derive(Debug, Clone)]
pub struct OutgoingReport {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: PathBuf,
    pub attachment_name: String,
}

/// Per-run scratch directory for temporary report files.
///
/// Created lazily by whoever writes the first file, removed by [`ArtifactDir::cleanup`]
/// whether or not the run succeeded.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    path: PathBuf,
}

impl ArtifactDir {
    /// Reserve a unique directory under `work_dir` for one schedule run.
    pub fn for_run(work_dir: &Path, schedule_id: &str) -> Self {
        let run = uuid::Uuid::new_v4().simple().to_string();
        Self {
            path: work_dir.join(format!("{}-{}", sanitize(schedule_id), &run[..12])),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for a file inside the run directory, creating the directory if needed.
    pub fn file(&self, name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.path)?;
        Ok(self.path.join(name))
    }

    /// Remove the run directory and everything in it.
    pub fn cleanup(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EresError::Cleanup(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// Reduce a free-form name to a file-system friendly token.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "report".into()
    } else {
        cleaned
    }
}
