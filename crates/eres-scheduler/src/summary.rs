//! Per-schedule run records and the per-tick summary.

use eres_core::error::FailureKind;
use serde::Serialize;
use std::collections::BTreeMap;

/// Where a schedule's pipeline ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RunState {
    Due,
    RecipientsResolved,
    Materialized,
    Sent,
    Rescheduled,
    Failed(FailureKind),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Rescheduled | RunState::Failed(_))
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Due => write!(f, "due"),
            RunState::RecipientsResolved => write!(f, "recipients-resolved"),
            RunState::Materialized => write!(f, "materialized"),
            RunState::Sent => write!(f, "sent"),
            RunState::Rescheduled => write!(f, "rescheduled"),
            RunState::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

/// A user whose address could not be resolved for a schedule's send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingEmail {
    pub schedule_id: String,
    pub user_id: String,
}

/// Record of one schedule's pipeline within a tick.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRun {
    pub schedule_id: String,
    pub name: String,
    pub state: RunState,
    pub recipients: Vec<String>,
    pub missing_emails: Vec<String>,
    pub send_attempts: u32,
    pub previous_report_time: i64,
    /// Set once the store has committed the advanced time.
    pub next_report_time: Option<i64>,
    pub error: Option<String>,
    /// Mail went out but the new due time was not committed.
    pub needs_reconciliation: bool,
    pub cleanup_error: Option<String>,
}

impl ScheduleRun {
    pub fn new(schedule_id: &str, name: &str, previous_report_time: i64) -> Self {
        Self {
            schedule_id: schedule_id.to_string(),
            name: name.to_string(),
            state: RunState::Due,
            recipients: Vec::new(),
            missing_emails: Vec::new(),
            send_attempts: 0,
            previous_report_time,
            next_report_time: None,
            error: None,
            needs_reconciliation: false,
            cleanup_error: None,
        }
    }

    pub fn transition(&mut self, state: RunState) {
        tracing::debug!("➡️ {} {} → {}", self.schedule_id, self.state, state);
        self.state = state;
    }

    pub fn fail(&mut self, kind: FailureKind, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
        self.transition(RunState::Failed(kind));
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Rescheduled
    }
}

/// Aggregate of one orchestrator pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub now: i64,
    pub due: usize,
    pub succeeded: usize,
    /// Schedules skipped because another pipeline still held their claim.
    pub skipped_claimed: usize,
    pub failures: BTreeMap<FailureKind, usize>,
    pub missing_emails: Vec<MissingEmail>,
    /// Schedules whose mail was sent but whose due time was not advanced.
    pub reconciliation: Vec<String>,
    /// Overdue schedules skipped because an earlier send awaits reconciliation.
    pub held: Vec<String>,
    pub cleanup_errors: usize,
    /// Schedules that reached the consecutive-failure alert threshold.
    pub alerts: Vec<String>,
    pub runs: Vec<ScheduleRun>,
}

impl TickSummary {
    pub fn new(now: i64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn record(&mut self, run: ScheduleRun) {
        if run.succeeded() {
            self.succeeded += 1;
        }
        if let RunState::Failed(kind) = run.state {
            *self.failures.entry(kind).or_insert(0) += 1;
        }
        if run.needs_reconciliation {
            self.reconciliation.push(run.schedule_id.clone());
        }
        if run.cleanup_error.is_some() {
            self.cleanup_errors += 1;
        }
        self.missing_emails
            .extend(run.missing_emails.iter().map(|user_id| MissingEmail {
                schedule_id: run.schedule_id.clone(),
                user_id: user_id.clone(),
            }));
        self.runs.push(run);
    }

    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_failures(&self) -> usize {
        self.failures.values().sum()
    }

    pub fn run(&self, schedule_id: &str) -> Option<&ScheduleRun> {
        self.runs.iter().find(|r| r.schedule_id == schedule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts() {
        let mut summary = TickSummary::new(2000);

        let mut ok = ScheduleRun::new("s1", "daily", 1000);
        ok.missing_emails.push("U2".into());
        ok.transition(RunState::Rescheduled);
        summary.record(ok);

        let mut failed = ScheduleRun::new("s2", "weekly", 1000);
        failed.fail(FailureKind::SendError, "smtp down");
        failed.cleanup_error = Some("busy".into());
        summary.record(failed);

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failure_count(FailureKind::SendError), 1);
        assert_eq!(summary.total_failures(), 1);
        assert_eq!(summary.cleanup_errors, 1);
        assert_eq!(
            summary.missing_emails,
            vec![MissingEmail {
                schedule_id: "s1".into(),
                user_id: "U2".into()
            }]
        );
        assert_eq!(summary.run("s2").unwrap().error.as_deref(), Some("smtp down"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Rescheduled.is_terminal());
        assert!(RunState::Failed(FailureKind::MaterializeError).is_terminal());
        assert!(!RunState::Sent.is_terminal());
        assert_eq!(
            RunState::Failed(FailureKind::NoResolvableRecipients).to_string(),
            "failed(no-recipients)"
        );
    }

    #[test]
    fn test_summary_serializes() {
        let mut summary = TickSummary::new(1);
        let mut run = ScheduleRun::new("s1", "n", 0);
        run.fail(FailureKind::MaterializeError, "bad query");
        summary.record(run);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["failures"]["materialize_error"], 1);
        assert_eq!(json["runs"][0]["state"]["state"], "failed");
    }
}
