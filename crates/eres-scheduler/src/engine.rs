//! Dispatch engine: one pass per tick over every overdue schedule.
//!
//! Each schedule runs its own pipeline:
//! `Due → RecipientsResolved → Materialized → Sent → Rescheduled`, with any
//! step able to end in `Failed(kind)`. Every pipeline finishes with artifact
//! cleanup. Failed schedules keep their due time and are retried next tick,
//! except when the mail went out and only the reschedule commit failed: those
//! are held for reconciliation and skipped until released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use eres_core::config::{EresConfig, expand_path};
use eres_core::error::{EresError, FailureKind, Result};
use eres_core::traits::{
    MailTransport, MembershipResolver, RecipientDirectory, ReportMaterializer, ScheduleStore,
};
use eres_core::types::{ArtifactDir, Document, OutgoingReport, Schedule};
use futures::stream::{self, StreamExt};
use tracing::Instrument;

use crate::claims::ClaimSet;
use crate::recurrence;
use crate::retry::RetryPolicy;
use crate::summary::{RunState, ScheduleRun, TickSummary};

/// Orchestrator settings, built from [`EresConfig`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub work_dir: PathBuf,
    pub max_parallel: usize,
    /// Consecutive failures of one schedule before an alert is raised.
    pub alert_after_failures: u32,
    pub retry: RetryPolicy,
}

impl DispatchConfig {
    pub fn from_config(config: &EresConfig) -> Self {
        Self {
            work_dir: expand_path(&config.scheduler.work_dir),
            max_parallel: config.scheduler.max_parallel.max(1),
            alert_after_failures: config.scheduler.alert_after_failures.max(1),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// The collaborators a dispatch pass talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ScheduleStore>,
    pub members: Arc<dyn MembershipResolver>,
    pub directory: Arc<dyn RecipientDirectory>,
    pub materializer: Arc<dyn ReportMaterializer>,
    pub transport: Arc<dyn MailTransport>,
}

/// The dispatch engine. Every tick re-derives its work from the store.
pub struct DispatchEngine {
    deps: Collaborators,
    config: DispatchConfig,
    claims: ClaimSet,
    /// Serializes passes; a tick that finds it held is skipped.
    tick_lock: tokio::sync::Mutex<()>,
    failure_streaks: Mutex<HashMap<String, u32>>,
    /// Reconciliation holds placed by this process, keyed by schedule with the
    /// due time that was sent. Kept even when the store could not record them.
    holds: Mutex<HashMap<String, i64>>,
}

impl DispatchEngine {
    pub fn new(deps: Collaborators, config: DispatchConfig) -> Self {
        Self {
            deps,
            config,
            claims: ClaimSet::new(),
            tick_lock: tokio::sync::Mutex::new(()),
            failure_streaks: Mutex::new(HashMap::new()),
            holds: Mutex::new(HashMap::new()),
        }
    }

    /// Claims shared by every pipeline this engine starts.
    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run one pass at wall-clock now.
    pub async fn run_tick(&self) -> Result<Option<TickSummary>> {
        self.run_tick_at(Utc::now().timestamp()).await
    }

    /// Run one pass as of `now` (unix seconds).
    ///
    /// Returns `Ok(None)` when a previous pass is still running. Only a failure
    /// to list overdue schedules is an error; per-schedule failures are folded
    /// into the summary.
    pub async fn run_tick_at(&self, now: i64) -> Result<Option<TickSummary>> {
        let Ok(_pass) = self.tick_lock.try_lock() else {
            tracing::info!("⏳ Previous dispatch pass still running, skipping tick");
            return Ok(None);
        };

        let schedules = self.deps.store.list_overdue(now).await.map_err(|e| {
            tracing::error!("🚨 Cannot list overdue schedules, tick aborted: {}", e);
            e
        })?;

        let mut summary = TickSummary::new(now);
        summary.due = schedules.len();
        if schedules.is_empty() {
            tracing::debug!("💤 No overdue schedules at {}", now);
            return Ok(Some(summary));
        }
        tracing::info!("🔔 {} schedule(s) due", schedules.len());

        let holds = self.current_holds().await;
        let mut runnable = Vec::with_capacity(schedules.len());
        for schedule in schedules {
            match holds.get(&schedule.id) {
                Some(&sent_for) if sent_for == schedule.next_report_time => {
                    tracing::warn!(
                        "🔒 '{}' ({}) already sent for {}, held for reconciliation",
                        schedule.name,
                        schedule.id,
                        sent_for
                    );
                    summary.held.push(schedule.id);
                }
                Some(_) => {
                    // due time edited since the send: reconciled by hand
                    self.forget_hold(&schedule.id).await;
                    runnable.push(schedule);
                }
                None => runnable.push(schedule),
            }
        }

        let runs: Vec<Option<ScheduleRun>> = stream::iter(runnable)
            .map(|schedule| self.process(schedule, now))
            .buffer_unordered(self.config.max_parallel)
            .collect()
            .await;

        for run in runs {
            match run {
                Some(run) => {
                    self.track_failure_streak(&run, &mut summary);
                    summary.record(run);
                }
                None => summary.skipped_claimed += 1,
            }
        }
        summary.runs.sort_by(|a, b| a.schedule_id.cmp(&b.schedule_id));

        tracing::info!(
            "📊 Tick done: due={} ok={} failed={} skipped={} held={} missing_emails={} reconcile={} cleanup_errors={}",
            summary.due,
            summary.succeeded,
            summary.total_failures(),
            summary.skipped_claimed,
            summary.held.len(),
            summary.missing_emails.len(),
            summary.reconciliation.len(),
            summary.cleanup_errors
        );
        Ok(Some(summary))
    }

    /// Full pipeline for one schedule. `None` if another pipeline holds its claim.
    async fn process(&self, schedule: Schedule, now: i64) -> Option<ScheduleRun> {
        let claim = self.claims.try_claim(&schedule.id)?;
        let span = tracing::info_span!("schedule", schedule_id = %schedule.id);

        let run = async {
            let mut run = ScheduleRun::new(&schedule.id, &schedule.name, schedule.next_report_time);
            let artifacts = ArtifactDir::for_run(&self.config.work_dir, &schedule.id);

            if let Err(e) = self.execute(&schedule, now, &artifacts, &mut run).await {
                let kind = e.kind().unwrap_or(FailureKind::MaterializeError);
                if kind == FailureKind::RescheduleCommitError {
                    tracing::error!(
                        "🚨 Report for '{}' was sent but its next report time was not saved: {}. Held until reconciled.",
                        schedule.name,
                        e
                    );
                    self.hold(&schedule).await;
                } else {
                    tracing::warn!("❌ Schedule '{}' failed ({}): {}", schedule.name, kind, e);
                }
                run.fail(kind, &e);
            }

            if let Err(e) = artifacts.cleanup() {
                tracing::warn!("⚠️ Cleanup failed for '{}': {}", schedule.name, e);
                run.cleanup_error = Some(e.to_string());
            }
            run
        }
        .instrument(span)
        .await;

        drop(claim);
        Some(run)
    }

    async fn execute(
        &self,
        schedule: &Schedule,
        now: i64,
        artifacts: &ArtifactDir,
        run: &mut ScheduleRun,
    ) -> Result<()> {
        schedule.validate()?;

        // Due → RecipientsResolved
        let recipients = self.resolve_recipients(schedule, run).await?;
        run.recipients = recipients.clone();
        run.transition(RunState::RecipientsResolved);

        // RecipientsResolved → Materialized
        let document = self
            .deps
            .materializer
            .materialize(schedule, now, artifacts)
            .await
            .map_err(|e| match e {
                EresError::Materialize(_) => e,
                other => EresError::Materialize(other.to_string()),
            })?;
        run.transition(RunState::Materialized);

        // Materialized → Sent
        let report = compose_report(schedule, &document, recipients, now);
        let (sent, attempts) = self
            .config
            .retry
            .run("mail send", || self.deps.transport.send(&report))
            .await;
        run.send_attempts = attempts;
        sent.map_err(|e| match e {
            EresError::Send(_) => e,
            other => EresError::Send(other.to_string()),
        })?;
        tracing::info!(
            "📤 '{}' sent to {} recipient(s) via {}",
            schedule.name,
            report.to.len(),
            self.deps.transport.name()
        );
        run.transition(RunState::Sent);

        // Sent → Rescheduled
        let next = self.commit_next_report_time(schedule, now).await.map_err(|e| {
            run.needs_reconciliation = true;
            EresError::RescheduleCommit(e.to_string())
        })?;
        run.next_report_time = Some(next);
        run.transition(RunState::Rescheduled);
        tracing::info!("📅 '{}' rescheduled for {}", schedule.name, next);
        Ok(())
    }

    /// Group → users → addresses. Users without an address, or with one the
    /// transport cannot deliver to, are recorded on the run and skipped.
    async fn resolve_recipients(
        &self,
        schedule: &Schedule,
        run: &mut ScheduleRun,
    ) -> Result<Vec<String>> {
        let user_ids = self
            .deps
            .members
            .members_of(&schedule.report_group_id)
            .await?;
        if user_ids.is_empty() {
            return Err(EresError::NoResolvableRecipients(format!(
                "{} (group {} has no members)",
                schedule.id, schedule.report_group_id
            )));
        }

        let emails = self
            .deps
            .directory
            .emails_for(&user_ids)
            .await
            .map_err(|e| match e {
                EresError::DirectoryUnavailable(_) => e,
                other => EresError::DirectoryUnavailable(other.to_string()),
            })?;

        let mut recipients: Vec<String> = Vec::with_capacity(user_ids.len());
        for user_id in &user_ids {
            match emails.get(user_id).map(|e| e.trim()).filter(|e| !e.is_empty()) {
                Some(email) => {
                    if let Err(reason) = self.deps.transport.check_recipient(email) {
                        tracing::warn!(
                            "📭 Unusable address for user {} ({}): {}",
                            user_id,
                            email,
                            reason
                        );
                        run.missing_emails.push(user_id.clone());
                        continue;
                    }
                    if !recipients.iter().any(|r| r.eq_ignore_ascii_case(email)) {
                        recipients.push(email.to_string());
                    }
                }
                None => {
                    tracing::warn!("📭 No email address for user {}", user_id);
                    run.missing_emails.push(user_id.clone());
                }
            }
        }

        if recipients.is_empty() {
            return Err(EresError::NoResolvableRecipients(format!(
                "{} ({} member(s), none with an address)",
                schedule.id,
                user_ids.len()
            )));
        }
        Ok(recipients)
    }

    /// Advance from the snapshot's due time and persist it. Re-reads the row so
    /// concurrent edits to other fields are not overwritten.
    async fn commit_next_report_time(&self, snapshot: &Schedule, now: i64) -> Result<i64> {
        let next = recurrence::advance(snapshot.next_report_time, snapshot.interval, now)?;
        let mut fresh = self.deps.store.get(&snapshot.id).await?;
        if fresh.next_report_time != snapshot.next_report_time {
            tracing::info!(
                "✏️ Next report time of {} changed during the run ({} → {}), keeping the edit",
                snapshot.id,
                snapshot.next_report_time,
                fresh.next_report_time
            );
            return Ok(fresh.next_report_time);
        }
        fresh.next_report_time = next;
        self.deps.store.update(&snapshot.id, &fresh).await?;
        Ok(next)
    }

    /// Holds placed by this process merged with the ones the store recorded.
    async fn current_holds(&self) -> HashMap<String, i64> {
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match self.deps.store.reconciliation_holds().await {
            Ok(stored) => holds.extend(stored),
            Err(e) => tracing::warn!("⚠️ Cannot read stored reconciliation holds: {}", e),
        }
        holds
    }

    async fn hold(&self, schedule: &Schedule) {
        self.holds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(schedule.id.clone(), schedule.next_report_time);
        if let Err(e) = self
            .deps
            .store
            .hold_for_reconciliation(&schedule.id, schedule.next_report_time)
            .await
        {
            tracing::error!(
                "🚨 Hold for '{}' kept in memory only, store refused it: {}",
                schedule.name,
                e
            );
        }
    }

    async fn forget_hold(&self, schedule_id: &str) {
        self.holds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(schedule_id);
        match self.deps.store.release_hold(schedule_id).await {
            Ok(_) => tracing::info!("🔓 {} reconciled, hold dropped", schedule_id),
            Err(e) => tracing::warn!("⚠️ Cannot drop stored hold for {}: {}", schedule_id, e),
        }
    }

    /// Let a held schedule be dispatched again on its current due time.
    /// Returns whether a hold existed.
    pub async fn release_hold(&self, schedule_id: &str) -> Result<bool> {
        let in_memory = self
            .holds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(schedule_id)
            .is_some();
        let stored = self.deps.store.release_hold(schedule_id).await?;
        Ok(in_memory || stored)
    }

    fn track_failure_streak(&self, run: &ScheduleRun, summary: &mut TickSummary) {
        let mut streaks = self
            .failure_streaks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match run.state {
            // mail went out in both cases; neither is retried
            RunState::Rescheduled | RunState::Failed(FailureKind::RescheduleCommitError) => {
                streaks.remove(&run.schedule_id);
            }
            RunState::Failed(kind) => {
                let count = streaks.entry(run.schedule_id.clone()).or_insert(0);
                *count += 1;
                if *count >= self.config.alert_after_failures {
                    tracing::error!(
                        "🚨 Schedule '{}' ({}) has failed {} consecutive time(s), last: {}",
                        run.name,
                        run.schedule_id,
                        count,
                        kind
                    );
                    summary.alerts.push(run.schedule_id.clone());
                }
            }
            _ => {}
        }
    }

    /// Current consecutive failure count for a schedule.
    pub fn failure_streak(&self, schedule_id: &str) -> u32 {
        self.failure_streaks
            .lock()
            .map(|s| s.get(schedule_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// One email per schedule, addressed to every resolved recipient.
fn compose_report(
    schedule: &Schedule,
    document: &Document,
    recipients: Vec<String>,
    now: i64,
) -> OutgoingReport {
    let subject = if schedule.name.trim().is_empty() {
        "Scheduled report".to_string()
    } else {
        schedule.name.clone()
    };
    let generated = Utc
        .timestamp_opt(now, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_default();

    let mut body = String::new();
    if !schedule.description.trim().is_empty() {
        body.push_str(schedule.description.trim());
        body.push_str("\n\n");
    }
    body.push_str(&format!(
        "Generated {generated}: {} panel(s), {} row(s). See the attached {}.",
        document.sections, document.rows, document.file_name
    ));

    OutgoingReport {
        to: recipients,
        subject,
        body,
        attachment: document.path.clone(),
        attachment_name: document.file_name.clone(),
    }
}

/// Spawn the periodic trigger. Passes run back to back at most once per
/// interval; missed ticks are skipped rather than bunched up.
pub async fn spawn_dispatcher(engine: Arc<DispatchEngine>, tick_interval_secs: u64) {
    tracing::info!("⏰ Dispatcher started (tick every {}s)", tick_interval_secs);

    let mut interval = tokio::time::interval(Duration::from_secs(tick_interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if let Err(e) = engine.run_tick().await {
            tracing::error!("🚨 Dispatch tick failed: {}", e);
        }
    }
}
