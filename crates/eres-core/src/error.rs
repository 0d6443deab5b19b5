//! Error taxonomy for the dispatch pipeline.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EresError>;

#[derive(Debug, Error)]
pub enum EresError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("No resolvable recipients for schedule {0}")]
    NoResolvableRecipients(String),

    #[error("Recipient directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Materialize error: {0}")]
    Materialize(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Reschedule commit error: {0}")]
    RescheduleCommit(String),

    #[error("Cleanup error: {0}")]
    Cleanup(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure category used to aggregate per-tick counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StoreUnavailable,
    ScheduleNotFound,
    NoResolvableRecipients,
    DirectoryUnavailable,
    MaterializeError,
    SendError,
    RescheduleCommitError,
    CleanupError,
    InvalidSchedule,
}

impl EresError {
    /// The pipeline failure category, if this error belongs to one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            EresError::StoreUnavailable(_) => Some(FailureKind::StoreUnavailable),
            EresError::ScheduleNotFound(_) => Some(FailureKind::ScheduleNotFound),
            EresError::NoResolvableRecipients(_) => Some(FailureKind::NoResolvableRecipients),
            EresError::DirectoryUnavailable(_) => Some(FailureKind::DirectoryUnavailable),
            EresError::Materialize(_) => Some(FailureKind::MaterializeError),
            EresError::Send(_) => Some(FailureKind::SendError),
            EresError::RescheduleCommit(_) => Some(FailureKind::RescheduleCommitError),
            EresError::Cleanup(_) => Some(FailureKind::CleanupError),
            EresError::InvalidSchedule(_) => Some(FailureKind::InvalidSchedule),
            EresError::Config(_) | EresError::Io(_) => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::StoreUnavailable => "store-unavailable",
            FailureKind::ScheduleNotFound => "schedule-not-found",
            FailureKind::NoResolvableRecipients => "no-recipients",
            FailureKind::DirectoryUnavailable => "directory-unavailable",
            FailureKind::MaterializeError => "materialize-error",
            FailureKind::SendError => "send-error",
            FailureKind::RescheduleCommitError => "reschedule-commit-error",
            FailureKind::CleanupError => "cleanup-error",
            FailureKind::InvalidSchedule => "invalid-schedule",
        };
        write!(f, "{name}")
    }
}
