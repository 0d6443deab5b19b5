//! # eres core
//!
//! Shared vocabulary for the report dispatcher: the schedule data model,
//! the error taxonomy, the capability traits each collaborator implements,
//! and the configuration loaded by the binary.
//!
//! ```text
//! Dispatch tick
//!   ├── ScheduleStore::list_overdue(now)
//!   └── per schedule (independent, concurrent)
//!         ├── MembershipResolver::members_of(group)
//!         ├── RecipientDirectory::emails_for(users)
//!         ├── ReportMaterializer::materialize(schedule) → Document
//!         ├── MailTransport::send(report)            (bounded retry)
//!         ├── ScheduleStore::update(next_report_time)
//!         └── ArtifactDir::cleanup()
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::EresConfig;
pub use error::{EresError, FailureKind, Result};
pub use types::{
    ArtifactDir, Document, OutgoingReport, ReportContent, ReportGroup, ReportGroupMembership,
    Schedule,
};
