//! # eres Scheduler
//!
//! Finds overdue report schedules and drives each one through
//! resolve → materialize → send → reschedule.
//!
//! ## Architecture
//! ```text
//! spawn_dispatcher (tokio interval, missed ticks skipped)
//!   └── DispatchEngine::run_tick
//!         ├── ScheduleStore::list_overdue   (SchedulerDb, SQLite)
//!         ├── skip schedules held for reconciliation
//!         └── per schedule, up to max_parallel at once
//!               ├── ClaimSet::try_claim
//!               ├── MembershipResolver → RecipientDirectory
//!               ├── ReportMaterializer  → ArtifactDir
//!               ├── MailTransport       (RetryPolicy)
//!               ├── recurrence::advance → ScheduleStore::update
//!               │     (on failure: ScheduleStore::hold_for_reconciliation)
//!               └── ArtifactDir::cleanup
//! ```

pub mod claims;
pub mod engine;
pub mod membership;
pub mod persistence;
pub mod recurrence;
pub mod retry;
pub mod summary;

pub use claims::{Claim, ClaimSet};
pub use engine::{Collaborators, DispatchConfig, DispatchEngine, spawn_dispatcher};
pub use membership::GroupLookup;
pub use persistence::SchedulerDb;
pub use retry::RetryPolicy;
pub use summary::{MissingEmail, RunState, ScheduleRun, TickSummary};
