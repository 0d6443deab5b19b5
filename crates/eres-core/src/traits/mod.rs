//! Capability contracts consumed by the dispatch pipeline.
//!
//! Each collaborator sits behind a trait so the orchestrator can be driven by
//! real network clients in production and by in-process fakes in tests.

pub mod directory;
pub mod materializer;
pub mod store;
pub mod transport;

pub use directory::RecipientDirectory;
pub use materializer::ReportMaterializer;
pub use store::{MembershipResolver, ScheduleStore};
pub use transport::MailTransport;
