//! # eres Channels
//!
//! Network-facing collaborators consumed by the dispatch engine:
//! - [`email::SmtpMailer`]: the Mail Transport, async SMTP via lettre
//! - [`directory::HttpRecipientDirectory`]: user ID → email lookups over HTTP

pub mod directory;
pub mod email;

pub use directory::HttpRecipientDirectory;
pub use email::SmtpMailer;
