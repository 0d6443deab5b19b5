use async_trait::async_trait;

use crate::error::Result;
use crate::types::OutgoingReport;

/// Delivers one message with one attachment. At-most-once per call.
#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `address` can be put on a message at all. Recipients that fail
    /// this are dropped before sending instead of failing the whole message.
    fn check_recipient(&self, address: &str) -> std::result::Result<(), String> {
        let _ = address;
        Ok(())
    }

    async fn send(&self, report: &OutgoingReport) -> Result<()>;
}
