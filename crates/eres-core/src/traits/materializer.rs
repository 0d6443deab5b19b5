use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ArtifactDir, Document, Schedule};

/// Executes a schedule's panel queries and assembles one document.
#[async_trait]
pub trait ReportMaterializer: Send + Sync {
    /// Build the document for `schedule` as of `now` (unix seconds), writing
    /// any temporary files inside `artifacts`.
    ///
    /// Empty panels produce empty sections; only hard query or storage
    /// failures return an error.
    async fn materialize(
        &self,
        schedule: &Schedule,
        now: i64,
        artifacts: &ArtifactDir,
    ) -> Result<Document>;
}
