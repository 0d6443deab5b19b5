//! Panel-backed Report Content Materializer.

use async_trait::async_trait;
use eres_core::error::{EresError, Result};
use eres_core::traits::ReportMaterializer;
use eres_core::types::{ArtifactDir, Document, Schedule};
use std::sync::Arc;

use crate::document::{CsvDocument, document_file_name};
use crate::lookback;
use crate::panels::{PanelQuery, PanelSource};

/// Queries each referenced panel in order and writes one CSV per schedule.
pub struct PanelReportMaterializer {
    source: Arc<dyn PanelSource>,
}

impl PanelReportMaterializer {
    pub fn new(source: Arc<dyn PanelSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ReportMaterializer for PanelReportMaterializer {
    async fn materialize(
        &self,
        schedule: &Schedule,
        now: i64,
        artifacts: &ArtifactDir,
    ) -> Result<Document> {
        let mut document = CsvDocument::new();

        for content in &schedule.panel_details {
            let (from, to) = lookback::window(schedule, content, now)?;
            let query = PanelQuery {
                dashboard_id: content.dashboard_id.clone(),
                panel_id: content.panel_id,
                from,
                to,
                variables: PanelQuery::parse_variables(&content.variables),
            };
            let data = self.source.fetch(&query).await?;
            tracing::debug!(
                "📈 Panel {}/{} returned {} row(s) from {}",
                content.dashboard_id,
                content.panel_id,
                data.rows.len(),
                self.source.name()
            );
            document.push_section(&format!("Panel {}", content.panel_id), &data);
        }

        if schedule.panel_details.is_empty() {
            tracing::warn!("⚠️ Schedule '{}' references no panels", schedule.name);
        }

        let file_name = document_file_name(schedule, now)?;
        let path = artifacts.file(&file_name)?;
        let (sections, rows) = (document.sections(), document.rows());
        tokio::fs::write(&path, document.into_bytes())
            .await
            .map_err(|e| EresError::Materialize(format!("Write {}: {e}", path.display())))?;

        tracing::info!(
            "📄 Materialized '{}': {} section(s), {} row(s)",
            file_name,
            sections,
            rows
        );
        Ok(Document {
            schedule_id: schedule.id.clone(),
            path,
            file_name,
            sections,
            rows,
        })
    }
}
