//! # eres Report
//!
//! The Report Content Materializer: runs every panel query a schedule
//! references over its lookback window and writes the results as sections of
//! a single CSV document inside the run's artifact directory.
//!
//! ```text
//! Schedule.panel_details ─▶ lookback::window ─▶ PanelSource::fetch
//!                                                   │
//!                         CsvDocument::push_section ◀┘ ─▶ <artifacts>/<file>.csv
//! ```

pub mod document;
pub mod lookback;
pub mod materializer;
pub mod panels;

pub use document::{CsvDocument, document_file_name};
pub use materializer::PanelReportMaterializer;
pub use panels::{HttpPanelSource, PanelData, PanelQuery, PanelSource};
