//! CSV report document: one `# title` section per panel.

use chrono::{TimeZone, Utc};
use eres_core::error::{EresError, Result};
use eres_core::types::{Schedule, sanitize};

use crate::panels::PanelData;

const DEFAULT_DATE_FORMAT: &str = "YYYY-MM-DD";

/// In-memory CSV document, built section by section.
#[derive(Debug, Default)]
pub struct CsvDocument {
    buf: String,
    sections: usize,
    rows: usize,
}

impl CsvDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one panel as a section. An empty panel still writes its title
    /// and header.
    pub fn push_section(&mut self, fallback_title: &str, data: &PanelData) {
        let title = if data.title.trim().is_empty() {
            fallback_title
        } else {
            data.title.trim()
        };
        self.buf.push_str("# ");
        self.buf.push_str(&title.replace(['\r', '\n'], " "));
        self.buf.push('\n');

        write_record(&mut self.buf, data.columns.iter().map(|c| quote(c)));
        for row in &data.rows {
            write_record(&mut self.buf, row.iter().map(cell));
        }
        self.buf.push('\n');

        self.sections += 1;
        self.rows += data.rows.len();
    }

    pub fn sections(&self) -> usize {
        self.sections
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_bytes()
    }
}

fn write_record(buf: &mut String, fields: impl Iterator<Item = String>) {
    let line: Vec<String> = fields.collect();
    buf.push_str(&line.join(","));
    buf.push('\n');
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

/// Quote a field when it contains a separator, a quote or a line break.
fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render `ts` with `YYYY`/`YY`/`MM`/`DD`/`HH`/`mm`/`ss` tokens. Other
/// characters pass through unchanged.
pub fn format_date(format: &str, ts: i64) -> Result<String> {
    let instant = Utc
        .timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| EresError::Materialize(format!("timestamp {ts} out of range")))?;

    const TOKENS: [(&str, &str); 7] = [
        ("YYYY", "%Y"),
        ("YY", "%y"),
        ("MM", "%m"),
        ("DD", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ];

    let mut pattern = String::with_capacity(format.len() * 2);
    let mut rest = format;
    'outer: while let Some(c) = rest.chars().next() {
        for (token, directive) in TOKENS {
            if let Some(after) = rest.strip_prefix(token) {
                pattern.push_str(directive);
                rest = after;
                continue 'outer;
            }
        }
        if c == '%' {
            pattern.push_str("%%");
        } else {
            pattern.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    Ok(instant.format(&pattern).to_string())
}

/// Attachment file name for a schedule's document run at `now`.
///
/// `date_position` `start` prefixes the rendered date, `end` suffixes it,
/// anything else leaves it out.
pub fn document_file_name(schedule: &Schedule, now: i64) -> Result<String> {
    let name = sanitize(&schedule.name);
    let position = schedule.date_position.trim().to_ascii_lowercase();
    if position != "start" && position != "end" {
        return Ok(format!("{name}.csv"));
    }

    let format = if schedule.date_format.trim().is_empty() {
        DEFAULT_DATE_FORMAT
    } else {
        schedule.date_format.trim()
    };
    let stamp = sanitize(&format_date(format, now)?);
    Ok(if position == "start" {
        format!("{stamp}_{name}.csv")
    } else {
        format!("{name}_{stamp}.csv")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // 2026-02-22 09:05:07 UTC
    const TS: i64 = 1_771_751_107;

    #[test]
    fn test_sections_and_quoting() {
        let mut doc = CsvDocument::new();
        doc.push_section(
            "Panel 1",
            &PanelData {
                title: "Stock".into(),
                columns: vec!["sku".into(), "note".into()],
                rows: vec![
                    vec![json!("A-1"), json!("fine")],
                    vec![json!("B,2"), json!("say \"hi\"")],
                    vec![json!(4.5), serde_json::Value::Null],
                ],
            },
        );
        assert_eq!(
            doc.as_str(),
            "# Stock\nsku,note\nA-1,fine\n\"B,2\",\"say \"\"hi\"\"\"\n4.5,\n\n"
        );
        assert_eq!(doc.sections(), 1);
        assert_eq!(doc.rows(), 3);
    }

    #[test]
    fn test_empty_panel_keeps_title_and_header() {
        let mut doc = CsvDocument::new();
        doc.push_section(
            "Panel 7",
            &PanelData {
                title: String::new(),
                columns: vec!["when".into()],
                rows: vec![],
            },
        );
        assert_eq!(doc.as_str(), "# Panel 7\nwhen\n\n");
        assert_eq!(doc.sections(), 1);
        assert_eq!(doc.rows(), 0);
    }

    #[test]
    fn test_format_date_tokens() {
        assert_eq!(format_date("YYYY-MM-DD", TS).unwrap(), "2026-02-22");
        assert_eq!(format_date("DD.MM.YY HH:mm:ss", TS).unwrap(), "22.02.26 09:05:07");
        assert_eq!(format_date("100% YYYY", TS).unwrap(), "100% 2026");
    }

    #[test]
    fn test_file_name_positions() {
        let mut schedule = Schedule::new("Weekly stock", 604_800, "g");
        assert_eq!(document_file_name(&schedule, TS).unwrap(), "Weekly_stock.csv");

        schedule.date_position = "start".into();
        assert_eq!(
            document_file_name(&schedule, TS).unwrap(),
            "2026-02-22_Weekly_stock.csv"
        );

        schedule.date_position = "End".into();
        schedule.date_format = "YYYYMMDD".into();
        assert_eq!(
            document_file_name(&schedule, TS).unwrap(),
            "Weekly_stock_20260222.csv"
        );
    }
}
