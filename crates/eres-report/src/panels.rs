//! Panel data sources.
//!
//! A panel query is keyed by dashboard and panel ID, bounded by a `[from, to]`
//! window, and carries the panel's template variables. The answer is a titled
//! table.

use async_trait::async_trait;
use eres_core::config::HttpEndpointConfig;
use eres_core::error::{EresError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One panel query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelQuery {
    pub dashboard_id: String,
    pub panel_id: i64,
    /// Window start, unix seconds.
    pub from: i64,
    /// Window end, unix seconds.
    pub to: i64,
    pub variables: serde_json::Value,
}

impl PanelQuery {
    /// Stored variables are an opaque string: JSON when it parses, a plain
    /// string otherwise, null when empty.
    pub fn parse_variables(raw: &str) -> serde_json::Value {
        let raw = raw.trim();
        if raw.is_empty() {
            return serde_json::Value::Null;
        }
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
    }
}

/// Tabular result of one panel query.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PanelData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Where panel data comes from.
#[async_trait]
pub trait PanelSource: Send + Sync {
    fn name(&self) -> &str;

    /// Run one panel query. Zero rows is a valid answer, not an error.
    async fn fetch(&self, query: &PanelQuery) -> Result<PanelData>;
}

/// Panel source reached over HTTP: `POST <url>` with a [`PanelQuery`] body,
/// answered by a [`PanelData`] JSON object.
pub struct HttpPanelSource {
    client: reqwest::Client,
    config: HttpEndpointConfig,
}

impl HttpPanelSource {
    pub fn new(config: HttpEndpointConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(EresError::Config("panels.url is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| EresError::Config(format!("Panel client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PanelSource for HttpPanelSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, query: &PanelQuery) -> Result<PanelData> {
        let mut request = self.client.post(&self.config.url).json(query);
        if !self.config.username.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }

        let response = request.send().await.map_err(|e| {
            EresError::Materialize(format!("Panel {} request failed: {e}", query.panel_id))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EresError::Materialize(format!(
                "Panel {} on {}: HTTP {status}: {}",
                query.panel_id,
                query.dashboard_id,
                body.chars().take(200).collect::<String>()
            )));
        }

        response.json::<PanelData>().await.map_err(|e| {
            EresError::Materialize(format!("Panel {} malformed response: {e}", query.panel_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> HttpPanelSource {
        HttpPanelSource::new(HttpEndpointConfig {
            url: format!("{}/api/panels/query", server.uri()),
            timeout_secs: 5,
            ..HttpEndpointConfig::default()
        })
        .unwrap()
    }

    fn query() -> PanelQuery {
        PanelQuery {
            dashboard_id: "dash".into(),
            panel_id: 3,
            from: 1000,
            to: 2000,
            variables: PanelQuery::parse_variables(r#"{"site":"north"}"#),
        }
    }

    #[test]
    fn test_parse_variables() {
        assert_eq!(PanelQuery::parse_variables(""), serde_json::Value::Null);
        assert_eq!(PanelQuery::parse_variables(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(PanelQuery::parse_variables("site=north"), json!("site=north"));
    }

    #[tokio::test]
    async fn test_fetch_sends_window_and_variables() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/panels/query"))
            .and(body_json(json!({
                "dashboardId": "dash",
                "panelId": 3,
                "from": 1000,
                "to": 2000,
                "variables": {"site": "north"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "Stock",
                "columns": ["sku", "qty"],
                "rows": [["A-1", 4], ["B-2", 0]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let data = source(&server).fetch(&query()).await.unwrap();
        assert_eq!(data.title, "Stock");
        assert_eq!(data.columns, vec!["sku", "qty"]);
        assert_eq!(data.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "Empty"})))
            .mount(&server)
            .await;

        let data = source(&server).fetch(&query()).await.unwrap();
        assert!(data.rows.is_empty());
        assert!(data.columns.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_is_materialize_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("query timeout"))
            .mount(&server)
            .await;

        let err = source(&server).fetch(&query()).await.unwrap_err();
        assert!(matches!(err, EresError::Materialize(ref m) if m.contains("query timeout")));
    }
}
