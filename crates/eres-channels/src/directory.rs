//! HTTP Recipient Directory: resolves user IDs to email addresses.
//!
//! Wire format: `POST <url>` with `{"userIds": [...]}`, answered by a JSON
//! array of `{"id": ..., "email": ...}`. Users missing from the answer, or with
//! a null/blank email, are treated as having no address.

use async_trait::async_trait;
use eres_core::config::HttpEndpointConfig;
use eres_core::error::{EresError, Result};
use eres_core::traits::RecipientDirectory;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Users per request.
const BATCH_SIZE: usize = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    user_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Recipient Directory reached over HTTP with optional basic auth.
pub struct HttpRecipientDirectory {
    client: reqwest::Client,
    config: HttpEndpointConfig,
}

impl HttpRecipientDirectory {
    pub fn new(config: HttpEndpointConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(EresError::Config("directory.url is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| EresError::Config(format!("Directory client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn lookup_batch(&self, user_ids: &[String]) -> Result<Vec<DirectoryEntry>> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&LookupRequest { user_ids });
        if !self.config.username.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EresError::DirectoryUnavailable(format!("Request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EresError::DirectoryUnavailable(format!(
                "HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json::<Vec<DirectoryEntry>>()
            .await
            .map_err(|e| EresError::DirectoryUnavailable(format!("Malformed response: {e}")))
    }
}

#[async_trait]
impl RecipientDirectory for HttpRecipientDirectory {
    async fn emails_for(&self, user_ids: &[String]) -> Result<HashMap<String, String>> {
        let mut emails = HashMap::new();
        if user_ids.is_empty() {
            return Ok(emails);
        }

        let requested: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
        for batch in user_ids.chunks(BATCH_SIZE) {
            for entry in self.lookup_batch(batch).await? {
                let Some(email) = entry.email.map(|e| e.trim().to_string()) else {
                    continue;
                };
                if email.is_empty() || !requested.contains(entry.id.as_str()) {
                    continue;
                }
                emails.entry(entry.id).or_insert(email);
            }
        }

        tracing::debug!(
            "📇 Directory resolved {}/{} user(s)",
            emails.len(),
            user_ids.len()
        );
        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn directory(server: &MockServer, username: &str) -> HttpRecipientDirectory {
        HttpRecipientDirectory::new(HttpEndpointConfig {
            url: format!("{}/api/users/emails", server.uri()),
            username: username.into(),
            password: "pass".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_partial_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users/emails"))
            .and(body_json(json!({"userIds": ["U1", "U2", "U3"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "U1", "email": "a@x.com"},
                {"id": "U2", "email": null},
                {"id": "U9", "email": "stranger@x.com"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let emails = directory(&server, "")
            .emails_for(&ids(&["U1", "U2", "U3"]))
            .await
            .unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails.get("U1").map(String::as_str), Some("a@x.com"));
        assert!(!emails.contains_key("U2"));
        assert!(!emails.contains_key("U9"));
    }

    #[tokio::test]
    async fn test_sends_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"id": "U1", "email": " a@x.com "}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let emails = directory(&server, "user")
            .emails_for(&ids(&["U1"]))
            .await
            .unwrap();
        assert_eq!(emails["U1"], "a@x.com");
    }

    #[tokio::test]
    async fn test_server_error_is_directory_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = directory(&server, "")
            .emails_for(&ids(&["U1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EresError::DirectoryUnavailable(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_malformed_body_is_directory_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        assert!(matches!(
            directory(&server, "").emails_for(&ids(&["U1"])).await,
            Err(EresError::DirectoryUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let emails = directory(&server, "").emails_for(&[]).await.unwrap();
        assert!(emails.is_empty());
    }

    #[test]
    fn test_requires_url() {
        assert!(matches!(
            HttpRecipientDirectory::new(HttpEndpointConfig::default()),
            Err(EresError::Config(_))
        ));
    }
}
