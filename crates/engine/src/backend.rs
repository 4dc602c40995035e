//! Search backend abstraction and the OpenSearch implementation.
//!
//! The orchestrator only depends on [`SearchBackend`], so tests can swap in
//! a canned-response mock instead of a live cluster.

use std::time::Duration;

use lookout_core::config::OpenSearchConfig;

/// Errors raised while executing a search.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Transport failure (connection refused, TLS, malformed body...).
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The cluster answered with a non-2xx status.
    #[error("search returned {status}: {body}")]
    Status { status: u16, body: String },

    /// No answer within the per-query deadline.
    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    /// The HTTP client could not be constructed.
    #[error("cannot build search client: {0}")]
    Build(String),
}

/// Executes a search body against an index pattern.
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run `body` against `index` and return the raw JSON response.
    async fn execute(
        &self,
        index: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, BackendError>;
}

/// [`SearchBackend`] speaking the OpenSearch `_search` REST API.
pub struct OpenSearchClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl OpenSearchClient {
    /// Build a client from connection settings.
    ///
    /// `timeout` bounds each request at the HTTP layer. With
    /// `verify_certs = false` self-signed certificates are accepted.
    pub fn from_config(config: &OpenSearchConfig, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()
            .map_err(|e| BackendError::Build(e.to_string()))?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), pass) => Some((user.clone(), pass.clone().unwrap_or_default())),
            _ => None,
        };

        if !config.verify_certs {
            tracing::warn!(url = %config.base_url(), "TLS certificate verification disabled");
        }

        Ok(Self { client, base_url: config.base_url(), credentials })
    }

    fn search_url(&self, index: &str) -> String {
        format!("{}/{}/_search", self.base_url.trim_end_matches('/'), index)
    }
}

#[async_trait::async_trait]
impl SearchBackend for OpenSearchClient {
    async fn execute(
        &self,
        index: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, BackendError> {
        let url = self.search_url(index);
        let mut request = self.client.post(&url).json(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let start = std::time::Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(start.elapsed())
            } else {
                BackendError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Status { status: status.as_u16(), body });
        }

        let json: serde_json::Value = response.json().await?;
        tracing::debug!(
            index,
            duration_ms = start.elapsed().as_millis() as u64,
            "search completed"
        );
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(use_ssl: bool) -> OpenSearchConfig {
        OpenSearchConfig {
            host: "search.internal".into(),
            port: 9200,
            username: Some("lookout".into()),
            password: None,
            use_ssl,
            verify_certs: false,
        }
    }

    #[test]
    fn search_url_per_index() {
        let client = OpenSearchClient::from_config(&config(true), Duration::from_secs(5)).unwrap();
        assert_eq!(client.search_url("web-*"), "https://search.internal:9200/web-*/_search");

        let client = OpenSearchClient::from_config(&config(false), Duration::from_secs(5)).unwrap();
        assert_eq!(client.search_url("auth"), "http://search.internal:9200/auth/_search");
    }

    #[test]
    fn username_without_password_still_authenticates() {
        let client = OpenSearchClient::from_config(&config(true), Duration::from_secs(5)).unwrap();
        assert_eq!(client.credentials, Some(("lookout".to_string(), String::new())));
    }

    #[test]
    fn status_error_message() {
        let err = BackendError::Status { status: 404, body: "index_not_found_exception".into() };
        assert_eq!(err.to_string(), "search returned 404: index_not_found_exception");
    }
}
