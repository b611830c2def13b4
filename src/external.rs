//! Optional external knowledge source.
//!
//! When enabled, the retrieval engine consults an external service before
//! scoring local chunks and blends its hits in ahead of local results with a
//! fixed very-high priority score. The capability is a trait so the service
//! can be an HTTP endpoint, another process, or a test double.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ExternalConfig;
use crate::error::{CacheError, Result};
use crate::search::QueryFilters;

/// A hit returned by an external knowledge source.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalHit {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Capability trait for external knowledge sources.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn name(&self) -> &str;

    /// Query the source. Filters are forwarded verbatim; sources are free to
    /// ignore them.
    async fn query(&self, text: &str, filters: Option<&QueryFilters>) -> Result<Vec<ExternalHit>>;
}

/// Build the configured source, or `None` when disabled.
pub fn create_knowledge_source(config: &ExternalConfig) -> Option<Box<dyn KnowledgeSource>> {
    if !config.enabled {
        return None;
    }
    config.url.as_ref().map(|url| {
        Box::new(HttpKnowledgeSource {
            url: url.clone(),
            timeout_secs: config.timeout_secs,
        }) as Box<dyn KnowledgeSource>
    })
}

/// HTTP knowledge source: `POST <url>` with `{"query", "filters"}`,
/// expecting `{"results": [{"content", "metadata"}]}`.
pub struct HttpKnowledgeSource {
    url: String,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct KnowledgeResponse {
    #[serde(default)]
    results: Vec<ExternalHit>,
}

#[async_trait]
impl KnowledgeSource for HttpKnowledgeSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn query(&self, text: &str, filters: Option<&QueryFilters>) -> Result<Vec<ExternalHit>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| CacheError::ExternalSourceFailure(e.to_string()))?;

        let body = serde_json::json!({
            "query": text,
            "filters": filters,
        });

        let response = client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CacheError::ExternalSourceFailure(format!(
                    "knowledge source unreachable at {}: {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CacheError::ExternalSourceFailure(format!(
                "knowledge source error {}: {}",
                status, text
            )));
        }

        let parsed: KnowledgeResponse = response.json().await.map_err(|e| {
            CacheError::ExternalSourceFailure(format!("invalid knowledge source response: {}", e))
        })?;

        Ok(parsed.results)
    }
}
