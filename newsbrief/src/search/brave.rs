use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use super::{clean_snippet, sanitize_domain, SearchProvider, SearchRequest};
use crate::model::SearchResult;
use crate::retry::RetryPolicy;

/// Brave Web Search API client
pub struct BraveSearch {
    api_url: String,
    api_key: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl BraveSearch {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("newsbrief/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
            client,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait::async_trait]
impl SearchProvider for BraveSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let count = request.count.to_string();
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                info!(
                    query = %request.query,
                    attempt,
                    max = self.retry.max_attempts,
                    "retrying search after {:?}",
                    self.retry.delay_before(attempt)
                );
                self.retry.wait_before(attempt).await;
            }

            let sent = self
                .client
                .get(&self.api_url)
                .query(&[("q", request.query.as_str()), ("count", count.as_str())])
                .header("Accept", "application/json")
                .header("X-Subscription-Token", &self.api_key)
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: BraveResponse = response
                            .json()
                            .await
                            .context("failed to parse Brave search response")?;
                        let results = body.into_results(request.count);
                        info!(query = %request.query, category = %request.category, count = results.len(), "Brave search complete");
                        return Ok(results);
                    } else if status.is_server_error()
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    {
                        last_error = Some(anyhow::anyhow!("Brave API returned {}", status));
                        continue;
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        anyhow::bail!("Brave API error {}: {}", status, body);
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::Error::new(e).context("network error during search"));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("search failed"))
            .context(format!("gave up after {} attempt(s)", self.retry.max_attempts)))
    }
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

impl BraveResponse {
    fn into_results(self, limit: usize) -> Vec<SearchResult> {
        self.web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.title.trim().is_empty() && !r.url.trim().is_empty())
            .take(limit)
            .map(|r| SearchResult {
                title: clean_snippet(&r.title),
                source_name: sanitize_domain(&r.url),
                snippet: clean_snippet(&r.description),
                url: r.url,
                source_index: 0,
                score: None,
            })
            .collect()
    }
}
