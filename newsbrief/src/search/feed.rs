use anyhow::{Context, Result};
use feed_rs::model::Entry;
use feed_rs::parser;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

use super::{clean_snippet, sanitize_domain, FeedProvider};
use crate::model::SearchResult;
use crate::retry::RetryPolicy;

/// Fetches RSS/Atom feeds over HTTP and maps entries to search results.
pub struct FeedReader {
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl FeedReader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("newsbrief/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
            client,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                info!("Retrying feed fetch for {} (attempt {}/{})", url, attempt, self.retry.max_attempts);
                self.retry.wait_before(attempt).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response.bytes().await.context("failed to read response body")?;
                        return Ok(bytes.to_vec());
                    } else if status.is_server_error()
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    {
                        last_error = Some(anyhow::anyhow!("feed server returned {}", status));
                        continue;
                    } else {
                        // 4xx other than 429 will not get better on retry
                        anyhow::bail!("feed fetch failed with status: {}", status);
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
    }
}

#[async_trait::async_trait]
impl FeedProvider for FeedReader {
    async fn latest(&self, url: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let body = self.fetch(url).await?;
        let feed = parser::parse(body.as_slice()).context("failed to parse feed")?;
        info!("Fetched feed '{}': {} entries", url, feed.entries.len());

        Ok(feed
            .entries
            .iter()
            .filter_map(entry_to_result)
            .take(limit)
            .collect())
    }
}

fn entry_to_result(entry: &Entry) -> Option<SearchResult> {
    let title = entry.title.as_ref().map(|t| t.content.trim().to_string())?;
    let url = entry.links.first().map(|l| l.href.clone())?;
    if title.is_empty() || url.is_empty() {
        return None;
    }

    let raw = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();
    let text = clean_snippet(&raw);

    Some(SearchResult {
        title,
        source_name: sanitize_domain(&url),
        score: parse_points(&text),
        snippet: text,
        url,
        source_index: 0,
    })
}

/// Point count in aggregator feeds, e.g. "Points: 412" in hnrss entries.
fn parse_points(text: &str) -> Option<u32> {
    static POINTS: OnceLock<Regex> = OnceLock::new();
    let re = POINTS.get_or_init(|| Regex::new(r"(?i)\bpoints:\s*(\d+)").expect("valid regex"));
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Hacker News: Front Page</title>
    <link>https://news.ycombinator.com/</link>
    <item>
      <title>Show HN: A tiny database</title>
      <link>https://www.example.com/tiny-db</link>
      <description><![CDATA[<p>Article URL: https://www.example.com/tiny-db</p><p>Points: 412</p><p># Comments: 87</p>]]></description>
    </item>
    <item>
      <title></title>
      <link>https://example.com/untitled</link>
    </item>
    <item>
      <title>Plain entry</title>
      <link>https://blog.example.org/post</link>
      <description>No score here</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn maps_entries_and_points() {
        let feed = parser::parse(RSS.as_bytes()).expect("parse rss");
        let results: Vec<_> = feed.entries.iter().filter_map(entry_to_result).collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Show HN: A tiny database");
        assert_eq!(results[0].source_name, "example.com");
        assert_eq!(results[0].score, Some(412));
        assert_eq!(results[1].score, None);
    }

    #[tokio::test]
    async fn reads_feed_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rss")
            .with_status(200)
            .with_header("content-type", "application/rss+xml")
            .with_body(RSS)
            .create_async()
            .await;

        let reader = FeedReader::new(Duration::from_secs(5))
            .expect("client")
            .with_retry(RetryPolicy::none());
        let results = reader
            .latest(&format!("{}/rss", server.url()), 1)
            .await
            .expect("feed");

        assert_eq!(results.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/gone")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let reader = FeedReader::new(Duration::from_secs(5))
            .expect("client")
            .with_retry(RetryPolicy::new(3, Duration::ZERO));
        let err = reader
            .latest(&format!("{}/gone", server.url()), 3)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("404"));
        mock.assert_async().await;
    }
}
