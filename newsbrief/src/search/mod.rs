use anyhow::Result;
use common::{Category, SourceKind};
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::model::{DegradedReason, SearchResult};

pub mod brave;
pub mod feed;

/// A single query against a web search provider
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub category: String,
    pub count: usize,
}

/// Core trait for web search providers
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query. Results carry the result domain as `source_name`.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>>;
}

/// Reads the newest entries of an RSS/Atom feed
#[async_trait::async_trait]
pub trait FeedProvider: Send + Sync {
    async fn latest(&self, url: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

/// Caps applied per category to stay inside provider rate limits
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub results_per_query: usize,
    pub max_queries_per_category: usize,
    pub max_results_per_category: usize,
    pub politeness_delay: Duration,
}

impl SearchLimits {
    pub fn from_config(cfg: &common::SearchConfig) -> Self {
        Self {
            results_per_query: cfg.results_per_query(),
            max_queries_per_category: cfg.max_queries_per_category(),
            max_results_per_category: cfg.max_results_per_category(),
            politeness_delay: cfg.politeness_delay(),
        }
    }
}

/// Result of searching one category. Never an error: failures become a degraded signal.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryOutcome {
    Found(Vec<SearchResult>),
    Degraded(DegradedReason),
}

/// Turns a category's source list into a bounded, ordered result list.
pub struct CategorySearcher {
    search: Arc<dyn SearchProvider>,
    feeds: Arc<dyn FeedProvider>,
    limits: SearchLimits,
    searched: AtomicBool,
}

impl CategorySearcher {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        feeds: Arc<dyn FeedProvider>,
        limits: SearchLimits,
    ) -> Self {
        Self {
            search,
            feeds,
            limits,
            searched: AtomicBool::new(false),
        }
    }

    pub async fn search_category(&self, category: &Category) -> CategoryOutcome {
        let mut results: Vec<SearchResult> = Vec::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;

        if category.sources.len() > self.limits.max_queries_per_category {
            warn!(
                category = %category.name,
                sources = category.sources.len(),
                cap = self.limits.max_queries_per_category,
                "too many sources; extra sources skipped"
            );
        }

        for (index, source) in category
            .sources
            .iter()
            .enumerate()
            .take(self.limits.max_queries_per_category)
        {
            attempted += 1;
            let fetched = match source.kind {
                SourceKind::Feed => self
                    .feeds
                    .latest(&source.url, self.limits.results_per_query)
                    .await
                    .map_err(|e| SearchError::Feed {
                        url: source.url.clone(),
                        source: e,
                    }),
                SourceKind::Site | SourceKind::Web => {
                    let base = category.query_for(source);
                    let query = match (source.kind, source.host()) {
                        (SourceKind::Site, Some(host)) => format!("{} site:{}", base, host),
                        _ => base.to_string(),
                    };
                    self.pace().await;
                    let request = SearchRequest {
                        query: query.clone(),
                        category: category.name.clone(),
                        count: self.limits.results_per_query,
                    };
                    self.search
                        .search(&request)
                        .await
                        .map_err(|e| SearchError::Provider { query, source: e })
                }
            };

            match fetched {
                Ok(items) => {
                    debug!(category = %category.name, source = %source.name, count = items.len(), "source searched");
                    for mut item in items.into_iter().take(self.limits.results_per_query) {
                        item.source_index = index;
                        if source.kind != SourceKind::Web {
                            item.source_name = source.name.clone();
                        }
                        results.push(item);
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(category = %category.name, source = %source.name, error = %e, "source search failed");
                }
            }
        }

        if attempted > 0 && failed == attempted {
            warn!(category = %category.name, "all sources failed; category degraded");
            return CategoryOutcome::Degraded(DegradedReason::SearchUnavailable);
        }

        let results = dedup_and_cap(results, self.limits.max_results_per_category);
        if results.is_empty() {
            info!(category = %category.name, "search returned no results");
            return CategoryOutcome::Degraded(DegradedReason::NoResults);
        }

        info!(category = %category.name, count = results.len(), failed, "category searched");
        CategoryOutcome::Found(results)
    }

    /// Spread provider calls out: every call after the first waits the politeness delay
    /// plus a random jitter of up to the same amount.
    async fn pace(&self) {
        if !self.searched.swap(true, Ordering::SeqCst) {
            return;
        }
        let base = self.limits.politeness_delay;
        if base.is_zero() {
            return;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
    }
}

fn dedup_and_cap(results: Vec<SearchResult>, cap: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(dedup_key(&r.url)))
        .take(cap)
        .collect()
}

/// Scheme and host are case-insensitive; the path is not.
fn dedup_key(raw: &str) -> String {
    let key = match url::Url::parse(raw.trim()) {
        Ok(url) => url.to_string(),
        Err(_) => raw.trim().to_string(),
    };
    key.trim_end_matches('/').to_string()
}

/// Host of `url`, lowercased, without a leading `www.`; "Unknown" when unparseable.
pub fn sanitize_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|h| h.trim_start_matches("www.").to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Strip HTML markup and entities from a snippet and collapse whitespace.
pub fn clean_snippet(raw: &str) -> String {
    let fragment = scraper::Html::parse_fragment(raw);
    // Adjacent nodes such as `<p>a</p><p>b</p>` must not run together
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
