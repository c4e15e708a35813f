// Briefing summarizer: turns search results into Chinese briefing items
use chrono::NaiveDate;
use common::{Category, LlmConfig};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::{extract_json_from_text, LlmProvider, LlmRequest};
use crate::error::SummarizeError;
use crate::model::{BriefingItem, SearchResult, Section};
use crate::retry::RetryPolicy;

const SYSTEM_PROMPT: &str = "You are a news briefing assistant. You read English news search \
results and write concise briefings in Simplified Chinese. Reply with a single JSON object \
and nothing else: no Markdown, no commentary, no Slack notes.";

#[derive(Debug, Clone, Copy)]
pub struct SummarizerSettings {
    pub items_per_category: usize,
    pub takeaways: usize,
    pub max_tokens: usize,
    pub temperature: f32,
    pub retry: RetryPolicy,
}

impl SummarizerSettings {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            items_per_category: cfg.items_per_category(),
            takeaways: cfg.takeaways(),
            max_tokens: cfg.max_tokens(),
            temperature: cfg.temperature(),
            retry: RetryPolicy::new(cfg.max_attempts(), cfg.backoff()),
        }
    }
}

pub struct BriefingSummarizer {
    provider: Arc<dyn LlmProvider>,
    settings: SummarizerSettings,
}

impl BriefingSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: SummarizerSettings) -> Self {
        Self { provider, settings }
    }

    /// Summarize the best results of one category into briefing items, ordered by source
    /// declaration order.
    pub async fn summarize_category(
        &self,
        date: NaiveDate,
        category: &Category,
        results: &[SearchResult],
    ) -> Result<Vec<BriefingItem>, SummarizeError> {
        if results.is_empty() {
            return Err(SummarizeError::NoInput);
        }

        let selected = select_top(results, self.settings.items_per_category);
        let prompt = category_prompt(date, category, &selected);

        let items = self
            .call_with_retry(&category.name, prompt, |content| parse_items(content, &selected))
            .await?;

        if items.len() < selected.len() {
            warn!(
                category = %category.name,
                items = items.len(),
                selected = selected.len(),
                "model returned fewer items than results"
            );
        }
        info!(category = %category.name, items = items.len(), "category summarized");
        Ok(items)
    }

    /// Short cross-category takeaways for the whole briefing.
    pub async fn key_takeaways(
        &self,
        date: NaiveDate,
        sections: &[Section],
    ) -> Result<Vec<String>, SummarizeError> {
        let digest: Vec<_> = sections
            .iter()
            .filter(|s| !s.items().is_empty())
            .map(|s| {
                json!({
                    "category": s.category,
                    "headlines": s.items().iter().map(|i| i.headline.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();

        if digest.is_empty() {
            return Err(SummarizeError::NoInput);
        }

        let count = self.settings.takeaways;
        let prompt = format!(
            r#"Date: {date}

Below are today's briefing headlines grouped by category. Write exactly {count} key takeaways
for the whole day in Simplified Chinese, one sentence each, most important first.

OUTPUT FORMAT (strict JSON):
{{"takeaways": ["...", "..."]}}

HEADLINES (JSON):
{digest:#}
"#,
            date = date,
            count = count,
            digest = serde_json::Value::Array(digest),
        );

        let takeaways = self
            .call_with_retry("key takeaways", prompt, |content| parse_takeaways(content, count))
            .await?;

        info!(count = takeaways.len(), "key takeaways generated");
        Ok(takeaways)
    }

    /// Bounded retry loop around one model call. Unparseable output counts as a failed
    /// attempt.
    async fn call_with_retry<T, F>(
        &self,
        label: &str,
        prompt: String,
        parse: F,
    ) -> Result<T, SummarizeError>
    where
        F: Fn(&str) -> anyhow::Result<T>,
    {
        let retry = self.settings.retry;
        let mut last_error = None;

        for attempt in 1..=retry.max_attempts {
            if attempt > 1 {
                retry.wait_before(attempt).await;
            }

            let request = LlmRequest {
                system: Some(SYSTEM_PROMPT.to_string()),
                prompt: prompt.clone(),
                max_tokens: Some(self.settings.max_tokens),
                temperature: Some(self.settings.temperature),
                timeout_seconds: None,
            };

            let outcome = match self.provider.generate(request).await {
                Ok(response) => {
                    info!(
                        label,
                        attempt,
                        model = %response.model,
                        tokens = response.usage.total_tokens,
                        "model responded"
                    );
                    parse(&response.content)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(label, attempt, max = retry.max_attempts, error = %format!("{:#}", e), "summarization attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(SummarizeError::Exhausted {
            attempts: retry.max_attempts,
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt made")),
        })
    }
}

/// Pick the `n` best results: highest score first, unscored results after scored ones,
/// ties kept in input order. The picks are returned in input order.
pub fn select_top(results: &[SearchResult], n: usize) -> Vec<SearchResult> {
    let mut ranked: Vec<usize> = (0..results.len()).collect();
    ranked.sort_by_key(|&i| std::cmp::Reverse(results[i].score.map(|s| s as i64).unwrap_or(-1)));
    let mut picked: Vec<usize> = ranked.into_iter().take(n).collect();
    picked.sort_unstable();
    picked.into_iter().map(|i| results[i].clone()).collect()
}

fn category_prompt(date: NaiveDate, category: &Category, selected: &[SearchResult]) -> String {
    let entries: Vec<_> = selected
        .iter()
        .enumerate()
        .map(|(i, r)| {
            json!({
                "id": i + 1,
                "title": r.title,
                "source": r.source_name,
                "points": r.score,
                "snippet": r.snippet,
                "url": r.url,
            })
        })
        .collect();

    format!(
        r#"Date: {date}
Category: {category}

Summarize the news search results below for a Chinese daily briefing.

RULES:
1. Write exactly one item per result, {max} items in total, in Simplified Chinese.
2. "headline": a short Chinese headline (no Markdown, no trailing period).
3. "summary": 1-2 sentences with the key facts.
4. "why_it_matters": exactly 1 sentence on why a reader should care.
5. "id": the id of the result the item is based on. Never invent facts or sources.

OUTPUT FORMAT (strict JSON):
{{"items": [{{"id": 1, "headline": "...", "summary": "...", "why_it_matters": "..."}}]}}

SEARCH RESULTS (JSON):
{results:#}
"#,
        date = date,
        category = category.name,
        max = selected.len(),
        results = serde_json::Value::Array(entries),
    )
}

#[derive(Debug, Deserialize)]
struct ItemsJson {
    #[serde(default)]
    items: Vec<ItemJson>,
}

#[derive(Debug, Deserialize)]
struct ItemJson {
    #[serde(default)]
    id: Option<usize>,
    #[serde(default)]
    headline: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    why_it_matters: String,
}

#[derive(Debug, Deserialize)]
struct TakeawaysJson {
    #[serde(default)]
    takeaways: Vec<String>,
}

fn parse_items(content: &str, selected: &[SearchResult]) -> anyhow::Result<Vec<BriefingItem>> {
    let cleaned = extract_json_from_text(content)
        .ok_or_else(|| anyhow::anyhow!("no JSON object in model output"))?;
    let parsed: ItemsJson = serde_json::from_str(&cleaned)
        .map_err(|e| anyhow::anyhow!("model output is not valid briefing JSON: {}", e))?;

    let mut seen = HashSet::new();
    let mut items: Vec<(usize, BriefingItem)> = Vec::new();

    for raw in parsed.items {
        let Some(id) = raw.id.filter(|id| (1..=selected.len()).contains(id)) else {
            warn!(id = ?raw.id, "dropping item with unknown result id");
            continue;
        };
        if !seen.insert(id) {
            continue;
        }

        let headline = clean_headline(&raw.headline);
        let summary = limit_sentences(&raw.summary, 2);
        let why_it_matters = limit_sentences(&raw.why_it_matters, 1);
        if headline.is_empty() || summary.is_empty() || why_it_matters.is_empty() {
            warn!(id, "dropping incomplete item");
            continue;
        }

        let result = &selected[id - 1];
        items.push((
            id,
            BriefingItem {
                headline,
                source: result.source_name.clone(),
                source_index: result.source_index,
                points: result.score,
                url: Some(result.url.clone()).filter(|u| !u.is_empty()),
                summary,
                why_it_matters,
            },
        ));
    }

    if items.is_empty() {
        anyhow::bail!("model output contained no usable items");
    }

    items.sort_by_key(|(id, item)| (item.source_index, *id));
    Ok(items.into_iter().map(|(_, item)| item).collect())
}

fn parse_takeaways(content: &str, count: usize) -> anyhow::Result<Vec<String>> {
    let cleaned = extract_json_from_text(content)
        .ok_or_else(|| anyhow::anyhow!("no JSON object in model output"))?;
    let parsed: TakeawaysJson = serde_json::from_str(&cleaned)
        .map_err(|e| anyhow::anyhow!("model output is not valid takeaways JSON: {}", e))?;

    let takeaways: Vec<String> = parsed
        .takeaways
        .iter()
        .map(|t| single_line(strip_list_marker(t)))
        .filter(|t| !t.is_empty())
        .take(count)
        .collect();

    if takeaways.is_empty() {
        anyhow::bail!("model output contained no takeaways");
    }
    Ok(takeaways)
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_headline(text: &str) -> String {
    let line = single_line(text);
    line.trim_start_matches(&['#', ' '][..])
        .trim_matches(&['*', '_'][..])
        .trim()
        .trim_end_matches(&['。', '.'][..])
        .to_string()
}

fn strip_list_marker(text: &str) -> &str {
    let trimmed = text.trim_start();
    let without_digits = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
    if without_digits.len() != trimmed.len() {
        if let Some(rest) = without_digits
            .strip_prefix('.')
            .or_else(|| without_digits.strip_prefix('、'))
            .or_else(|| without_digits.strip_prefix(')'))
        {
            return rest.trim_start();
        }
    }
    trimmed.trim_start_matches(&['-', '*', '•'][..]).trim_start()
}

/// Keep at most `max` sentences. Chinese terminators always end a sentence; ASCII ones only
/// when followed by whitespace or the end of the text, so decimals survive.
fn limit_sentences(text: &str, max: usize) -> String {
    let text = single_line(text);
    let mut count = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let ends = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if ends {
            count += 1;
            if count == max {
                return text[..idx + c.len_utf8()].to_string();
            }
        }
    }

    text
}
