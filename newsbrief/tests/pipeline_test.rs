use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::SourceConfig;
use newsbrief::delivery::{DeliveryStatus, Dispatcher, LocalStore, Messenger};
use newsbrief::llm::summarizer::{BriefingSummarizer, SummarizerSettings};
use newsbrief::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use newsbrief::model::{DegradedReason, SearchResult};
use newsbrief::pipeline::Pipeline;
use newsbrief::retry::RetryPolicy;
use newsbrief::search::{CategorySearcher, FeedProvider, SearchLimits, SearchProvider, SearchRequest};

const SOURCES: &str = r#"
[[categories]]
name = "Macro Trends"
priority = "low"
query = "geopolitics energy"

[[categories.sources]]
name = "Reuters"
url = "https://www.reuters.com"
type = "site"

[[categories]]
name = "Tech & AI"
priority = "high"
query = "AI semiconductors"

[[categories.sources]]
name = "The Verge"
url = "https://www.theverge.com"
type = "site"

[[categories.sources]]
name = "Web"
url = "https://search.brave.com"
type = "web"
"#;

/// Answers by query; queries containing "fail" error out.
struct StubSearch;

#[async_trait::async_trait]
impl SearchProvider for StubSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        if request.query.contains("fail") {
            anyhow::bail!("Brave API returned 503 Service Unavailable");
        }
        let slug = request.query.replace(' ', "-").replace(':', "");
        Ok(vec![SearchResult {
            title: format!("Result for {}", request.query),
            url: format!("https://news.example.com/{}", slug),
            snippet: "Something happened.".to_string(),
            source_name: "news.example.com".to_string(),
            source_index: 0,
            score: None,
        }])
    }
}

struct NoFeeds;

#[async_trait::async_trait]
impl FeedProvider for NoFeeds {
    async fn latest(&self, _url: &str, _limit: usize) -> Result<Vec<SearchResult>> {
        Ok(Vec::new())
    }
}

/// Writes a fixed briefing per category and fixed takeaways.
struct StubModel {
    calls: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl LlmProvider for StubModel {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let content = if request.prompt.contains("key takeaways") {
            self.calls.lock().unwrap().push("takeaways".into());
            r#"{"takeaways": ["芯片需求持续走强", "能源价格仍是宏观焦点"]}"#.to_string()
        } else if request.prompt.contains("Category: Tech & AI") {
            self.calls.lock().unwrap().push("Tech & AI".into());
            r#"{"items": [
                {"id": 2, "headline": "云厂商加码AI算力", "summary": "多家云厂商宣布扩容。", "why_it_matters": "算力成本将下降。"},
                {"id": 1, "headline": "新款AI芯片发布", "summary": "性能提升一倍。", "why_it_matters": "训练成本降低。"}
            ]}"#
            .to_string()
        } else if request.prompt.contains("Category: Macro Trends") {
            self.calls.lock().unwrap().push("Macro Trends".into());
            r#"```json
{"items": [{"id": 1, "headline": "油价小幅上涨", "summary": "供应担忧推高油价。", "why_it_matters": "通胀压力可能回升。"}]}
```"#
                .to_string()
        } else {
            anyhow::bail!("unexpected prompt");
        };

        Ok(LlmResponse {
            content,
            usage: UsageMetadata::default(),
            model: "stub".to_string(),
        })
    }
}

/// Counts posts and fails every one of them when `fail` is set.
struct StubMessenger {
    fail: bool,
    posts: Mutex<usize>,
}

#[async_trait::async_trait]
impl Messenger for StubMessenger {
    async fn post(&self, _text: &str) -> Result<()> {
        *self.posts.lock().unwrap() += 1;
        if self.fail {
            anyhow::bail!("Slack rejected message: channel_not_found");
        }
        Ok(())
    }
}

fn morning() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 27)
        .unwrap()
        .and_hms_opt(7, 30, 0)
        .unwrap()
}

fn pipeline(sources: &str, root: &Path, messenger: Option<Arc<dyn Messenger>>) -> Pipeline {
    let sources = SourceConfig::from_toml_str(sources).expect("sources");
    let searcher = CategorySearcher::new(
        Arc::new(StubSearch),
        Arc::new(NoFeeds),
        SearchLimits {
            results_per_query: 3,
            max_queries_per_category: 3,
            max_results_per_category: 6,
            politeness_delay: Duration::ZERO,
        },
    );
    let summarizer = BriefingSummarizer::new(
        Arc::new(StubModel {
            calls: Mutex::new(Vec::new()),
        }),
        SummarizerSettings {
            items_per_category: 3,
            takeaways: 3,
            max_tokens: 800,
            temperature: 0.2,
            retry: RetryPolicy::none(),
        },
    );
    let dispatcher =
        Dispatcher::new(LocalStore::new(root), messenger).with_retry_delay(Duration::ZERO);
    Pipeline::new(sources, searcher, summarizer, dispatcher)
}

fn h2_order(text: &str) -> Vec<&str> {
    text.lines().filter_map(|l| l.strip_prefix("## ")).collect()
}

#[tokio::test]
async fn test_end_to_end_briefing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let report = pipeline(SOURCES, dir.path(), None)
        .run(morning(), false)
        .await
        .expect("run");

    let expected = dir.path().join("news").join("2026-01-27").join("今日新闻.md");
    assert_eq!(report.record.path, expected);
    assert_eq!(report.record.status, DeliveryStatus::LocalSaved);
    assert!(report.degraded.is_empty());

    let doc = std::fs::read_to_string(&expected).expect("briefing file");
    assert!(doc.starts_with("# 今日新闻 | 2026-01-27\n"));
    assert_eq!(h2_order(&doc), ["Tech & AI", "Macro Trends", "Key Takeaways"]);

    // items follow source declaration order, not model output order
    let headlines: Vec<&str> = doc.lines().filter_map(|l| l.strip_prefix("### ")).collect();
    assert_eq!(headlines, ["新款AI芯片发布", "云厂商加码AI算力", "油价小幅上涨"]);

    assert!(doc.contains("**来源：** The Verge\n"));
    assert!(doc.contains("**来源：** news.example.com\n"));
    assert!(doc.contains("1. 芯片需求持续走强\n2. 能源价格仍是宏观焦点\n"));
    assert!(!doc.contains("⚠️"));
}

#[tokio::test]
async fn test_failed_category_is_named_not_dropped() {
    let sources = SOURCES.replace("geopolitics energy", "fail everything");
    let dir = tempfile::tempdir().expect("tempdir");
    let report = pipeline(&sources, dir.path(), None)
        .run(morning(), false)
        .await
        .expect("run");

    assert_eq!(
        report.degraded,
        [("Macro Trends".to_string(), DegradedReason::SearchUnavailable)]
    );

    let doc = std::fs::read_to_string(&report.record.path).expect("briefing file");
    assert_eq!(h2_order(&doc), ["Tech & AI", "Macro Trends", "Key Takeaways"]);
    assert!(doc.contains("> ⚠️ 以下分类缺少数据：Macro Trends（搜索服务不可用，未能获取资讯）"));
    assert!(doc.contains("## Macro Trends\n\n> ⚠️ 本分类暂无数据：搜索服务不可用，未能获取资讯。"));
    assert!(doc.contains("### 新款AI芯片发布"));
}

#[tokio::test]
async fn test_all_categories_failing_still_writes_a_briefing() {
    let sources = SOURCES
        .replace("geopolitics energy", "fail macro")
        .replace("AI semiconductors", "fail tech");
    let dir = tempfile::tempdir().expect("tempdir");
    let report = pipeline(&sources, dir.path(), None)
        .run(morning(), false)
        .await
        .expect("run");

    assert_eq!(report.degraded.len(), 2);
    let doc = std::fs::read_to_string(&report.record.path).expect("briefing file");
    assert!(doc.ends_with("## Key Takeaways\n\n> ⚠️ 今日要点暂未生成（摘要服务不可用）。\n"));
}

#[tokio::test]
async fn test_repeated_runs_never_overwrite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = pipeline(SOURCES, dir.path(), None);

    let first = pipeline.run(morning(), false).await.expect("first run");
    let before = std::fs::read_to_string(&first.record.path).expect("first file");

    let second = pipeline.run(morning(), false).await.expect("second run");
    let forced = pipeline.run(morning(), true).await.expect("forced run");

    let day = dir.path().join("news").join("2026-01-27");
    assert_eq!(second.record.path, day.join("今日新闻_20260127_0730.md"));
    assert_eq!(forced.record.path, day.join("今日新闻_20260127_0730_1.md"));
    assert_eq!(std::fs::read_dir(&day).unwrap().count(), 3);
    assert_eq!(std::fs::read_to_string(&first.record.path).unwrap(), before);
}

#[tokio::test]
async fn test_messaging_failure_keeps_local_copy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let messenger = Arc::new(StubMessenger {
        fail: true,
        posts: Mutex::new(0),
    });
    let report = pipeline(SOURCES, dir.path(), Some(messenger.clone()))
        .run(morning(), false)
        .await
        .expect("run");

    assert_eq!(report.record.status, DeliveryStatus::LocalSaved);
    assert_eq!(report.record.warnings.len(), 1);
    assert!(report.record.warnings[0].contains("channel_not_found"));
    // one post plus the single retry
    assert_eq!(*messenger.posts.lock().unwrap(), 2);
    assert!(std::fs::read_to_string(&report.record.path)
        .expect("briefing file")
        .contains("## Tech & AI"));
}

#[tokio::test]
async fn test_successful_delivery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let messenger = Arc::new(StubMessenger {
        fail: false,
        posts: Mutex::new(0),
    });
    let report = pipeline(SOURCES, dir.path(), Some(messenger.clone()))
        .run(morning(), false)
        .await
        .expect("run");

    assert_eq!(report.record.status, DeliveryStatus::Delivered);
    assert!(report.record.warnings.is_empty());
    assert_eq!(*messenger.posts.lock().unwrap(), 1);
    assert!(report.record.path.exists());
}

#[tokio::test]
async fn test_unwritable_output_is_exit_code_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let err = pipeline(SOURCES, &blocker, None)
        .run(morning(), false)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
}
