use chrono::NaiveDate;
use common::Priority;
use serde::{Deserialize, Serialize};

/// One hit returned by a search provider or a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source_name: String,
    /// Declaration index of the configured source that produced this result
    #[serde(default)]
    pub source_index: usize,
    /// Upvotes / points when the source exposes them
    pub score: Option<u32>,
}

/// A summarized news item as it appears in the briefing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefingItem {
    pub headline: String,
    pub source: String,
    pub source_index: usize,
    pub points: Option<u32>,
    pub url: Option<String>,
    pub summary: String,
    pub why_it_matters: String,
}

/// Why a category has no items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradedReason {
    /// Every query for the category failed
    SearchUnavailable,
    /// Queries succeeded but returned nothing
    NoResults,
    /// The model could not produce a usable summary
    SummaryUnavailable,
}

impl DegradedReason {
    /// Reader-facing wording used in the briefing.
    pub fn describe(&self) -> &'static str {
        match self {
            DegradedReason::SearchUnavailable => "搜索服务不可用，未能获取资讯",
            DegradedReason::NoResults => "暂无重点更新",
            DegradedReason::SummaryUnavailable => "摘要服务不可用，未能生成摘要",
        }
    }
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DegradedReason::SearchUnavailable => "search unavailable",
            DegradedReason::NoResults => "no results",
            DegradedReason::SummaryUnavailable => "summary unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SectionContent {
    Items(Vec<BriefingItem>),
    Degraded(DegradedReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub category: String,
    pub priority: Priority,
    /// Declaration index of the category in the source list
    pub order: usize,
    pub content: SectionContent,
}

impl Section {
    pub fn degraded_reason(&self) -> Option<DegradedReason> {
        match self.content {
            SectionContent::Degraded(reason) => Some(reason),
            SectionContent::Items(_) => None,
        }
    }

    pub fn items(&self) -> &[BriefingItem] {
        match &self.content {
            SectionContent::Items(items) => items,
            SectionContent::Degraded(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Takeaways {
    Points(Vec<String>),
    Unavailable,
}

/// The whole day's briefing before rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    pub date: NaiveDate,
    pub sections: Vec<Section>,
    pub key_takeaways: Takeaways,
}

impl Briefing {
    /// Categories without data, in section order.
    pub fn degraded(&self) -> Vec<(&str, DegradedReason)> {
        self.sections
            .iter()
            .filter_map(|s| s.degraded_reason().map(|r| (s.category.as_str(), r)))
            .collect()
    }
}
