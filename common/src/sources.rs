//! Category and source lists: which topics go into the briefing, how important each one
//! is, and where its items come from.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::ConfigError;

/// Category priority. Declaration order doubles as sort order: high first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// How items are obtained from a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Web search restricted to the source's host (`site:` operator)
    Site,
    /// Open web search; the result's own domain is shown as the source
    Web,
    /// RSS/Atom feed fetched directly
    Feed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Replaces the category query for this source
    pub query: Option<String>,
}

impl Source {
    /// Host of the source URL without a leading `www.`
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub priority: Priority,
    /// English search keywords
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl Category {
    /// Query to issue for `source`: its own override, or the category query.
    pub fn query_for<'a>(&'a self, source: &'a Source) -> &'a str {
        source
            .query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&self.query)
    }
}

/// The static category → {priority, sources} mapping, in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl SourceConfig {
    /// Read, parse and validate a source list file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        let cfg: SourceConfig = toml::from_str(data).map_err(|source| ConfigError::Parse {
            what: "source list".to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid("source list has no categories".into()));
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            let name = category.name.trim();
            if name.is_empty() {
                return Err(ConfigError::Invalid("category with an empty name".into()));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::Invalid(format!("duplicate category '{}'", name)));
            }
            if category.sources.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "category '{}' has no sources",
                    name
                )));
            }

            for source in &category.sources {
                if source.name.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "category '{}' has a source with an empty name",
                        name
                    )));
                }
                let parsed = url::Url::parse(&source.url).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "source '{}' in '{}' has an invalid url '{}': {}",
                        source.name, name, source.url, e
                    ))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "source '{}' in '{}' must use an http(s) url",
                        source.name, name
                    )));
                }
                if source.kind != SourceKind::Feed && category.query_for(source).trim().is_empty()
                {
                    return Err(ConfigError::Invalid(format!(
                        "source '{}' in '{}' needs a query (category or source level)",
                        source.name, name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Categories ordered by priority; equal priorities keep declaration order.
    pub fn ordered(&self) -> Vec<(usize, &Category)> {
        let mut ordered: Vec<(usize, &Category)> = self.categories.iter().enumerate().collect();
        ordered.sort_by_key(|(index, category)| (category.priority, *index));
        ordered
    }
}
