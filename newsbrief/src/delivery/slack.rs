use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use super::Messenger;

/// Posts briefings to a Slack channel through `chat.postMessage`.
pub struct SlackMessenger {
    api_url: String,
    token: String,
    channel: String,
    max_chars: usize,
    http: reqwest::Client,
}

impl SlackMessenger {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        channel: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            api_url: api_url.into(),
            token: token.into(),
            channel: channel.into(),
            max_chars: 3500,
            http,
        })
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait::async_trait]
impl Messenger for SlackMessenger {
    fn prepare(&self, document: &str) -> Vec<String> {
        chunk_lines(&to_mrkdwn(document), self.max_chars)
    }

    async fn post(&self, text: &str) -> Result<()> {
        let payload = json!({
            "channel": self.channel,
            "text": text,
            "mrkdwn": true,
            "unfurl_links": false,
            "unfurl_media": false,
        });

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .context("Slack request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack API returned non-success");
            anyhow::bail!("Slack API returned {status}");
        }

        // Slack reports most failures as 200 with ok=false
        let body: SlackResponse = resp.json().await.context("Failed to parse Slack response")?;
        if !body.ok {
            anyhow::bail!(
                "Slack rejected message: {}",
                body.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        Ok(())
    }
}

/// Convert the briefing's GitHub-flavored Markdown into Slack mrkdwn.
pub fn to_mrkdwn(markdown: &str) -> String {
    static LINK: OnceLock<Regex> = OnceLock::new();
    let link = LINK.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("valid regex"));

    markdown
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                let heading = trimmed.trim_start_matches('#').trim();
                if heading.is_empty() {
                    String::new()
                } else {
                    format!("*{}*", heading.replace("**", ""))
                }
            } else if trimmed == "---" {
                "────────────".to_string()
            } else {
                let line = line.replace("**", "*");
                link.replace_all(&line, "<$2|$1>").into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split `text` into chunks of at most `max` characters, preferring line boundaries.
pub fn chunk_lines(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.lines() {
        let pieces = split_long_line(line, max);
        for piece in pieces {
            let piece_len = piece.chars().count();
            let needed = if current.is_empty() { piece_len } else { piece_len + 1 };
            if current_len + needed > max && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(&piece);
            current_len += piece_len;
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

fn split_long_line(line: &str, max: usize) -> Vec<String> {
    if line.chars().count() <= max {
        return vec![line.to_string()];
    }
    let chars: Vec<char> = line.chars().collect();
    chars.chunks(max).map(|c| c.iter().collect()).collect()
}
