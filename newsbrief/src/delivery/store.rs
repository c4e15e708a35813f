use chrono::{NaiveDate, NaiveDateTime};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::DeliveryError;
use crate::render::TITLE;

/// Upper bound on `_n` suffixes tried for one timestamp
const MAX_SUFFIX: u32 = 999;

/// Append-only briefing archive: `<root>/news/<YYYY-MM-DD>/今日新闻*.md`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join("news")
            .join(date.format("%Y-%m-%d").to_string())
    }

    /// File names tried in order for a save at `now`.
    pub fn candidates(now: NaiveDateTime, force_new: bool) -> impl Iterator<Item = String> {
        let stamp = now.format("%Y%m%d_%H%M").to_string();
        let canonical = (!force_new).then(|| format!("{}.md", TITLE));
        let stamped = std::iter::once(format!("{}_{}.md", TITLE, stamp));
        let suffixed = (1..=MAX_SUFFIX).map(move |n| format!("{}_{}_{}.md", TITLE, stamp, n));
        canonical.into_iter().chain(stamped).chain(suffixed)
    }

    /// Write `content` to the first free candidate name. Existing files are never opened
    /// for writing: creation uses create-new semantics, so a concurrent run that grabbed
    /// the same name just moves this one to the next candidate.
    pub async fn save(
        &self,
        now: NaiveDateTime,
        content: &str,
        force_new: bool,
    ) -> Result<PathBuf, DeliveryError> {
        let dir = self.day_dir(now.date());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| DeliveryError::LocalWrite {
                path: dir.clone(),
                source,
            })?;

        for name in Self::candidates(now, force_new) {
            let path = dir.join(&name);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            let mut file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "briefing file exists, trying next name");
                    continue;
                }
                Err(source) => return Err(DeliveryError::LocalWrite { path, source }),
            };

            let written = async {
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
                file.sync_all().await
            }
            .await;

            if let Err(source) = written {
                // Only the file created above is removed; earlier briefings are untouched
                let _ = tokio::fs::remove_file(&path).await;
                return Err(DeliveryError::LocalWrite { path, source });
            }

            return Ok(path);
        }

        Err(DeliveryError::LocalWrite {
            path: dir,
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                "no free briefing file name left for this minute",
            ),
        })
    }
}
