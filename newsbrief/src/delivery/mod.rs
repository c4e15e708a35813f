use anyhow::Result;
use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::DeliveryError;

pub mod slack;
pub mod store;

pub use slack::SlackMessenger;
pub use store::LocalStore;

/// A messaging channel the briefing is pushed to after it has been saved.
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    /// Split and format a document into the messages to post. Defaults to one message.
    fn prepare(&self, document: &str) -> Vec<String> {
        vec![document.to_string()]
    }

    /// Post one message.
    async fn post(&self, text: &str) -> Result<()>;
}

/// How far a run's delivery got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Written to the local archive; messaging skipped or failed
    LocalSaved,
    /// Written locally and posted to the messaging channel
    Delivered,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::LocalSaved => f.write_str("LOCAL_SAVED"),
            DeliveryStatus::Delivered => f.write_str("DELIVERED"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub path: PathBuf,
    pub status: DeliveryStatus,
    pub warnings: Vec<String>,
}

/// Saves first, then tries the messaging channel with at most one retry per run.
pub struct Dispatcher {
    store: LocalStore,
    messenger: Option<Arc<dyn Messenger>>,
    retry_delay: Duration,
}

impl Dispatcher {
    pub fn new(store: LocalStore, messenger: Option<Arc<dyn Messenger>>) -> Self {
        Self {
            store,
            messenger,
            retry_delay: Duration::from_secs(5),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Only a failed local write is an error. Messaging problems are recorded as warnings
    /// and leave the record at `LocalSaved`.
    pub async fn dispatch(
        &self,
        now: NaiveDateTime,
        document: &str,
        force_new: bool,
    ) -> Result<DeliveryRecord, DeliveryError> {
        let path = self.store.save(now, document, force_new).await?;
        info!(path = %path.display(), "briefing saved locally");

        let mut record = DeliveryRecord {
            path,
            status: DeliveryStatus::LocalSaved,
            warnings: Vec::new(),
        };

        let Some(messenger) = &self.messenger else {
            info!("no messaging channel configured; delivery skipped");
            return Ok(record);
        };

        match self.deliver(messenger.as_ref(), document).await {
            Ok(messages) => {
                info!(messages, "briefing delivered");
                record.status = DeliveryStatus::Delivered;
            }
            Err(e) => {
                warn!(error = %e, path = %record.path.display(), "delivery failed; briefing kept locally");
                record.warnings.push(e.to_string());
            }
        }

        Ok(record)
    }

    async fn deliver(&self, messenger: &dyn Messenger, document: &str) -> Result<usize, DeliveryError> {
        let messages = messenger.prepare(document);
        let total = messages.len();
        let mut retry_available = true;

        for (i, message) in messages.iter().enumerate() {
            loop {
                match messenger.post(message).await {
                    Ok(()) => break,
                    Err(e) if retry_available => {
                        retry_available = false;
                        warn!(error = %format!("{:#}", e), part = i + 1, total, "message post failed; retrying once");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    Err(e) => {
                        return Err(DeliveryError::Messaging(
                            e.context(format!("message {}/{} not posted", i + 1, total)),
                        ));
                    }
                }
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    /// Fails the first `failures` posts, then succeeds.
    struct Flaky {
        failures: Mutex<usize>,
        posted: Mutex<Vec<String>>,
        attempts: Mutex<usize>,
    }

    impl Flaky {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                posted: Mutex::new(Vec::new()),
                attempts: Mutex::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Messenger for Flaky {
        fn prepare(&self, document: &str) -> Vec<String> {
            document.split('|').map(str::to_string).collect()
        }

        async fn post(&self, text: &str) -> Result<()> {
            *self.attempts.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("channel unavailable");
            }
            self.posted.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 27)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn dispatcher(root: &std::path::Path, messenger: Option<Arc<dyn Messenger>>) -> Dispatcher {
        Dispatcher::new(LocalStore::new(root), messenger).with_retry_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn without_messenger_ends_local_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = dispatcher(dir.path(), None)
            .dispatch(now(), "doc", false)
            .await
            .expect("dispatch");

        assert_eq!(record.status, DeliveryStatus::LocalSaved);
        assert!(record.warnings.is_empty());
        assert_eq!(std::fs::read_to_string(&record.path).unwrap(), "doc");
    }

    #[tokio::test]
    async fn one_retry_recovers_delivery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flaky = Flaky::new(1);
        let record = dispatcher(dir.path(), Some(flaky.clone()))
            .dispatch(now(), "part1|part2", false)
            .await
            .expect("dispatch");

        assert_eq!(record.status, DeliveryStatus::Delivered);
        assert_eq!(*flaky.posted.lock().unwrap(), ["part1", "part2"]);
        assert_eq!(*flaky.attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn second_failure_falls_back_to_local_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flaky = Flaky::new(usize::MAX);
        let record = dispatcher(dir.path(), Some(flaky.clone()))
            .dispatch(now(), "doc", false)
            .await
            .expect("dispatch");

        assert_eq!(record.status, DeliveryStatus::LocalSaved);
        assert_eq!(record.warnings.len(), 1);
        assert!(record.warnings[0].contains("channel unavailable"));
        assert_eq!(*flaky.attempts.lock().unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&record.path).unwrap(), "doc");
    }

    #[tokio::test]
    async fn retry_budget_is_shared_across_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flaky = Flaky::new(1);
        // first message uses the retry; make the second fail too
        struct FailSecond(Arc<Flaky>);

        #[async_trait::async_trait]
        impl Messenger for FailSecond {
            fn prepare(&self, document: &str) -> Vec<String> {
                self.0.prepare(document)
            }

            async fn post(&self, text: &str) -> Result<()> {
                if text == "b" {
                    anyhow::bail!("rate limited");
                }
                self.0.post(text).await
            }
        }

        let record = dispatcher(dir.path(), Some(Arc::new(FailSecond(flaky.clone()))))
            .dispatch(now(), "a|b", false)
            .await
            .expect("dispatch");

        assert_eq!(record.status, DeliveryStatus::LocalSaved);
        assert!(record.warnings[0].contains("message 2/2"));
    }
}
