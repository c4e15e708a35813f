//! One briefing run: search every category, summarize, render, save and deliver.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use common::{Category, Config, ConfigError, Credentials, RunConfig, SourceConfig, DEFAULT_TIMEZONE};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::delivery::{DeliveryRecord, Dispatcher, LocalStore, Messenger, SlackMessenger};
use crate::error::{PipelineError, SummarizeError};
use crate::llm::remote::RemoteLlmProvider;
use crate::llm::summarizer::{BriefingSummarizer, SummarizerSettings};
use crate::model::{Briefing, DegradedReason, Section, SectionContent, Takeaways};
use crate::render::render;
use crate::retry::RetryPolicy;
use crate::search::brave::BraveSearch;
use crate::search::feed::FeedReader;
use crate::search::{CategoryOutcome, CategorySearcher, SearchLimits};

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub record: DeliveryRecord,
    /// Categories rendered with a placeholder, in section order
    pub degraded: Vec<(String, DegradedReason)>,
}

pub struct Pipeline {
    sources: SourceConfig,
    searcher: CategorySearcher,
    summarizer: BriefingSummarizer,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(
        sources: SourceConfig,
        searcher: CategorySearcher,
        summarizer: BriefingSummarizer,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            sources,
            searcher,
            summarizer,
            dispatcher,
        }
    }

    /// Wire the HTTP-backed providers from configuration. `deliver = false` keeps the run
    /// local even when messaging is configured.
    pub fn from_config(
        config: &Config,
        sources: SourceConfig,
        credentials: &Credentials,
        output_dir: PathBuf,
        deliver: bool,
    ) -> Result<Self, ConfigError> {
        let search_cfg = &config.search;
        let search_retry = RetryPolicy::new(search_cfg.max_attempts(), search_cfg.backoff());

        let brave = BraveSearch::new(
            search_cfg.api_url(),
            credentials.search_api_key.as_str(),
            search_cfg.timeout(),
        )
        .map_err(|e| ConfigError::Invalid(format!("search client: {e:#}")))?
        .with_retry(search_retry);

        let feeds = FeedReader::new(search_cfg.timeout())
            .map_err(|e| ConfigError::Invalid(format!("feed client: {e:#}")))?
            .with_retry(search_retry);

        let searcher = CategorySearcher::new(
            Arc::new(brave),
            Arc::new(feeds),
            SearchLimits::from_config(search_cfg),
        );

        let llm_cfg = &config.llm;
        let llm = RemoteLlmProvider::new(
            llm_cfg.api_url(),
            credentials.llm_api_key.as_str(),
            credentials.model.as_str(),
        )
        .with_defaults(llm_cfg.timeout(), llm_cfg.max_tokens(), llm_cfg.temperature());
        info!(model = %llm.model(), "summarizer model selected");

        let summarizer =
            BriefingSummarizer::new(Arc::new(llm), SummarizerSettings::from_config(llm_cfg));

        let mut messenger: Option<Arc<dyn Messenger>> = None;
        let mut retry_delay = None;
        if deliver {
            if let (Some(delivery), Some(creds)) =
                (config.active_delivery(), credentials.messaging.as_ref())
            {
                let slack = SlackMessenger::new(
                    delivery.api_url(),
                    creds.token.as_str(),
                    creds.channel.as_str(),
                    delivery.timeout(),
                )
                .map_err(|e| ConfigError::Invalid(format!("messaging client: {e:#}")))?
                .with_max_chars(delivery.max_message_chars());
                messenger = Some(Arc::new(slack));
                retry_delay = Some(delivery.retry_delay());
            }
        }

        let mut dispatcher = Dispatcher::new(LocalStore::new(output_dir), messenger);
        if let Some(delay) = retry_delay {
            dispatcher = dispatcher.with_retry_delay(delay);
        }

        Ok(Self::new(sources, searcher, summarizer, dispatcher))
    }

    /// Run once for the local time `now`. Only configuration, rendering and local write
    /// failures are errors; everything else degrades the document.
    pub async fn run(&self, now: NaiveDateTime, force_new: bool) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("briefing_run", %run_id, date = %now.date());

        self.execute(run_id, now, force_new).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        now: NaiveDateTime,
        force_new: bool,
    ) -> Result<RunReport, PipelineError> {
        info!(categories = self.sources.categories.len(), "briefing run started");

        let briefing = self.build_briefing(now.date()).await;
        let degraded: Vec<(String, DegradedReason)> = briefing
            .degraded()
            .into_iter()
            .map(|(name, reason)| (name.to_string(), reason))
            .collect();
        for (category, reason) in &degraded {
            warn!(%category, %reason, "category degraded");
        }

        let document = match render(&briefing) {
            Ok(doc) => doc,
            Err(e) => {
                error!(error = %e, "briefing could not be rendered");
                return Err(e.into());
            }
        };

        let record = self.dispatcher.dispatch(now, &document, force_new).await?;
        info!(
            status = %record.status,
            path = %record.path.display(),
            degraded = degraded.len(),
            "briefing run finished"
        );

        Ok(RunReport {
            run_id,
            record,
            degraded,
        })
    }

    /// Search categories one after another, then summarize them concurrently.
    pub async fn build_briefing(&self, date: NaiveDate) -> Briefing {
        let mut searched: Vec<(usize, &Category, CategoryOutcome)> = Vec::new();
        for (order, category) in self.sources.ordered() {
            let outcome = self.searcher.search_category(category).await;
            searched.push((order, category, outcome));
        }

        let sections: Vec<Section> = join_all(
            searched
                .iter()
                .map(|(order, category, outcome)| self.section(date, *order, category, outcome)),
        )
        .await;

        let key_takeaways = match self.summarizer.key_takeaways(date, &sections).await {
            Ok(points) => Takeaways::Points(points),
            Err(SummarizeError::NoInput) => {
                info!("no summarized items; key takeaways skipped");
                Takeaways::Unavailable
            }
            Err(e) => {
                warn!(error = %e, "key takeaways unavailable");
                Takeaways::Unavailable
            }
        };

        Briefing {
            date,
            sections,
            key_takeaways,
        }
    }

    async fn section(
        &self,
        date: NaiveDate,
        order: usize,
        category: &Category,
        outcome: &CategoryOutcome,
    ) -> Section {
        let content = match outcome {
            CategoryOutcome::Degraded(reason) => SectionContent::Degraded(*reason),
            CategoryOutcome::Found(results) => {
                match self.summarizer.summarize_category(date, category, results).await {
                    Ok(items) => SectionContent::Items(items),
                    Err(e) => {
                        warn!(category = %category.name, error = %e, "summary failed");
                        SectionContent::Degraded(DegradedReason::SummaryUnavailable)
                    }
                }
            }
        };

        Section {
            category: category.name.clone(),
            priority: category.priority,
            order,
            content,
        }
    }
}

/// Time zone for the briefing date: the env override named by `run.timezone_env`, then
/// `run.timezone`, then Asia/Shanghai.
pub fn resolve_timezone<F>(run: &RunConfig, lookup: F) -> Result<Tz, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let name = lookup(run.timezone_env())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| run.timezone.clone())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

    name.parse::<Tz>()
        .map_err(|e| ConfigError::Invalid(format!("unknown time zone '{name}': {e}")))
}

/// Current wall-clock time in `tz`.
pub fn local_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_defaults_to_shanghai() {
        let tz = resolve_timezone(&RunConfig::default(), |_| None).expect("tz");
        assert_eq!(tz, chrono_tz::Asia::Shanghai);
    }

    #[test]
    fn env_overrides_configured_timezone() {
        let run = RunConfig {
            timezone: Some("Europe/Paris".into()),
            ..Default::default()
        };
        let tz = resolve_timezone(&run, |name| {
            (name == "NEWS_TIMEZONE").then(|| "America/New_York".to_string())
        })
        .expect("tz");
        assert_eq!(tz, chrono_tz::America::New_York);

        let tz = resolve_timezone(&run, |_| Some("  ".into())).expect("tz");
        assert_eq!(tz, chrono_tz::Europe::Paris);
    }

    #[test]
    fn unknown_timezone_is_a_config_error() {
        let run = RunConfig {
            timezone: Some("Mars/Olympus".into()),
            ..Default::default()
        };
        let err = resolve_timezone(&run, |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("Mars/Olympus")));
    }
}
