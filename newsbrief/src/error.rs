//! Error taxonomy for a briefing run.
//!
//! Only configuration problems, renderer defects and a failed local write end a run.
//! Search and summarization errors degrade a single category; messaging errors downgrade
//! the run to "saved locally".

use std::path::PathBuf;

pub use common::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search request for '{query}' failed: {source:#}")]
    Provider {
        query: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("feed {url} could not be read: {source:#}")]
    Feed {
        url: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("model call failed after {attempts} attempt(s): {source:#}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("nothing to summarize")]
    NoInput,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("malformed briefing: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to write briefing to {path}: {source}")]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("messaging failed: {0:#}")]
    Messaging(anyhow::Error),
}

/// Fatal outcomes of a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl PipelineError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Delivery(_) => 1,
            PipelineError::Config(_) => 2,
            PipelineError::Render(_) => 3,
        }
    }
}
