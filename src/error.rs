use std::path::PathBuf;

use thiserror::Error;

use crate::models::SourceId;

/// A source could not be read. Every variant degrades that source to zero.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_id} unavailable: connection failed: {cause}")]
    Connect {
        source_id: SourceId,
        #[source]
        cause: sqlx::Error,
    },

    #[error("{source_id} unavailable: query failed: {cause}")]
    Query {
        source_id: SourceId,
        #[source]
        cause: sqlx::Error,
    },

    #[error("{source_id} unavailable: {stage} timed out after {seconds}s")]
    Timeout {
        source_id: SourceId,
        stage: &'static str,
        seconds: u64,
    },
}

/// Document construction failed; no partial document is delivered.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to build PDF: {0}")]
    Pdf(#[from] printpdf::Error),

    #[error("failed to write report artifact {path}: {cause}")]
    Artifact {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
}

/// Transmission to one recipient failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("bot API request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("bot API rejected {method}: {description}")]
    Rejected {
        method: &'static str,
        description: String,
    },

    #[error("failed to read artifact {path}: {cause}")]
    Artifact {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
}

// Request URLs embed the bot token.
impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Http(err.without_url())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}
