//! Error taxonomy for the crawl and delivery pipelines.
//!
//! Errors are grouped by the component that raises them so callers can decide
//! how far a failure propagates:
//!
//! | Error | Raised by | Effect |
//! |-------|-----------|--------|
//! | [`FetchError`] | HTTP fetcher | aborts the current URL or listing walk, retried next tick |
//! | [`ParseError`] | section extractor | aborts that single article |
//! | [`StoreError`] | sqlite store | skips the article or tick, retried next tick |
//! | [`NotifyError`] | notifier | ends the delivery tick without advancing the watermark |
//! | [`DeliveryError`] | delivery loop | logged; the loop resumes at the next tick |
//!
//! A duplicate insert is not an error: it is reported as
//! [`InsertOutcome::AlreadyExists`](crate::models::InsertOutcome).

use thiserror::Error;

/// A failed HTTP request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("http status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Transport failures (timeouts, resets), `429` and `5xx` responses are
    /// transient. Anything else, notably `404`, fails the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::InvalidUrl { .. } => false,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Transport { .. } => true,
        }
    }
}

/// The article page does not have the structure the extractor relies on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing mandatory element `{0}`")]
    MissingElement(&'static str),
    #[error("no numeric information_id in {0}")]
    MissingIdentifier(String),
}

/// A failed read or write against the article store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A notification could not be delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook rejected message with status {0}")]
    Status(u16),
    #[error("could not encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of a whole ingestion step.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("seen-links file: {0}")]
    SeenLinks(#[from] std::io::Error),
}

/// The configuration file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Failure of an on-demand or scheduled delivery step.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}
