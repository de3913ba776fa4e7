// src/error.rs

use chrono::NaiveDate;

/// Failures talking to the reporting API or its token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("token refresh failed: {0}")]
    Auth(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

/// A downloaded payload could not be turned into rows.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("gzip decompression failed: {0}")]
    Gzip(#[from] std::io::Error),

    #[error("report is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected report shape: {0}")]
    Shape(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis pool setup failed: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("malformed job descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One failed (record type, date) pair of a request batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub record_type: String,
    pub report_date: NaiveDate,
    pub reason: String,
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.record_type, self.report_date, self.reason)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{} report request(s) failed: {}", .failures.len(), join_failures(.failures))]
    RequestBatch { failures: Vec<RequestFailure> },

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

fn join_failures(failures: &[RequestFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type PipelineResult<T> = Result<T, PipelineError>;
