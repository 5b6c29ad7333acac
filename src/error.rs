// 🚨 Pipeline Errors
// Fatal conditions only. Recoverable anomalies (unmatched parks, bad rows,
// missing weather days) are counted in the stage reports instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Weather archive returned nothing usable (HTTP failure, bad JSON, no `daily` block).
    /// Aborts the run: no partial estimate is ever produced.
    #[error("weather data unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An input file is structurally unusable (missing column, unreadable header).
    #[error("invalid input in {source_name}: {message}")]
    InvalidInput {
        source_name: String,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Sheet(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("run store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn invalid_input(source_name: &str, message: impl Into<String>) -> Self {
        PipelineError::InvalidInput {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    /// Only upstream failures are fatal by contract; everything else is a local I/O problem.
    pub fn is_upstream(&self) -> bool {
        matches!(self, PipelineError::UpstreamUnavailable(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
