//! Error taxonomy for the retrieval and analytics pipeline.
//!
//! None of these abort a multi-ticker request: callers log them and degrade to a
//! partial or empty result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Remote fetch for a single ticker failed (network, rate limit, bad payload).
    #[error("Transient fetch failure for {ticker}: {message}")]
    TransientFetch { ticker: String, message: String },

    /// The persistent store holds too few rows to trust for the requested range.
    #[error("Incomplete data for {ticker}: {found} bars, need {required}")]
    IncompleteData {
        ticker: String,
        found: usize,
        required: usize,
    },

    /// The server-side aggregation call is unavailable or returned nothing.
    #[error("Aggregation unavailable: {0}")]
    AggregationUnavailable(String),

    /// A computation had no defined answer, e.g. zero variance.
    #[error("Degenerate computation: {0}")]
    ComputeDegenerate(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    pub fn transient(ticker: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::TransientFetch {
            ticker: ticker.to_string(),
            message: err.to_string(),
        }
    }
}
