//! Error types for the rate limit crate

use thiserror::Error;

/// Errors surfaced by admission control
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Wait cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}
