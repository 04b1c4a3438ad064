use thiserror::Error;

/// Failures from the key/value and time-series backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected write ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed stored value for {key}: {reason}")]
    Malformed { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("rate limiter store failure: {0}")]
    RateLimiterStore(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{dimension} warning threshold ({warning}) must be below critical ({critical})")]
    ThresholdOrder {
        dimension: &'static str,
        warning: f64,
        critical: f64,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
