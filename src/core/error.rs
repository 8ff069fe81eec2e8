use thiserror::Error;

/// Errors surfaced by region construction and the ND tick entry points.
///
/// Routine no-ops (invalid layer ids, growth at capacity) are not errors;
/// they return `0`/`None` and log.
#[derive(Debug, Error)]
pub enum GrowNetError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("unsupported tensor rank {0}; expected 1 or 2")]
    UnsupportedTensorRank(usize),

    #[error("malformed tensor: {0}")]
    MalformedTensor(&'static str),

    #[error("tensor JSON: {0}")]
    TensorJson(#[from] serde_json::Error),

    #[error("unknown region id: {0}")]
    UnknownRegion(String),
}

pub type Result<T> = std::result::Result<T, GrowNetError>;
