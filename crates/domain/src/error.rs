/// Shared error type used across all BrandPulse crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Request or argument parse failure. Surfaced as a 400; never retried.
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream actor or HTTP non-success.
    #[error("upstream: {0}")]
    Upstream(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Only transient upstream conditions are advertised as retryable.
    pub fn retryable(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_and_timeout_are_retryable() {
        assert!(Error::Upstream("502".into()).retryable());
        assert!(Error::Timeout("actor".into()).retryable());
    }

    #[test]
    fn validation_and_cancelled_are_not_retryable() {
        assert!(!Error::Validation("bad".into()).retryable());
        assert!(!Error::Cancelled.retryable());
        assert!(!Error::Internal("boom".into()).retryable());
    }
}
