//! Price source error types.

use thiserror::Error;

/// Errors a price source can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network failure or provider outage. Re-running the cycle may succeed.
    #[error("price source unavailable: {0}")]
    Unavailable(String),

    /// The provider throttled us. Back off and retry the same request.
    #[error("price source rate limited: {0}")]
    RateLimited(String),

    /// Credentials were rejected. Retrying will not help.
    #[error("price source rejected credentials: {0}")]
    Auth(String),

    /// The provider answered with something we could not interpret.
    #[error("invalid response from price source: {0}")]
    InvalidResponse(String),

    #[error("price source misconfigured: {0}")]
    Config(String),
}

impl SourceError {
    /// Worth retrying the same request after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited(_))
    }

    /// Retrying on a later cycle will fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Auth(_) | SourceError::Config(_))
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SourceError::RateLimited("slow down".into()).is_retryable());
        assert!(!SourceError::Unavailable("down".into()).is_retryable());
        assert!(SourceError::Auth("bad key".into()).is_fatal());
        assert!(!SourceError::Unavailable("down".into()).is_fatal());
        assert!(!SourceError::RateLimited("slow down".into()).is_fatal());
    }
}
