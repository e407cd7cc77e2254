//! Collector error types.

use spotprice_source::SourceError;
use thiserror::Error;

/// Why a cycle was aborted.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("listing regions failed: {0}")]
    Regions(#[source] SourceError),

    #[error("region {region}, page {page}: {source}")]
    Source {
        region: String,
        page: usize,
        #[source]
        source: SourceError,
    },

    #[error("region {region}, page {page}: still rate limited after {attempts} attempts: {source}")]
    RetriesExhausted {
        region: String,
        page: usize,
        attempts: u32,
        #[source]
        source: SourceError,
    },

    #[error("state store error: {0}")]
    State(#[from] spotprice_state::StateError),

    #[error("cycle cancelled by shutdown")]
    Cancelled,
}

impl CollectError {
    /// The underlying source error, if any.
    pub fn source_error(&self) -> Option<&SourceError> {
        match self {
            CollectError::Regions(e) => Some(e),
            CollectError::Source { source, .. } | CollectError::RetriesExhausted { source, .. } => {
                Some(source)
            }
            CollectError::State(_) | CollectError::Cancelled => None,
        }
    }

    /// Retrying on the next interval cannot succeed; the daemon loop stops.
    pub fn is_fatal(&self) -> bool {
        self.source_error().is_some_and(SourceError::is_fatal)
    }
}

pub type CollectResult<T> = Result<T, CollectError>;
