use thiserror::Error;

/// Failures that abort an ingestion run or an enrichment batch.
///
/// Anything not listed here is contained to one source or one record and
/// only shows up in the run summaries.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another ingestion run holds the exclusivity marker.
    #[error("another ingestion run holds the ingest lock")]
    IngestLocked,

    /// The store could not be reached or rejected a write.
    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

/// Failure talking to the external metadata provider for one record.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("metadata request timed out")]
    Timeout,

    #[error("metadata transport error: {0}")]
    Transport(String),

    #[error("metadata provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode metadata payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs carry the api key in their query string.
        let err = err.without_url();
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}
