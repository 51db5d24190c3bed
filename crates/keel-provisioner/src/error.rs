use keel_core::{CoreError, ResourceId};
use thiserror::Error;

/// Error returned by a state provider for a single remote call.
///
/// The variant decides the retry policy: transient kinds are retried with
/// backoff, everything else fails the action immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("invalid remote state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("configuration error: {0}")]
    Core(#[from] CoreError),

    #[error("failed to read {resource}: {source}")]
    Read {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("state error: {0}")]
    State(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Walk the full error chain and join all causes into one string.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
