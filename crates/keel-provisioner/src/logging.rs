use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::ProvisionerError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Install a global subscriber. `RUST_LOG` wins over the `info` default.
pub fn try_init_logging(format: LogFormat) -> Result<(), ProvisionerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| ProvisionerError::Config(format!("failed to install log subscriber: {e}")))
}

/// Like [`try_init_logging`], ignoring an already-installed subscriber.
pub fn init_logging(format: LogFormat) {
    if let Err(e) = try_init_logging(format) {
        tracing::debug!(error = %e, "log subscriber already installed");
    }
}
