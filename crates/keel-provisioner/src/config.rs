use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProvisionerError;

/// Current config version. Each bump needs a step in [`migrate`].
const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeelConfig {
    /// Schema version. Missing or 0 = pre-versioned config.
    #[serde(default)]
    pub config_version: u32,
    /// Where the snapshot is persisted between passes.
    pub state_path: PathBuf,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl KeelConfig {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            config_version: CURRENT_VERSION,
            state_path: state_path.into(),
            executor: ExecutorConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ProvisionerError> {
        self.executor.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of actions in flight at once.
    pub parallelism: usize,
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallelism: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ProvisionerError> {
        if self.parallelism == 0 {
            return Err(ProvisionerError::Config(
                "executor.parallelism must be at least 1".into(),
            ));
        }
        self.retry.validate()
    }
}

/// Exponential backoff for transient provider errors.
///
/// Attempt `n` (1-based) that fails transiently is followed by a delay of
/// `initial_delay_ms * 2^(n-1)`, capped at `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 250,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ProvisionerError> {
        if self.max_attempts == 0 {
            return Err(ProvisionerError::Config(
                "executor.retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

pub fn load_config(path: &Path) -> Result<KeelConfig, ProvisionerError> {
    let contents = std::fs::read_to_string(path)?;

    // Parse as raw JSON so we can run migrations before deserializing.
    let json: Value = serde_json::from_str(&contents)?;
    let on_disk_version = json
        .get("config_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    let migrated = migrate(json, on_disk_version)?;
    let config: KeelConfig = serde_json::from_value(migrated)?;
    config.validate()?;
    Ok(config)
}

/// Run sequential migrations from `from_version` up to [`CURRENT_VERSION`].
fn migrate(mut json: Value, from_version: u32) -> Result<Value, ProvisionerError> {
    if from_version > CURRENT_VERSION {
        return Err(ProvisionerError::Config(format!(
            "config_version {from_version} is newer than this build supports ({CURRENT_VERSION})"
        )));
    }

    // v0 → v1: executor knobs moved from the top level into `executor`.
    if from_version < 1 {
        let obj = json
            .as_object_mut()
            .ok_or_else(|| ProvisionerError::Config("config is not a JSON object".into()))?;

        let mut executor = serde_json::Map::new();
        if let Some(parallelism) = obj.remove("parallelism") {
            executor.insert("parallelism".into(), parallelism);
        }
        if let Some(attempts) = obj.remove("max_attempts") {
            let mut retry = serde_json::Map::new();
            retry.insert("max_attempts".into(), attempts);
            executor.insert("retry".into(), Value::Object(retry));
        }
        if !executor.is_empty() {
            obj.entry("executor")
                .or_insert_with(|| Value::Object(executor));
        }
        obj.insert("config_version".into(), Value::Number(1.into()));
        tracing::info!("migrated config v0 → v1 (moved executor settings)");
    }

    Ok(json)
}

pub fn save_config(path: &Path, config: &KeelConfig) -> Result<(), ProvisionerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Always write the current version, regardless of what was loaded.
    let mut stamped = config.clone();
    stamped.config_version = CURRENT_VERSION;

    let json = serde_json::to_string_pretty(&stamped)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json.as_bytes())?;
    std::fs::rename(&tmp_path, path)?;

    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
