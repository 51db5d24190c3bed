use std::path::{Path, PathBuf};

use keel_core::Snapshot;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;

const STATE_VERSION: u32 = 1;

/// On-disk envelope around a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub version: u32,
    pub written_at: jiff::Timestamp,
    pub snapshot: Snapshot,
}

/// Snapshot persistence on local disk.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot atomically: tmp + rename.
    pub async fn flush(&self, snapshot: &Snapshot) -> Result<(), ProvisionerError> {
        let envelope = PersistedSnapshot {
            version: STATE_VERSION,
            written_at: jiff::Timestamp::now(),
            snapshot: snapshot.clone(),
        };
        let json = serde_json::to_vec_pretty(&envelope)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            instances = snapshot.len(),
            "snapshot flushed"
        );
        Ok(())
    }

    /// Load the last flushed snapshot, or an empty one if none exists yet.
    pub async fn load(&self) -> Result<Snapshot, ProvisionerError> {
        Ok(self
            .load_envelope()
            .await?
            .map(|e| e.snapshot)
            .unwrap_or_default())
    }

    pub async fn load_envelope(&self) -> Result<Option<PersistedSnapshot>, ProvisionerError> {
        let json = match tokio::fs::read(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no snapshot on disk, starting fresh");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: PersistedSnapshot = serde_json::from_slice(&json)?;
        if envelope.version > STATE_VERSION {
            return Err(ProvisionerError::State(format!(
                "snapshot version {} is newer than this build supports ({STATE_VERSION})",
                envelope.version
            )));
        }
        tracing::debug!(
            path = %self.path.display(),
            written_at = %envelope.written_at,
            "snapshot loaded"
        );
        Ok(Some(envelope))
    }
}
