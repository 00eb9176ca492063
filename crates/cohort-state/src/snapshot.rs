use crate::store::{SharedStateEntry, SharedStateStore};
use chrono::{DateTime, Utc};
use cohort_core::{CohortError, CohortResult, CoordinationMessage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Where `persist()` writes when no explicit path is given.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from(".agent_state.json")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

/// On-disk representation of a store: entries ordered by key, then the full
/// message log in publication order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Committed entries, sorted by key.
    pub entries: Vec<SharedStateEntry>,
    /// The full message log, in publication order.
    #[serde(default)]
    pub messages: Vec<CoordinationMessage>,
}

impl SharedStateStore {
    /// Capture the current entries and message log.
    pub fn export(&self) -> StateSnapshot {
        StateSnapshot {
            saved_at: Utc::now(),
            entries: self.entries(),
            messages: self.all_messages(),
        }
    }

    /// Replace the store's contents with `snapshot`, keeping entry versions.
    ///
    /// Subscribers are not notified. Fails without touching the store when a
    /// message in the snapshot does not validate.
    pub fn import(&self, snapshot: StateSnapshot) -> CohortResult<usize> {
        for message in &snapshot.messages {
            message.ensure_valid()?;
        }
        let count = snapshot.entries.len();
        self.drop_entries();
        for entry in snapshot.entries {
            self.restore_entry(entry);
        }
        self.replace_messages(snapshot.messages);
        Ok(count)
    }

    /// Write a snapshot to the configured `snapshot_path`.
    pub async fn persist(&self) -> CohortResult<PathBuf> {
        let path = self.config.snapshot_path.clone();
        self.persist_to(&path).await?;
        Ok(path)
    }

    /// Write a snapshot to `path`, replacing any existing file.
    pub async fn persist_to(&self, path: &Path) -> CohortResult<()> {
        let snapshot = self.export();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CohortError::Storage(format!("Failed to encode snapshot: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CohortError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        // Write beside the target and rename so readers never see a torn file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CohortError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| CohortError::Storage(format!("Failed to write {}: {e}", path.display())))?;

        info!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            messages = snapshot.messages.len(),
            "State snapshot persisted"
        );
        Ok(())
    }

    /// Replace the store's contents with the snapshot at `path`.
    pub async fn load(&self, path: &Path) -> CohortResult<usize> {
        let snapshot = read_snapshot(path).await?;
        let messages = snapshot.messages.len();
        let entries = self
            .import(snapshot)
            .map_err(|e| CohortError::Storage(format!("Invalid snapshot {}: {e}", path.display())))?;
        info!(path = %path.display(), entries, messages, "State snapshot loaded");
        Ok(entries)
    }
}

/// Read and decode a snapshot file without loading it into a store.
pub async fn read_snapshot(path: &Path) -> CohortResult<StateSnapshot> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CohortError::Storage(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&data)
        .map_err(|e| CohortError::Storage(format!("Failed to parse snapshot {}: {e}", path.display())))
}
