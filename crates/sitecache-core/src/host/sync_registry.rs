use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::utils::fs::{read_json, write_json};

const SYNC_FILE: &str = "sync.json";

/// Serializes read-modify-write cycles on `sync.json` within this process.
/// Separate processes sharing a data directory are not coordinated.
static REGISTRY_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

async fn registry_lock() -> MutexGuard<'static, ()> {
    REGISTRY_LOCK.get_or_init(|| Mutex::new(())).lock().await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicTask {
    pub min_interval_hours: i64,
    pub last_run: Option<DateTime<Utc>>,
}

impl PeriodicTask {
    /// An interval too large to represent never comes due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_run else {
            return true;
        };
        match Duration::try_hours(self.min_interval_hours) {
            Some(interval) => now - last >= interval,
            None => {
                warn!(hours = self.min_interval_hours, "Periodic interval out of range");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Registered one-shot tags, waiting to fire.
    pub one_shot: BTreeSet<String>,
    pub periodic: BTreeMap<String, PeriodicTask>,
}

/// Durable registry of background sync tasks, the part of the platform's
/// scheduler the host has to remember between runs.
#[derive(Debug, Clone)]
pub struct SyncRegistry {
    path: PathBuf,
}

impl SyncRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SYNC_FILE),
        }
    }

    pub async fn load(&self) -> Result<SyncState, StorageError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    async fn save(&self, state: &SyncState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Unavailable {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        write_json(&self.path, state).await
    }

    /// Register a one-shot task. Registering a pending tag again is a no-op.
    pub async fn register(&self, tag: &str) -> Result<(), StorageError> {
        let _guard = registry_lock().await;
        let mut state = self.load().await?;
        if state.one_shot.insert(tag.to_string()) {
            self.save(&state).await?;
            debug!(tag, "Registered sync task");
        }
        Ok(())
    }

    pub async fn complete(&self, tag: &str) -> Result<(), StorageError> {
        let _guard = registry_lock().await;
        let mut state = self.load().await?;
        if state.one_shot.remove(tag) {
            self.save(&state).await?;
            debug!(tag, "Sync task completed");
        }
        Ok(())
    }

    pub async fn pending(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.load().await?.one_shot.into_iter().collect())
    }

    /// Register (or re-register with a new interval) a periodic task,
    /// keeping its last run time.
    pub async fn register_periodic(&self, tag: &str, min_interval_hours: i64) -> Result<(), StorageError> {
        let _guard = registry_lock().await;
        let mut state = self.load().await?;
        let last_run = state.periodic.get(tag).and_then(|t| t.last_run);
        state.periodic.insert(
            tag.to_string(),
            PeriodicTask {
                min_interval_hours,
                last_run,
            },
        );
        self.save(&state).await
    }

    pub async fn due_periodic(&self, now: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        Ok(self
            .load()
            .await?
            .periodic
            .into_iter()
            .filter(|(_, task)| task.is_due(now))
            .map(|(tag, _)| tag)
            .collect())
    }

    pub async fn mark_periodic_run(&self, tag: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let _guard = registry_lock().await;
        let mut state = self.load().await?;
        if let Some(task) = state.periodic.get_mut(tag) {
            task.last_run = Some(at);
            self.save(&state).await?;
        }
        Ok(())
    }
}
