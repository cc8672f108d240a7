use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, warn};

use super::record::PendingSubmission;
use crate::error::StorageError;
use crate::utils::fs::{list_dir, read_json, remove_if_exists, sweep_stale_temp_files, temp_path};

/// Record collection holding queued form submissions.
const STORE_DIR: &str = "forms";

/// Staging files this old belong to an `add` that died.
const STALE_STAGING_AGE: Duration = Duration::from_secs(3600);

fn validate_key(id: &str) -> Result<(), StorageError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(id.to_string()))
    }
}

/// Durable keyed store of `PendingSubmission`s, one JSON file per record.
#[derive(Debug, Clone)]
pub struct SubmissionStore {
    dir: PathBuf,
}

impl SubmissionStore {
    /// Open (creating if needed) the store under `data_dir`. Failure here is
    /// the storage-unavailable case and must reach the caller.
    pub async fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let dir = data_dir.join(STORE_DIR);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Unavailable {
                path: dir.clone(),
                source,
            })?;
        sweep_stale_temp_files(&dir, STALE_STAGING_AGE).await?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Insert a new record. Fails with `DuplicateKey` if the id is taken.
    pub async fn add(&self, record: &PendingSubmission) -> Result<(), StorageError> {
        validate_key(&record.id)?;
        let path = self.record_path(&record.id);
        let staging = temp_path(&path);
        let contents = serde_json::to_vec_pretty(record)?;
        fs::write(&staging, &contents)
            .await
            .map_err(|e| StorageError::io(&staging, e))?;

        // hard_link refuses to replace an existing file, which gives add-only semantics
        let linked = fs::hard_link(&staging, &path).await;
        if let Err(e) = remove_if_exists(&staging).await {
            // Skipped by readers; swept on a later open
            warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
        }
        match linked {
            Ok(()) => {
                debug!(id = %record.id, "Queued submission stored");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::DuplicateKey(record.id.clone()))
            }
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<PendingSubmission>, StorageError> {
        validate_key(id)?;
        read_json(&self.record_path(id)).await
    }

    /// Every stored record, oldest id first. Unreadable records are skipped
    /// so one bad file cannot block the rest of the queue.
    pub async fn get_all(&self) -> Result<Vec<PendingSubmission>, StorageError> {
        let mut records = Vec::new();
        for path in list_dir(&self.dir).await? {
            let is_record = path.extension().and_then(|e| e.to_str()) == Some("json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
            if !is_record {
                continue;
            }
            match read_json::<PendingSubmission>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable submission record"),
            }
        }
        // Numeric ids of different widths still sort by age
        records.sort_by(|a, b| (a.id.len(), &a.id).cmp(&(b.id.len(), &b.id)));
        Ok(records)
    }

    /// Returns whether the record existed.
    pub async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        validate_key(id)?;
        remove_if_exists(&self.record_path(id)).await
    }

    pub async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.get_all().await?.len())
    }
}
