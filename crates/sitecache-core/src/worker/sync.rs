//! Background sync handlers.
//!
//! Both are idempotent batch jobs: the platform decides when (and how often)
//! they run, and neither retries internally.

use tracing::{error, info, warn};

use super::ServiceWorker;
use crate::error::{FetchError, StorageError, WorkerError, WorkerResult};
use crate::net::Request;
use crate::outbox::{PendingSubmission, SubmissionStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub delivered: Vec<String>,
    pub still_queued: Vec<String>,
}

impl SyncReport {
    /// Nothing left to deliver.
    pub fn is_drained(&self) -> bool {
        self.still_queued.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

impl ServiceWorker {
    /// Try to deliver every queued submission, deleting each one the server
    /// accepts. One record failing never stops the others.
    ///
    /// Only an unavailable record store is an error.
    pub async fn sync_submissions(&self) -> WorkerResult<SyncReport> {
        let store = SubmissionStore::open(&self.data_dir).await.map_err(|e| {
            error!(error = %e, "Cannot open submission store");
            e
        })?;
        let records = store.get_all().await?;
        info!(queued = records.len(), "Syncing queued submissions");

        let mut report = SyncReport::default();
        for record in records {
            match self.deliver(&record).await {
                Ok(()) => match store.delete(&record.id).await {
                    Ok(_) => report.delivered.push(record.id),
                    Err(e) => {
                        // Delivered but still on disk; the server sees it again next run
                        warn!(id = %record.id, error = %e, "Failed to remove delivered submission");
                        report.still_queued.push(record.id);
                    }
                },
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Form sync failed");
                    report.still_queued.push(record.id);
                }
            }
        }

        info!(
            delivered = report.delivered.len(),
            still_queued = report.still_queued.len(),
            "Submission sync finished"
        );
        Ok(report)
    }

    /// POST one record to the submit endpoint. Any non-2xx status is a failure.
    pub async fn deliver(&self, record: &PendingSubmission) -> WorkerResult<()> {
        let url = self.config.submit_url()?;
        let body = serde_json::to_vec(record).map_err(StorageError::from)?;
        let request = Request::post_json(url.clone(), body);

        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|source| WorkerError::Fetch {
                url: url.to_string(),
                source,
            })?;
        if response.ok() {
            Ok(())
        } else {
            Err(WorkerError::Fetch {
                url: url.to_string(),
                source: FetchError::Rejected {
                    status: response.status,
                },
            })
        }
    }

    /// Re-fetch the main pages into the current cache. OK responses replace
    /// the cached copy; failures are logged per page.
    pub async fn refresh_content(&self) -> WorkerResult<RefreshReport> {
        let cache = self.current_cache().await.map_err(|e| {
            error!(error = %e, "Content update failed");
            e
        })?;

        let mut report = RefreshReport::default();
        for path in &self.config.refresh_pages {
            let request = Request::get(self.config.resolve(path)?);
            let outcome = match self.network.fetch(&request).await {
                Ok(response) if response.ok() => {
                    cache.put(&request, &response).await.map_err(|e| e.to_string())
                }
                Ok(response) => Err(format!("status {}", response.status)),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(()) => report.refreshed.push(path.clone()),
                Err(e) => {
                    error!(path = %path, error = %e, "Failed to update page");
                    report.failed.push(path.clone());
                }
            }
        }

        info!(refreshed = report.refreshed.len(), failed = report.failed.len(), "Content updated");
        Ok(report)
    }
}
