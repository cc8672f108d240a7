//! Page-side form submission.
//!
//! `FormSubmitter` is what a page does with a form: post it straight to the
//! submit endpoint, and when the network is gone, persist it in the
//! submission store and register the one-shot sync task so the worker
//! delivers it later.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::{FetchError, StorageError, WorkerError, WorkerResult};
use crate::host::SyncRegistry;
use crate::net::{Fetcher, Request};
use crate::outbox::{FormFields, PendingSubmission, SubmissionStore};

/// Attempts at finding a free id before giving up.
const MAX_ID_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The server accepted the submission.
    Delivered { status: u16 },
    /// Stored for background delivery.
    Queued { id: String },
}

#[derive(Clone)]
pub struct FormSubmitter {
    config: Arc<WorkerConfig>,
    data_dir: PathBuf,
    network: Arc<dyn Fetcher>,
}

impl FormSubmitter {
    pub fn new(config: Arc<WorkerConfig>, data_dir: &Path, network: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            data_dir: data_dir.to_path_buf(),
            network,
        }
    }

    /// Post the form; queue it if the server can't be reached.
    ///
    /// A response with an error status is returned as `Rejected` and nothing
    /// is queued: the server saw the form and retrying won't change its mind.
    pub async fn submit(&self, fields: FormFields) -> WorkerResult<SubmitOutcome> {
        let url = self.config.submit_url()?;
        let body = serde_json::to_vec(&fields).map_err(StorageError::from)?;
        let request = Request::post_json(url.clone(), body);

        match self.network.fetch(&request).await {
            Ok(response) if response.ok() => {
                info!(status = response.status, "Form submitted");
                Ok(SubmitOutcome::Delivered {
                    status: response.status,
                })
            }
            Ok(response) => Err(WorkerError::Fetch {
                url: url.to_string(),
                source: FetchError::Rejected {
                    status: response.status,
                },
            }),
            Err(e @ FetchError::Unreachable { .. }) => {
                warn!(error = %e, "Offline, queueing form for background sync");
                self.queue(fields).await
            }
            Err(source) => Err(WorkerError::Fetch {
                url: url.to_string(),
                source,
            }),
        }
    }

    /// Persist the form and register the sync task.
    pub async fn queue(&self, fields: FormFields) -> WorkerResult<SubmitOutcome> {
        let store = SubmissionStore::open(&self.data_dir).await?;
        let mut record = PendingSubmission::new(fields);

        let mut attempts = 0;
        loop {
            match store.add(&record).await {
                Ok(()) => break,
                // Two forms queued within the same millisecond
                Err(StorageError::DuplicateKey(_)) if attempts < MAX_ID_ATTEMPTS => {
                    attempts += 1;
                    record.bump_id();
                }
                Err(e) => return Err(e.into()),
            }
        }

        SyncRegistry::new(&self.data_dir)
            .register(&self.config.form_sync_tag)
            .await?;
        info!(id = %record.id, tag = %self.config.form_sync_tag, "Form queued");
        Ok(SubmitOutcome::Queued { id: record.id })
    }
}
