use tracing::info;

use super::ServiceWorker;
use crate::error::WorkerResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    pub cache_name: String,
    /// Stale caches deleted during activation.
    pub purged: Vec<String>,
    /// The worker takes control of already-open pages immediately.
    pub claim_clients: bool,
}

impl ServiceWorker {
    /// Delete every cache not named after this worker's version.
    pub async fn activate(&self) -> WorkerResult<ActivateOutcome> {
        let current = self.config.cache_name();
        info!(cache = %current, "Activating");

        let mut purged = Vec::new();
        for name in self.caches.keys().await? {
            if name != current {
                info!(cache = %name, "Deleting old cache");
                self.caches.delete(&name).await?;
                purged.push(name);
            }
        }

        info!(cache = %current, purged = purged.len(), "Activated");
        Ok(ActivateOutcome {
            cache_name: current,
            purged,
            claim_clients: true,
        })
    }
}
