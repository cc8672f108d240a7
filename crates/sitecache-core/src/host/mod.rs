//! The worker's runtime: what a browser does around a service worker.
//!
//! `ServiceWorkerHost` keeps the registration (which version is waiting and
//! which one is active), remembers registered sync tasks, and dispatches
//! events to a `ServiceWorker` built for the right version. Each dispatch
//! awaits the handler to completion before returning.

pub mod registration;
pub mod sync_registry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::forms::FormSubmitter;
use crate::net::{Fetcher, Request, Response};
use crate::outbox::SubmissionStore;
use crate::worker::{
    ActivateOutcome, FetchDecision, InstallOutcome, RefreshReport, ServiceWorker, SyncReport,
};

pub use registration::{Registration, RegistrationStore};
pub use sync_registry::{PeriodicTask, SyncRegistry, SyncState};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Install,
    Activate,
    Fetch(Request),
    Sync { tag: String },
    PeriodicSync { tag: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Installed {
        install: InstallOutcome,
        /// Set when the new version skipped waiting and was activated.
        activated: Option<ActivateOutcome>,
    },
    Activated(ActivateOutcome),
    Response(Response),
    Synced(SyncReport),
    Refreshed(RefreshReport),
    /// No handler for the event (unknown tag, nothing to activate).
    Ignored,
}

/// Result of one scheduler pass.
#[derive(Debug, Default)]
pub struct TickReport {
    pub fired: Vec<(String, EventOutcome)>,
    pub failed: Vec<(String, WorkerError)>,
}

#[derive(Debug, Clone)]
pub struct CacheSummary {
    pub name: String,
    pub entries: usize,
}

#[derive(Debug, Clone)]
pub struct HostStatus {
    pub registration: Registration,
    pub caches: Vec<CacheSummary>,
    pub queued: usize,
    pub sync: SyncState,
}

pub struct ServiceWorkerHost {
    config: Arc<WorkerConfig>,
    data_dir: PathBuf,
    network: Arc<dyn Fetcher>,
    registration: RegistrationStore,
    sync: SyncRegistry,
}

impl ServiceWorkerHost {
    pub fn new(config: WorkerConfig, data_dir: &Path, network: Arc<dyn Fetcher>) -> Self {
        Self {
            config: Arc::new(config),
            data_dir: data_dir.to_path_buf(),
            network,
            registration: RegistrationStore::new(data_dir),
            sync: SyncRegistry::new(data_dir),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn sync_registry(&self) -> &SyncRegistry {
        &self.sync
    }

    /// The page-side helper bound to this origin.
    pub fn submitter(&self) -> FormSubmitter {
        FormSubmitter::new(self.config.clone(), &self.data_dir, self.network.clone())
    }

    /// Worker built from the configured (newest) version.
    fn incoming_worker(&self) -> ServiceWorker {
        ServiceWorker::new(self.config.clone(), &self.data_dir, self.network.clone())
    }

    fn worker_for(&self, version: &str) -> ServiceWorker {
        if version == self.config.version {
            return self.incoming_worker();
        }
        ServiceWorker::new(
            Arc::new(self.config.with_version(version)),
            &self.data_dir,
            self.network.clone(),
        )
    }

    /// Worker controlling pages, if any version has been activated.
    pub async fn active_worker(&self) -> WorkerResult<Option<ServiceWorker>> {
        let registration = self.registration.load().await?;
        Ok(registration.active.map(|v| self.worker_for(&v)))
    }

    pub async fn dispatch(&self, event: Event) -> WorkerResult<EventOutcome> {
        match event {
            Event::Install => self.install().await,
            Event::Activate => self.activate().await,
            Event::Fetch(request) => self.fetch(&request).await.map(EventOutcome::Response),
            Event::Sync { tag } => self.fire_sync(&tag).await,
            Event::PeriodicSync { tag } => self.fire_periodic(&tag, Utc::now()).await,
        }
    }

    async fn install(&self) -> WorkerResult<EventOutcome> {
        let worker = self.incoming_worker();
        let install = match worker.install().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let active = self.registration.load().await.ok().and_then(|r| r.active);
                error!(
                    version = %self.config.version,
                    active = active.as_deref().unwrap_or("none"),
                    error = %e,
                    "Install failed, keeping current version"
                );
                return Err(e);
            }
        };

        let mut registration = self.registration.load().await?;
        registration.record_installed(&self.config.version);
        self.registration.save(&registration).await?;

        let activated = if install.skip_waiting {
            Some(self.activate_version(&worker).await?)
        } else {
            None
        };
        Ok(EventOutcome::Installed { install, activated })
    }

    async fn activate(&self) -> WorkerResult<EventOutcome> {
        let registration = self.registration.load().await?;
        let version = match registration.waiting.or(registration.active) {
            Some(version) => version,
            None => {
                debug!("Nothing installed, ignoring activate");
                return Ok(EventOutcome::Ignored);
            }
        };
        let worker = self.worker_for(&version);
        self.activate_version(&worker)
            .await
            .map(EventOutcome::Activated)
    }

    async fn activate_version(&self, worker: &ServiceWorker) -> WorkerResult<ActivateOutcome> {
        let outcome = worker.activate().await?;
        let mut registration = self.registration.load().await?;
        registration.record_activated(&worker.config().version, outcome.claim_clients);
        self.registration.save(&registration).await?;
        Ok(outcome)
    }

    /// Answer a request the way a controlled page would see it. Without an
    /// active worker, or when the worker declines, it goes to the network.
    pub async fn fetch(&self, request: &Request) -> WorkerResult<Response> {
        if let Some(worker) = self.active_worker().await? {
            if let FetchDecision::Respond(response) = worker.handle_fetch(request).await? {
                return Ok(response);
            }
        }
        self.network
            .fetch(request)
            .await
            .map_err(|source| WorkerError::Fetch {
                url: request.url.to_string(),
                source,
            })
    }

    async fn fire_sync(&self, tag: &str) -> WorkerResult<EventOutcome> {
        if tag != self.config.form_sync_tag {
            debug!(tag, "Unknown sync tag");
            return Ok(EventOutcome::Ignored);
        }
        let worker = match self.active_worker().await? {
            Some(worker) => worker,
            None => self.incoming_worker(),
        };

        // Cleared before reading the queue: a form queued mid-run registers
        // the tag again instead of finding it already present
        self.sync.complete(tag).await?;
        let report = match worker.sync_submissions().await {
            Ok(report) => report,
            Err(e) => {
                self.sync.register(tag).await?;
                return Err(e);
            }
        };
        if !report.is_drained() {
            self.sync.register(tag).await?;
            info!(tag, still_queued = report.still_queued.len(), "Sync task stays registered");
        }
        Ok(EventOutcome::Synced(report))
    }

    async fn fire_periodic(&self, tag: &str, now: DateTime<Utc>) -> WorkerResult<EventOutcome> {
        if tag != self.config.content_sync_tag {
            debug!(tag, "Unknown periodic sync tag");
            return Ok(EventOutcome::Ignored);
        }
        let worker = match self.active_worker().await? {
            Some(worker) => worker,
            None => {
                debug!(tag, "No active worker, skipping content refresh");
                return Ok(EventOutcome::Ignored);
            }
        };
        let report = worker.refresh_content().await?;
        self.sync.mark_periodic_run(tag, now).await?;
        Ok(EventOutcome::Refreshed(report))
    }

    /// Register a one-shot sync task.
    pub async fn register_sync(&self, tag: &str) -> WorkerResult<()> {
        Ok(self.sync.register(tag).await?)
    }

    pub async fn register_periodic(&self, tag: &str, min_interval_hours: i64) -> WorkerResult<()> {
        self.sync.register_periodic(tag, min_interval_hours).await?;
        info!(tag, min_interval_hours, "Registered periodic sync");
        Ok(())
    }

    /// Install the configured version (activating it straight away) and
    /// register the periodic content refresh, as a page does on load.
    pub async fn update(&self) -> WorkerResult<EventOutcome> {
        let outcome = self.install().await?;
        self.register_periodic(
            &self.config.content_sync_tag,
            self.config.content_sync_interval_hours,
        )
        .await?;
        Ok(outcome)
    }

    /// One scheduler pass: fire every pending one-shot task and every
    /// periodic task whose interval has elapsed. A failing task doesn't
    /// stop the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> WorkerResult<TickReport> {
        let mut report = TickReport::default();

        for tag in self.sync.pending().await? {
            match self.fire_sync(&tag).await {
                Ok(outcome) => report.fired.push((tag, outcome)),
                Err(e) => {
                    warn!(tag = %tag, error = %e, "Sync task failed");
                    report.failed.push((tag, e));
                }
            }
        }

        for tag in self.sync.due_periodic(now).await? {
            match self.fire_periodic(&tag, now).await {
                Ok(outcome) => report.fired.push((tag, outcome)),
                Err(e) => {
                    warn!(tag = %tag, error = %e, "Periodic sync failed");
                    report.failed.push((tag, e));
                }
            }
        }

        Ok(report)
    }

    pub async fn status(&self) -> WorkerResult<HostStatus> {
        let registration = self.registration.load().await?;
        let worker = self.incoming_worker();
        let storage = worker.caches();
        let mut caches = Vec::new();
        for name in storage.keys().await? {
            let entries = storage.open(&name).await?.keys().await?.len();
            caches.push(CacheSummary { name, entries });
        }
        let queued = SubmissionStore::open(&self.data_dir).await?.count().await?;
        let sync = self.sync.load().await?;
        Ok(HostStatus {
            registration,
            caches,
            queued,
            sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::fake::FakeNetwork;
    use crate::outbox::FormFields;

    fn config(version: &str) -> WorkerConfig {
        WorkerConfig {
            precache: vec!["/".to_string(), "/offline.html".to_string()],
            ..WorkerConfig::default()
        }
        .with_version(version)
    }

    fn site() -> Arc<FakeNetwork> {
        let net = Arc::new(FakeNetwork::new());
        net.route("http://localhost:8080/", Response::new(200, "home"));
        net.route("http://localhost:8080/offline.html", Response::new(200, "offline"));
        net.route("http://localhost:8080/submit-form", Response::new(200, "ok"));
        net
    }

    #[tokio::test]
    async fn test_install_activates_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let host = ServiceWorkerHost::new(config("v1"), dir.path(), site());

        let outcome = host.dispatch(Event::Install).await.unwrap();
        let EventOutcome::Installed { activated, .. } = outcome else {
            panic!("expected install outcome");
        };
        assert!(activated.is_some());

        let status = host.status().await.unwrap();
        assert_eq!(status.registration.active.as_deref(), Some("v1"));
        assert!(status.registration.clients_claimed);
        assert_eq!(status.caches.len(), 1);
        assert_eq!(status.caches[0].entries, 2);
    }

    #[tokio::test]
    async fn test_without_active_worker_fetch_goes_to_network() {
        let dir = tempfile::tempdir().unwrap();
        let net = site();
        let host = ServiceWorkerHost::new(config("v1"), dir.path(), net.clone());

        let response = host
            .fetch(&Request::get(host.config().resolve("/").unwrap()))
            .await
            .unwrap();
        assert_eq!(response.text(), "home");
        assert!(host.incoming_worker().caches().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_with_nothing_installed_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let host = ServiceWorkerHost::new(config("v1"), dir.path(), site());
        assert_eq!(host.dispatch(Event::Activate).await.unwrap(), EventOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_unknown_tags_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let host = ServiceWorkerHost::new(config("v1"), dir.path(), site());
        let sync = Event::Sync {
            tag: "newsletter-sync".to_string(),
        };
        let periodic = Event::PeriodicSync {
            tag: "news-sync".to_string(),
        };
        assert_eq!(host.dispatch(sync).await.unwrap(), EventOutcome::Ignored);
        assert_eq!(host.dispatch(periodic).await.unwrap(), EventOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_sync_tag_kept_until_queue_drains() {
        let dir = tempfile::tempdir().unwrap();
        let net = site();
        let host = ServiceWorkerHost::new(config("v1"), dir.path(), net.clone());
        host.dispatch(Event::Install).await.unwrap();

        net.set_offline(true);
        host.submitter()
            .submit(FormFields::from_pairs([("email", "a@example.org")]))
            .await
            .unwrap();

        let report = host.tick(Utc::now()).await.unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(host.sync_registry().pending().await.unwrap(), vec!["contact-form-sync"]);

        net.set_offline(false);
        let report = host.tick(Utc::now()).await.unwrap();
        let (tag, EventOutcome::Synced(sync)) = &report.fired[0] else {
            panic!("expected a sync run");
        };
        assert_eq!(tag, "contact-form-sync");
        assert!(sync.is_drained());
        assert!(host.sync_registry().pending().await.unwrap().is_empty());
    }

    /// Site whose first delivery triggers another form being queued, the way
    /// a user submits again while the background sync is mid-flight.
    struct BusySite {
        inner: Arc<FakeNetwork>,
        submitter: std::sync::Mutex<Option<FormSubmitter>>,
    }

    #[async_trait::async_trait]
    impl Fetcher for BusySite {
        async fn fetch(&self, request: &Request) -> Result<Response, crate::error::FetchError> {
            let submitter = self.submitter.lock().unwrap().take();
            if let Some(submitter) = submitter {
                submitter
                    .queue(FormFields::from_pairs([("email", "late@example.org")]))
                    .await
                    .unwrap();
            }
            self.inner.fetch(request).await
        }
    }

    #[tokio::test]
    async fn test_form_queued_during_sync_keeps_tag_registered() {
        let dir = tempfile::tempdir().unwrap();
        let host = ServiceWorkerHost::new(config("v1"), dir.path(), site());
        host.submitter()
            .queue(FormFields::from_pairs([("email", "first@example.org")]))
            .await
            .unwrap();

        let busy = Arc::new(BusySite {
            inner: site(),
            submitter: std::sync::Mutex::new(Some(host.submitter())),
        });
        let syncing = ServiceWorkerHost::new(config("v1"), dir.path(), busy);
        let outcome = syncing
            .dispatch(Event::Sync {
                tag: "contact-form-sync".to_string(),
            })
            .await
            .unwrap();

        let EventOutcome::Synced(report) = outcome else {
            panic!("expected a sync report");
        };
        assert_eq!(report.delivered.len(), 1);
        let queued = SubmissionStore::open(dir.path()).await.unwrap().count().await.unwrap();
        assert_eq!(queued, 1);
        assert_eq!(host.sync_registry().pending().await.unwrap(), vec!["contact-form-sync"]);
    }

    #[tokio::test]
    async fn test_tick_fires_periodic_only_when_due() {
        let dir = tempfile::tempdir().unwrap();
        let host = ServiceWorkerHost::new(config("v1"), dir.path(), site());
        host.update().await.unwrap();
        let now = Utc::now();

        let first = host.tick(now).await.unwrap();
        assert!(matches!(first.fired.as_slice(), [(_, EventOutcome::Refreshed(_))]));

        let soon = host.tick(now + chrono::Duration::hours(1)).await.unwrap();
        assert!(soon.fired.is_empty());

        let later = host.tick(now + chrono::Duration::hours(25)).await.unwrap();
        assert_eq!(later.fired.len(), 1);
    }
}
