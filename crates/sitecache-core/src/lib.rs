//! sitecache-core: an offline cache and background-sync worker for one site.
//!
//! The worker precaches a manifest on install, purges stale cache versions on
//! activation, answers intercepted requests cache-first (static assets) or
//! network-first (documents, with an offline page fallback), and delivers
//! form submissions queued while the network was down.

pub mod cache;
pub mod config;
pub mod error;
pub mod forms;
pub mod host;
pub mod net;
pub mod outbox;
mod utils;
pub mod worker;

pub use config::{WorkerConfig, CONTENT_SYNC_TAG, FORM_SYNC_TAG};
pub use error::{FetchError, StorageError, WorkerError, WorkerResult};
pub use forms::{FormSubmitter, SubmitOutcome};
pub use host::{Event, EventOutcome, HostStatus, ServiceWorkerHost, TickReport};
pub use net::{Fetcher, HttpFetcher, Request, Response, ResponseKind};
pub use outbox::{FieldValue, FormFields, PendingSubmission, SubmissionStore};
pub use worker::ServiceWorker;
