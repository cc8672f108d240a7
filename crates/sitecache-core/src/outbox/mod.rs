//! Durable queue of form submissions made while offline.
//!
//! This module provides:
//! - `PendingSubmission`: one queued submission (id, timestamp, fields)
//! - `SubmissionStore`: the keyed record store the sync handler drains
//!
//! Records outlive any single page load or worker instance; they are deleted
//! only after successful delivery.

pub mod record;
pub mod store;

pub use record::{FieldValue, FormFields, PendingSubmission};
pub use store::SubmissionStore;
