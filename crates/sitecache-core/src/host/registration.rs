use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::utils::fs::{read_json, write_json};

const REGISTRATION_FILE: &str = "registration.json";

/// Which worker version is installed and which one controls pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Installed and waiting for activation.
    pub waiting: Option<String>,
    pub installed_at: Option<DateTime<Utc>>,
    /// Version whose cache serves requests.
    pub active: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub clients_claimed: bool,
}

impl Registration {
    pub fn record_installed(&mut self, version: &str) {
        self.waiting = Some(version.to_string());
        self.installed_at = Some(Utc::now());
    }

    pub fn record_activated(&mut self, version: &str, clients_claimed: bool) {
        self.active = Some(version.to_string());
        self.activated_at = Some(Utc::now());
        self.clients_claimed = clients_claimed;
        if self.waiting.as_deref() == Some(version) {
            self.waiting = None;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationStore {
    path: PathBuf,
}

impl RegistrationStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(REGISTRATION_FILE),
        }
    }

    pub async fn load(&self) -> Result<Registration, StorageError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    pub async fn save(&self, registration: &Registration) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Unavailable {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        write_json(&self.path, registration).await
    }
}
