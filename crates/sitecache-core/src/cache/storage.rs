//! Disk-backed cache storage.
//!
//! Layout under the storage root:
//!
//! ```text
//! caches/
//!   account-ability-cache-v1/
//!     <sha256(key)>.entry   metadata line + response body
//! ```
//!
//! A put is a single atomic rename, so the last writer of a key wins and
//! readers never observe a partial entry.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::entry::CachedResponse;
use crate::error::StorageError;
use crate::net::{Request, Response};
use crate::utils::fs::{list_dir, read_bytes, remove_if_exists, write_atomic};

const CACHES_DIR: &str = "caches";

const ENTRY_EXT: &str = "entry";

fn hex_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidCacheName(name.to_string()))
    }
}

/// All named caches of one origin.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join(CACHES_DIR),
        }
    }

    fn cache_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Open a cache, creating it if it does not exist.
    pub async fn open(&self, name: &str) -> Result<NamedCache, StorageError> {
        validate_name(name)?;
        let dir = self.cache_dir(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Unavailable {
                path: dir.clone(),
                source,
            })?;
        Ok(NamedCache {
            name: name.to_string(),
            dir,
        })
    }

    pub async fn has(&self, name: &str) -> bool {
        validate_name(name).is_ok() && fs::metadata(self.cache_dir(name)).await.is_ok()
    }

    /// Delete a cache and everything in it. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        validate_name(name)?;
        let dir = self.cache_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(dir, e)),
        }
    }

    /// Names of all existing caches, sorted.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for path in list_dir(&self.root).await? {
            let is_dir = fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

/// One versioned cache: request identity → stored response.
#[derive(Debug, Clone)]
pub struct NamedCache {
    name: String,
    dir: PathBuf,
}

impl NamedCache {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", hex_digest(key.as_bytes()), ENTRY_EXT))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<(CachedResponse, Vec<u8>)>, StorageError> {
        let Some(bytes) = read_bytes(path).await? else {
            return Ok(None);
        };
        CachedResponse::decode(bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Only GET requests have a cache identity.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, StorageError> {
        if !request.is_get() {
            return Ok(None);
        }
        let key = request.cache_key();
        let Some((meta, body)) = self.read_entry(&self.entry_path(&key)).await? else {
            return Ok(None);
        };
        if meta.key != key {
            // sha256 collision or a hand-edited file
            return Ok(None);
        }
        Ok(Some(meta.into_response(body)))
    }

    /// Store a copy of `response` under `request`'s identity, replacing any
    /// previous entry. Concurrent puts of one key leave exactly one of them.
    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), StorageError> {
        if !request.is_get() {
            return Err(StorageError::Uncacheable(request.method.clone()));
        }
        let meta = CachedResponse::new(request, response);
        let contents = meta.encode(&response.body)?;
        write_atomic(&self.entry_path(&meta.key), &contents).await?;

        debug!(cache = %self.name, key = %meta.key, bytes = meta.body_len, "Cached response");
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub async fn delete(&self, request: &Request) -> Result<bool, StorageError> {
        remove_if_exists(&self.entry_path(&request.cache_key())).await
    }

    /// Metadata of every stored entry, sorted by key.
    pub async fn entries(&self) -> Result<Vec<CachedResponse>, StorageError> {
        let mut entries = Vec::new();
        for path in list_dir(&self.dir).await? {
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some((meta, _)) = self.read_entry(&path).await? {
                entries.push(meta);
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Request identities of every stored entry, sorted.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries().await?.into_iter().map(|e| e.key).collect())
    }
}
