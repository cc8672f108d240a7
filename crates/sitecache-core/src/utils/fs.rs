//! Small async file helpers shared by the durable stores.
//!
//! Writers may race (two tabs populating the same cache key), so every write
//! goes to a uniquely named temp file that is then renamed over the target.
//! Readers see either the old value or the new one, never a torn file.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::StorageError;

const TMP_MARKER: &str = ".tmp-";

pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!("{}{:016x}", TMP_MARKER, rand::random::<u64>()));
    path.with_file_name(name)
}

pub(crate) fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.contains(TMP_MARKER))
        .unwrap_or(false)
}

pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let tmp = temp_path(path);
    fs::write(&tmp, contents)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

pub(crate) async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let contents = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &contents).await
}

/// `Ok(None)` when the file does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let contents = match fs::read(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// `Ok(None)` when the file does not exist.
pub(crate) async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path).await {
        Ok(c) => Ok(Some(c)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Entries of a directory, skipping in-flight temp files. Missing dir is empty.
pub(crate) async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        let path = entry.path();
        if !is_temp_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Remove temp files older than `max_age`, left behind by writes that never
/// finished. Younger ones may belong to a writer still in flight.
pub(crate) async fn sweep_stale_temp_files(dir: &Path, max_age: Duration) -> Result<usize, StorageError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        let path = entry.path();
        if !is_temp_file(&path) {
            continue;
        }
        let stale = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age >= max_age)
            .unwrap_or(false);
        if !stale {
            continue;
        }
        match remove_if_exists(&path).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale temp file"),
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "Swept stale temp files");
    }
    Ok(removed)
}
