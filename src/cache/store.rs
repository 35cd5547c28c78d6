// Snapshot store for server cache entries.
// JSON files stamped with their write time, written atomically.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;

use crate::error::Result;

/// A snapshot on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> Snapshot<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    /// Age of the snapshot; clock skew into the future counts as zero.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

/// Read a snapshot, `None` if the file does not exist.
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<Snapshot<T>>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)?;
    let snapshot: Snapshot<T> = serde_json::from_str(&contents)?;
    Ok(Some(snapshot))
}

/// Read a snapshot's data if it is younger than `ttl`.
pub fn read_if_fresh<T: DeserializeOwned>(path: &Path, ttl: Duration) -> Result<Option<T>> {
    match read_snapshot::<T>(path)? {
        Some(snapshot) if !snapshot.is_expired(ttl) => Ok(Some(snapshot.data)),
        _ => Ok(None),
    }
}

/// Write a snapshot through a uniquely named temp file in the same
/// directory, then rename it over the target.
pub fn write_snapshot<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let json = serde_json::to_string(&Snapshot::new(data))?;

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(json.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    Ok(())
}

pub fn delete_snapshot(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}
