// Server-side cache layer.
// Warmed by the revalidation daemon, read by the proxy routes, snapshotted to disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::paths::snapshot_path;
use super::store::{delete_snapshot, read_if_fresh, write_snapshot};
use super::ttl::TtlCache;
use crate::config::FetchProfile;

/// Snapshots older than this are ignored on read.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct ServerCache {
    memory: TtlCache<Arc<Value>>,
    snapshot_dir: Option<PathBuf>,
    snapshot_ttl: Duration,
    sweep_interval: Duration,
}

impl ServerCache {
    /// Memory-only cache.
    pub fn new(profile: &FetchProfile) -> Self {
        Self {
            memory: TtlCache::new(profile.ttl),
            snapshot_dir: None,
            snapshot_ttl: SNAPSHOT_TTL,
            sweep_interval: profile.sweep_interval,
        }
    }

    /// Also persist entries under `dir`.
    pub fn with_snapshots(mut self, dir: PathBuf) -> Self {
        self.snapshot_dir = Some(dir);
        self
    }

    pub fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    /// Memory first, then a fresh snapshot. A snapshot hit is promoted to memory.
    pub async fn get(&self, key: &str) -> Option<Arc<Value>> {
        if let Some(value) = self.memory.get(key).await {
            return Some(value);
        }

        let path = snapshot_path(self.snapshot_dir.as_ref()?, key);
        let ttl = self.snapshot_ttl;
        let read = tokio::task::spawn_blocking(move || read_if_fresh::<Value>(&path, ttl)).await;
        match read {
            Ok(Ok(Some(value))) => {
                debug!(key, "server cache hit from snapshot");
                let value = Arc::new(value);
                self.memory.set(key, Arc::clone(&value)).await;
                Some(value)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!(key, error = %e, "failed to read cache snapshot");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "snapshot read task failed");
                None
            }
        }
    }

    /// Store in memory with a jittered TTL and write the snapshot.
    pub async fn put(&self, key: &str, value: Value) -> Arc<Value> {
        let value = Arc::new(value);
        self.memory.set(key, Arc::clone(&value)).await;

        if let Some(dir) = &self.snapshot_dir {
            let path = snapshot_path(dir, key);
            let data = Arc::clone(&value);
            let written =
                tokio::task::spawn_blocking(move || write_snapshot(&path, data.as_ref())).await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(key, error = %e, "failed to write cache snapshot"),
                Err(e) => warn!(key, error = %e, "snapshot write task failed"),
            }
        }

        value
    }

    /// Drop the entry from memory and disk.
    pub async fn invalidate(&self, key: &str) {
        self.memory.invalidate(key).await;
        if let Some(dir) = &self.snapshot_dir {
            let path = snapshot_path(dir, key);
            match tokio::task::spawn_blocking(move || delete_snapshot(&path)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(key, error = %e, "failed to delete cache snapshot"),
                Err(e) => warn!(key, error = %e, "snapshot delete task failed"),
            }
        }
    }

    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.memory.spawn_sweeper(self.sweep_interval, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ServerCache::new(&FetchProfile::server());
        assert!(cache.get("specs").await.is_none());

        cache.put("specs", json!({"data": ["LAV1"]})).await;
        assert_eq!(
            cache.get("specs").await.as_deref(),
            Some(&json!({"data": ["LAV1"]}))
        );
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let profile = FetchProfile::server();

        let first = ServerCache::new(&profile).with_snapshots(temp_dir.path().to_path_buf());
        first.put("provider/lava@1abc", json!({"moniker": "alpha"})).await;

        let second = ServerCache::new(&profile).with_snapshots(temp_dir.path().to_path_buf());
        let value = second.get("provider/lava@1abc").await.unwrap();
        assert_eq!(value["moniker"], "alpha");
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let profile = FetchProfile::server();

        let first = ServerCache::new(&profile).with_snapshots(temp_dir.path().to_path_buf());
        first.put("consumers", json!([1, 2])).await;

        let second = ServerCache::new(&profile)
            .with_snapshots(temp_dir.path().to_path_buf())
            .with_snapshot_ttl(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(second.get("consumers").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ServerCache::new(&FetchProfile::server())
            .with_snapshots(temp_dir.path().to_path_buf());
        cache.put("/provider/lava@1", json!({"moniker": "alpha"})).await;
        assert!(temp_dir.path().join("provider~lava@1.json").exists());

        cache.invalidate("/provider/lava@1").await;
        assert!(cache.get("/provider/lava@1").await.is_none());
        assert!(!temp_dir.path().join("provider~lava@1.json").exists());
    }
}
