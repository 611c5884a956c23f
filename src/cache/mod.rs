//! Run-scoped cache
//!
//! Holds the artifacts a run moves through the cache and the ids of the
//! instances the run created. Both live in their own store file under the
//! storage root, partitioned by run id. A run that fails keeps its
//! partitions on disk so leaked instances can be found again later.
//!
//! The instance partition of a run records the id of the process running
//! it until the run's cache is dropped. Recovery uses that to tell a run
//! still in progress from one that was abandoned.

mod store;

use std::path::Path;

use crate::common::{Error, Result};
use store::KeyedStore;

const ARTIFACT_DB: &str = "artifact.db";
const INSTANCE_DB: &str = "instance.db";

/// A run with a cache on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRun {
    pub run_id: String,
    /// Process running it, cleared when the run lets go of its cache
    pub owner_pid: Option<u32>,
}

impl StoredRun {
    /// Whether the run is still in progress
    ///
    /// Without `/proc` there is no way to check the owner, so an owned run
    /// counts as live.
    pub fn is_live(&self) -> bool {
        match self.owner_pid {
            Some(pid) => {
                let proc = Path::new("/proc");
                !proc.is_dir() || proc.join(pid.to_string()).exists()
            }
            None => false,
        }
    }
}

/// Cache for a single run
#[derive(Debug)]
pub struct RunCache {
    run_id: String,
    artifacts: KeyedStore,
    instances: KeyedStore,
    /// Whether this handle marked the run as in progress
    owned: bool,
}

impl RunCache {
    /// Create empty artifact and instance partitions for a new run
    pub fn new(root: &Path, run_id: &str) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| unavailable(root, e))?;

        // The instance partition is created first and dropped last, so it
        // exists for as long as any part of the run's cache does.
        let mut cache = Self::at(root, run_id);
        cache
            .instances
            .create_partition(run_id, Some(std::process::id()))
            .map_err(|e| unavailable(root, e))?;
        cache.owned = true;
        cache
            .artifacts
            .create_partition(run_id, None)
            .map_err(|e| unavailable(root, e))?;

        tracing::debug!(run_id, root = %root.display(), "created run cache");
        Ok(cache)
    }

    /// Reopen the partitions of an earlier run
    ///
    /// The reopened cache does not take over ownership of the run.
    pub fn open(root: &Path, run_id: &str) -> Result<Self> {
        let cache = Self::at(root, run_id);
        cache.instances.ensure_partition(run_id)?;
        Ok(cache)
    }

    fn at(root: &Path, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            artifacts: KeyedStore::new(root, ARTIFACT_DB),
            instances: KeyedStore::new(root, INSTANCE_DB),
            owned: false,
        }
    }

    /// Runs that still have partitions under `root`, oldest first
    ///
    /// A run flushes its partitions when it completes, so anything listed
    /// here either is still running or failed. [`StoredRun::is_live`] tells
    /// the two apart.
    pub fn stored_runs(root: &Path) -> Result<Vec<StoredRun>> {
        Ok(KeyedStore::new(root, INSTANCE_DB)
            .partitions()?
            .into_iter()
            .map(|partition| StoredRun {
                run_id: partition.run_id,
                owner_pid: partition.owner_pid,
            })
            .collect())
    }

    /// Ids of every run listed by [`RunCache::stored_runs`]
    pub fn runs(root: &Path) -> Result<Vec<String>> {
        Ok(Self::stored_runs(root)?
            .into_iter()
            .map(|run| run.run_id)
            .collect())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Store an artifact archive under `key`
    pub fn put_artifact(&self, key: &str, artifact: &[u8]) -> Result<()> {
        self.artifacts.put(&self.run_id, key, artifact)?;
        tracing::debug!(run_id = %self.run_id, key, bytes = artifact.len(), "cached artifact");
        Ok(())
    }

    /// Fetch the artifact archive stored under `key`
    pub fn get_artifact(&self, key: &str) -> Result<Vec<u8>> {
        self.artifacts
            .get(&self.run_id, key)?
            .ok_or_else(|| Error::ArtifactNotFound(key.to_string()))
    }

    /// Record an instance created by this run
    ///
    /// The record is committed to disk before this returns.
    pub fn add_instance_id(&self, id: &str) -> Result<()> {
        self.instances.insert(&self.run_id, id)?;
        tracing::debug!(run_id = %self.run_id, instance = id, "recorded instance");
        Ok(())
    }

    /// Every instance recorded by this run, in creation order
    pub fn instance_ids(&self) -> Result<Vec<String>> {
        self.instances.keys(&self.run_id)
    }

    /// Delete both partitions of this run
    pub fn flush(mut self) -> Result<()> {
        self.artifacts.drop_partition(&self.run_id)?;
        self.instances.drop_partition(&self.run_id)?;
        self.owned = false;
        tracing::debug!(run_id = %self.run_id, "flushed run cache");
        Ok(())
    }
}

impl Drop for RunCache {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match self.instances.release_partition(&self.run_id) {
            Ok(()) => tracing::debug!(run_id = %self.run_id, "released run cache"),
            Err(e) => tracing::warn!(run_id = %self.run_id, error = %e, "Failed to release run cache"),
        }
    }
}

fn unavailable(root: &Path, reason: impl std::fmt::Display) -> Error {
    Error::StorageUnavailable {
        path: root.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RunCache::new(dir.path(), "run-1").unwrap();

        cache.put_artifact("build", b"tarball").unwrap();
        assert_eq!(cache.get_artifact("build").unwrap(), b"tarball");

        cache.put_artifact("build", b"newer").unwrap();
        assert_eq!(cache.get_artifact("build").unwrap(), b"newer");
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RunCache::new(dir.path(), "run-1").unwrap();
        assert!(matches!(
            cache.get_artifact("nope"),
            Err(Error::ArtifactNotFound(key)) if key == "nope"
        ));
    }

    #[test]
    fn test_instance_ids_are_recorded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RunCache::new(dir.path(), "run-1").unwrap();
        assert!(cache.instance_ids().unwrap().is_empty());

        cache.add_instance_id("controller").unwrap();
        cache.add_instance_id("compute").unwrap();

        assert_eq!(cache.instance_ids().unwrap(), vec!["controller", "compute"]);
    }

    #[test]
    fn test_flush_removes_both_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RunCache::new(dir.path(), "run-1").unwrap();
        cache.put_artifact("build", b"tarball").unwrap();
        cache.add_instance_id("controller").unwrap();
        assert_eq!(RunCache::runs(dir.path()).unwrap(), vec!["run-1"]);

        cache.flush().unwrap();

        assert!(RunCache::runs(dir.path()).unwrap().is_empty());
        assert!(RunCache::open(dir.path(), "run-1").is_err());
    }

    #[test]
    fn test_runs_are_scoped_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunCache::new(dir.path(), "run-1").unwrap();
        let second = RunCache::new(dir.path(), "run-2").unwrap();

        first.add_instance_id("a").unwrap();
        second.add_instance_id("b").unwrap();
        second.flush().unwrap();

        let reopened = RunCache::open(dir.path(), "run-1").unwrap();
        assert_eq!(reopened.instance_ids().unwrap(), vec!["a"]);
        assert_eq!(RunCache::runs(dir.path()).unwrap(), vec!["run-1"]);
    }

    #[test]
    fn test_run_is_live_until_its_cache_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RunCache::new(dir.path(), "run-1").unwrap();
        cache.add_instance_id("web").unwrap();

        let runs = RunCache::stored_runs(dir.path()).unwrap();
        assert_eq!(runs[0].owner_pid, Some(std::process::id()));
        assert!(runs[0].is_live());

        // Reopening for recovery does not release the owner
        drop(RunCache::open(dir.path(), "run-1").unwrap());
        assert!(RunCache::stored_runs(dir.path()).unwrap()[0].is_live());

        drop(cache);
        let runs = RunCache::stored_runs(dir.path()).unwrap();
        assert_eq!(runs[0].run_id, "run-1");
        assert!(!runs[0].is_live());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_run_owned_by_exited_process_is_not_live() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let run = StoredRun {
            run_id: "crashed".to_string(),
            owner_pid: Some(pid),
        };
        assert!(!run.is_live());
    }

    #[test]
    fn test_unwritable_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = RunCache::new(&blocker.join("storage"), "run-1").unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable { .. }));
    }
}
