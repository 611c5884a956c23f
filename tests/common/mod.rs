//! Shared test fixtures: an instrumented in-process instance provider
//!
//! Every instance is a directory under a scratch root standing in for the
//! instance's filesystem root. Scenes run through `sh` with `$ROOT` pointing
//! at that directory. Every provider call is logged in order. Like a real
//! backend, nothing can be staged or run in an instance until its staging
//! directories exist.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use gambol::artifact::{codec, Artifact};
use gambol::cache::RunCache;
use gambol::provider::staging::STAGING_ROOT;
use gambol::provider::{InstanceProvider, InstanceStatus};
use gambol::{Error, Result};
use tempfile::TempDir;

#[derive(Default)]
struct MockState {
    instances: BTreeMap<String, InstanceStatus>,
    calls: Vec<String>,
    fail_create: HashSet<String>,
    fail_delete: HashSet<String>,
}

pub struct MockProvider {
    root: PathBuf,
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Add an instance that exists before the run
    pub fn with_instance(self, id: &str, status: InstanceStatus) -> Self {
        fs::create_dir_all(self.instance_root(id)).unwrap();
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(id.to_string(), status);
        self
    }

    /// Make `create` fail after the instance was provisioned
    pub fn failing_create(self, id: &str) -> Self {
        self.state.lock().unwrap().fail_create.insert(id.to_string());
        self
    }

    /// Make `delete` fail
    pub fn failing_delete(self, id: &str) -> Self {
        self.state.lock().unwrap().fail_delete.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls whose first word is `kind`
    pub fn calls_of(&self, kind: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split(' ').next() == Some(kind))
            .collect()
    }

    pub fn instances(&self) -> Vec<String> {
        self.state.lock().unwrap().instances.keys().cloned().collect()
    }

    pub fn status_of(&self, id: &str) -> Option<InstanceStatus> {
        self.state.lock().unwrap().instances.get(id).copied()
    }

    pub fn instance_root(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Host location of a path inside an instance
    pub fn instance_path(&self, id: &str, path: &str) -> PathBuf {
        self.instance_root(id).join(path.trim_start_matches('/'))
    }

    pub fn has_staging(&self, id: &str) -> bool {
        let staging = self.instance_path(id, STAGING_ROOT);
        staging.join("input").is_dir() && staging.join("output").is_dir()
    }

    fn make_staging(&self, id: &str) -> Result<()> {
        let staging = self.instance_path(id, STAGING_ROOT);
        fs::create_dir_all(staging.join("input"))?;
        fs::create_dir_all(staging.join("output"))?;
        Ok(())
    }

    fn require_staging(&self, id: &str, operation: &str) -> Result<()> {
        self.require_running(id)?;
        if self.has_staging(id) {
            Ok(())
        } else {
            Err(Error::provider(
                operation,
                format!("{STAGING_ROOT} is missing in '{id}'"),
            ))
        }
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn require(&self, id: &str) -> Result<InstanceStatus> {
        self.status_of(id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    fn require_running(&self, id: &str) -> Result<()> {
        match self.require(id)? {
            InstanceStatus::Running => Ok(()),
            other => Err(Error::provider(
                "exec",
                format!("instance '{id}' is {other:?}"),
            )),
        }
    }

    fn set_status(&self, id: &str, status: InstanceStatus) {
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(id.to_string(), status);
    }
}

#[async_trait]
impl InstanceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.status_of(id).is_some())
    }

    async fn status(&self, id: &str) -> Result<InstanceStatus> {
        self.require(id)
    }

    async fn create(&self, id: &str, image: &str) -> Result<()> {
        self.record(format!("create {id} {image}"));
        fs::create_dir_all(self.instance_root(id))?;

        if self.state.lock().unwrap().fail_create.contains(id) {
            self.set_status(id, InstanceStatus::Error);
            return Err(Error::provider("start instance", "boot failed"));
        }
        self.set_status(id, InstanceStatus::Running);
        self.make_staging(id)
    }

    async fn prepare(&self, id: &str) -> Result<()> {
        self.record(format!("prepare {id}"));
        self.require_running(id)?;
        self.make_staging(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record(format!("start {id}"));
        self.require(id)?;
        self.set_status(id, InstanceStatus::Running);
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.record(format!("stop {id}"));
        self.require_running(id)?;
        self.set_status(id, InstanceStatus::Stopped);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.record(format!("delete {id}"));
        if self.require(id)?.is_active() {
            return Err(Error::provider("delete instance", "instance is running"));
        }
        if self.state.lock().unwrap().fail_delete.contains(id) {
            return Err(Error::provider("delete instance", "storage busy"));
        }
        fs::remove_dir_all(self.instance_root(id))?;
        self.state.lock().unwrap().instances.remove(id);
        Ok(())
    }

    async fn exec(&self, id: &str, script: &str) -> Result<()> {
        self.record(format!("exec {id}"));
        self.require_staging(id, "push file")?;

        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .env("ROOT", self.instance_root(id))
            .current_dir(self.instance_root(id))
            .status()
            .await?;
        match status.code() {
            Some(0) => Ok(()),
            code => Err(Error::SceneFailed {
                instance: id.to_string(),
                code: code.unwrap_or(-1) as i64,
            }),
        }
    }

    async fn put_artifact(&self, id: &str, artifact: &Artifact, archive: &[u8]) -> Result<()> {
        self.record(format!("put {id} {}", artifact.path));
        self.require_staging(id, "push file")?;
        codec::unpack(
            &artifact.name()?,
            archive,
            &self.instance_path(id, &artifact.path),
        )
    }

    async fn get_artifact(&self, id: &str, artifact: &Artifact) -> Result<Vec<u8>> {
        self.record(format!("get {id} {}", artifact.path));
        self.require_staging(id, "pull file")?;
        codec::pack(&self.instance_path(id, &artifact.path))
    }
}

/// Scratch space for one test: instances, run storage and host files
pub struct TestContext {
    pub dir: TempDir,
    pub provider: MockProvider,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with(|provider| provider)
    }

    pub fn with(configure: impl FnOnce(MockProvider) -> MockProvider) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("host")).unwrap();
        let provider = configure(MockProvider::new(&dir.path().join("instances")));
        Self { dir, provider }
    }

    pub fn storage_root(&self) -> PathBuf {
        self.dir.path().join("storage")
    }

    /// Directory standing in for the host filesystem
    pub fn host(&self) -> PathBuf {
        self.dir.path().join("host")
    }

    pub fn cache(&self, run_id: &str) -> RunCache {
        RunCache::new(&self.storage_root(), run_id).unwrap()
    }

    /// Run ids whose caches are still on disk
    pub fn leftover_runs(&self) -> Vec<String> {
        RunCache::runs(&self.storage_root()).unwrap()
    }
}
