//! Instance providers
//!
//! An instance provider creates, runs and tears down the isolated instances
//! acts execute in. The scheduler only ever talks to the [`InstanceProvider`]
//! capability set; backends live in submodules.

pub mod lxd;
pub mod staging;

use async_trait::async_trait;

use crate::artifact::Artifact;
use crate::common::config::Config;
use crate::common::Result;
use crate::playthrough::{ProviderKind, ProviderSpec};

pub use lxd::LxdProvider;

/// Lifecycle state of an instance as seen by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Started and able to run commands
    Running,
    /// Cleanly stopped
    Stopped,
    /// Failed to provision or crashed
    Error,
    /// Moving between states (starting, stopping, freezing, ...)
    Transitioning,
}

impl InstanceStatus {
    /// Whether the instance counts as live
    ///
    /// Only stopped and errored instances are inactive; anything in between
    /// still needs stopping before it can be deleted.
    pub fn is_active(self) -> bool {
        !matches!(self, InstanceStatus::Stopped | InstanceStatus::Error)
    }
}

/// Capability set every instance backend implements
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Backend name for diagnostics
    fn name(&self) -> &str;

    /// Whether an instance with this id exists in any state
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Current lifecycle state of an instance
    async fn status(&self, id: &str) -> Result<InstanceStatus>;

    /// Whether an instance is live (see [`InstanceStatus::is_active`])
    async fn is_active(&self, id: &str) -> Result<bool> {
        Ok(self.status(id).await?.is_active())
    }

    /// Provision an instance from an image alias, start it and prepare the
    /// staging layout
    ///
    /// The instance is only ready once all three steps succeeded. A failure
    /// may leave a partially created instance behind for the caller to
    /// destroy.
    async fn create(&self, id: &str, image: &str) -> Result<()>;

    /// Create the staging layout inside a running instance
    ///
    /// Safe to call on an instance that already has it. Reused instances
    /// go through this before anything is transferred or run in them.
    async fn prepare(&self, id: &str) -> Result<()>;

    /// Start a stopped instance
    async fn start(&self, id: &str) -> Result<()>;

    /// Stop a running instance without deleting it
    async fn stop(&self, id: &str) -> Result<()>;

    /// Delete a stopped instance
    async fn delete(&self, id: &str) -> Result<()>;

    /// Tear down a batch of instances
    ///
    /// Each instance is stopped if still active and then deleted. Ids that no
    /// longer exist are skipped. The first failure aborts the batch.
    async fn destroy(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            if !self.exists(id).await? {
                tracing::debug!(instance = %id, "instance already gone");
                continue;
            }
            if self.is_active(id).await? {
                self.stop(id).await?;
            }
            self.delete(id).await?;
            tracing::info!(instance = %id, "Destroyed instance");
        }
        Ok(())
    }

    /// Run a shell script inside an instance
    ///
    /// Fails with `SceneFailed` when the script exits non-zero.
    async fn exec(&self, id: &str, script: &str) -> Result<()>;

    /// Place an artifact archive at the artifact's path inside an instance
    async fn put_artifact(&self, id: &str, artifact: &Artifact, archive: &[u8]) -> Result<()>;

    /// Package the artifact's path inside an instance into an archive
    async fn get_artifact(&self, id: &str, artifact: &Artifact) -> Result<Vec<u8>>;
}

/// Connect to the backend a playthrough selects
pub async fn connect(spec: &ProviderSpec, config: &Config) -> Result<Box<dyn InstanceProvider>> {
    match spec.kind {
        ProviderKind::Lxd => {
            let mut lxd_config = config.lxd.clone();
            if let Some(server) = &spec.options.image_server {
                lxd_config.image_server = server.clone();
            }
            if let Some(protocol) = &spec.options.image_protocol {
                lxd_config.image_protocol = protocol.clone();
            }
            let provider = LxdProvider::connect(lxd_config, &config.timeouts).await?;
            Ok(Box::new(provider))
        }
    }
}
