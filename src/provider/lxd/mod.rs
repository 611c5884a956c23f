//! LXD backend
//!
//! Talks to the LXD daemon over its local control socket. Instances are
//! created from images on the configured image server and addressed by the
//! act id that created them.

mod client;
mod codec;
pub mod types;

pub use client::LxdClient;

use async_trait::async_trait;

use crate::artifact::Artifact;
use crate::common::config::{LxdConfig, Timeouts};
use crate::common::{Error, Result};
use crate::provider::staging::{transfer_token, Staging};
use crate::provider::{InstanceProvider, InstanceStatus};

use types::{ExecResult, InstanceSource, InstancesPost};

/// Number of stderr lines echoed when a script fails
const STDERR_TAIL_LINES: usize = 20;

/// Instance provider backed by an LXD daemon
pub struct LxdProvider {
    client: LxdClient,
    config: LxdConfig,
    staging: Staging,
}

impl LxdProvider {
    /// Connect to the daemon and check that it answers
    pub async fn connect(config: LxdConfig, timeouts: &Timeouts) -> Result<Self> {
        let client = LxdClient::new(&config.socket, timeouts.operation_secs);
        let info = client.server_info().await?;
        tracing::debug!(
            socket = %config.socket.display(),
            api = %info.get("api_version").and_then(|v| v.as_str()).unwrap_or("unknown"),
            "Connected to LXD"
        );

        Ok(Self {
            client,
            config,
            staging: Staging::default(),
        })
    }

    /// Run a command and collect its recorded output
    async fn run(&self, id: &str, command: Vec<String>) -> Result<ExecResult> {
        let result = self.client.exec(id, command).await?;

        if let Some(url) = result.stdout_log() {
            match self.client.get_raw("read stdout", url).await {
                Ok(stdout) => {
                    for line in String::from_utf8_lossy(&stdout).lines() {
                        tracing::debug!(instance = %id, "{}", line);
                    }
                }
                Err(e) => tracing::debug!(instance = %id, error = %e, "stdout unavailable"),
            }
        }

        if result.return_code != 0 {
            if let Some(url) = result.stderr_log() {
                if let Ok(stderr) = self.client.get_raw("read stderr", url).await {
                    let stderr = String::from_utf8_lossy(&stderr);
                    let lines: Vec<&str> = stderr.lines().collect();
                    let tail = lines.len().saturating_sub(STDERR_TAIL_LINES);
                    for line in &lines[tail..] {
                        tracing::warn!(instance = %id, "{}", line);
                    }
                }
            }
        }

        Ok(result)
    }

    /// Run a generated shell script, failing on a non-zero exit
    async fn run_script(&self, id: &str, operation: &str, script: String) -> Result<()> {
        let command = vec!["sh".to_string(), "-c".to_string(), script];
        let result = self.run(id, command).await?;
        if result.return_code != 0 {
            return Err(Error::provider(
                operation,
                format!("script exited with status {} in '{}'", result.return_code, id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl InstanceProvider for LxdProvider {
    fn name(&self) -> &str {
        "lxd"
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let names = self.client.instance_names(&self.config.instance_type).await?;
        Ok(names.iter().any(|name| name == id))
    }

    async fn status(&self, id: &str) -> Result<InstanceStatus> {
        Ok(self.client.instance_state(id).await?.lifecycle())
    }

    async fn create(&self, id: &str, image: &str) -> Result<()> {
        tracing::info!(
            instance = %id,
            image = %image,
            server = %self.config.image_server,
            "Creating instance"
        );
        let request = InstancesPost {
            name: id.to_string(),
            instance_type: self.config.instance_type.clone(),
            source: InstanceSource {
                kind: "image".to_string(),
                protocol: self.config.image_protocol.clone(),
                server: self.config.image_server.clone(),
                alias: image.to_string(),
            },
        };
        self.client.create_instance(&request).await?;
        self.start(id).await?;
        self.prepare(id).await
    }

    async fn prepare(&self, id: &str) -> Result<()> {
        let prepared = self.run(id, self.staging.prepare_command()).await?;
        if prepared.return_code != 0 {
            return Err(Error::provider(
                "prepare staging",
                format!("mkdir exited with status {} in '{}'", prepared.return_code, id),
            ));
        }
        tracing::debug!(instance = %id, "Staging prepared");
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<()> {
        tracing::debug!(instance = %id, "Starting instance");
        self.client.update_instance_state(id, "start").await
    }

    async fn stop(&self, id: &str) -> Result<()> {
        tracing::debug!(instance = %id, "Stopping instance");
        self.client.update_instance_state(id, "stop").await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.client.delete_instance(id).await
    }

    async fn exec(&self, id: &str, script: &str) -> Result<()> {
        let script_path = self.staging.script_path();
        self.client
            .push_file(id, &script_path, script.as_bytes())
            .await?;

        let result = self
            .run(id, vec!["bash".to_string(), script_path])
            .await?;
        if result.return_code != 0 {
            return Err(Error::SceneFailed {
                instance: id.to_string(),
                code: result.return_code,
            });
        }
        Ok(())
    }

    async fn put_artifact(&self, id: &str, artifact: &Artifact, archive: &[u8]) -> Result<()> {
        let kind = artifact.kind_of(archive)?;
        let token = transfer_token();

        self.client
            .push_file(id, &self.staging.inbound_archive(&token), archive)
            .await?;
        let script = self.staging.unpack_script(kind, &token, &artifact.path);
        self.run_script(id, "unpack artifact", script).await
    }

    async fn get_artifact(&self, id: &str, artifact: &Artifact) -> Result<Vec<u8>> {
        let token = transfer_token();

        let script = self.staging.pack_script(&token, &artifact.path);
        self.run_script(id, "pack artifact", script).await?;

        let archive = self
            .client
            .pull_file(id, &self.staging.outbound_archive(&token))
            .await?;
        self.run_script(id, "discard archive", self.staging.discard_script(&token))
            .await?;

        artifact.kind_of(&archive)?;
        Ok(archive)
    }
}
