//! Act scheduling
//!
//! Acts run one at a time in declaration order. Each act resolves its
//! instance, pushes its inputs, runs its scenes, pulls its outputs and stops
//! the instance. The first failure ends the run. Whatever happened, every
//! instance the run created is destroyed afterwards; the run cache is only
//! flushed when both the acts and the teardown succeeded.

mod queue;
pub mod transfer;

pub use queue::WorkQueue;

use crate::artifact::Artifact;
use crate::cache::RunCache;
use crate::common::{Error, Result};
use crate::playthrough::{Act, Playthrough};
use crate::provider::InstanceProvider;

/// What a finished act did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActReport {
    pub id: String,
    pub name: String,
    /// Instance the act ran in
    pub instance: String,
    /// Whether the instance was created by this act rather than reused
    pub created: bool,
    pub scenes: usize,
    pub inputs: usize,
    pub outputs: usize,
}

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub name: String,
    pub run_id: String,
    pub acts: Vec<ActReport>,
    /// Instances torn down at the end of the run
    pub destroyed: Vec<String>,
}

/// Drives acts against one provider and one run cache
pub struct Scheduler<'a> {
    provider: &'a dyn InstanceProvider,
    cache: &'a RunCache,
}

impl<'a> Scheduler<'a> {
    pub fn new(provider: &'a dyn InstanceProvider, cache: &'a RunCache) -> Self {
        Self { provider, cache }
    }

    /// Run acts until the queue is empty or one fails
    pub async fn run_queue(&self, queue: &mut WorkQueue) -> Result<Vec<ActReport>> {
        let mut reports = Vec::with_capacity(queue.len());
        loop {
            let act = match queue.pop() {
                Ok(act) => act,
                Err(Error::EmptyQueue) => break,
                Err(e) => return Err(e),
            };
            reports.push(self.run_act(&act).await?);
        }
        Ok(reports)
    }

    /// Run a single act to completion
    pub async fn run_act(&self, act: &Act) -> Result<ActReport> {
        tracing::info!(act = %act.id, name = %act.name, run_on = %act.run_on, "Starting act");

        let (instance, created) = self
            .resolve_instance(act)
            .await
            .map_err(|e| e.in_act(&act.name, "provisioning"))?;

        for artifact in &act.input {
            transfer::push(self.provider, self.cache, &instance, artifact)
                .await
                .map_err(|e| e.in_act(&act.name, format!("input '{}'", label(artifact))))?;
        }

        for scene in &act.scenes {
            tracing::info!(act = %act.id, scene = %scene.name, instance = %instance, "Running scene");
            self.provider
                .exec(&instance, &scene.run)
                .await
                .map_err(|e| e.in_act(&act.name, format!("scene '{}'", scene.name)))?;
        }

        for artifact in &act.output {
            transfer::pull(self.provider, self.cache, &instance, artifact)
                .await
                .map_err(|e| e.in_act(&act.name, format!("output '{}'", label(artifact))))?;
        }

        if act.keep_alive {
            tracing::debug!(act = %act.id, instance = %instance, "keeping instance alive");
        } else {
            self.provider
                .stop(&instance)
                .await
                .map_err(|e| e.in_act(&act.name, "stop"))?;
        }

        tracing::info!(act = %act.id, instance = %instance, "Act complete");
        Ok(ActReport {
            id: act.id.clone(),
            name: act.name.clone(),
            instance,
            created,
            scenes: act.scenes.len(),
            inputs: act.input.len(),
            outputs: act.output.len(),
        })
    }

    /// Find or create the instance an act runs in
    ///
    /// Returns the instance id and whether it was created. An existing
    /// instance named by `run-on` is reused, started if it was stopped and
    /// given the staging layout it may not have yet.
    /// Otherwise a new instance named after the act is provisioned from the
    /// `run-on` image. Its id is recorded before creation starts, so a
    /// failed or interrupted creation still gets cleaned up.
    pub async fn resolve_instance(&self, act: &Act) -> Result<(String, bool)> {
        if self.provider.exists(&act.run_on).await? {
            if !self.provider.is_active(&act.run_on).await? {
                tracing::info!(act = %act.id, instance = %act.run_on, "Starting stopped instance");
                self.provider.start(&act.run_on).await?;
            }
            self.provider.prepare(&act.run_on).await?;
            tracing::info!(act = %act.id, instance = %act.run_on, "Reusing instance");
            return Ok((act.run_on.clone(), false));
        }

        if self.provider.exists(&act.id).await? {
            return Err(Error::provider(
                "create",
                format!(
                    "instance '{}' already exists but '{}' is not an instance",
                    act.id, act.run_on
                ),
            ));
        }

        self.cache.add_instance_id(&act.id)?;
        self.provider.create(&act.id, &act.run_on).await?;
        tracing::info!(act = %act.id, instance = %act.id, image = %act.run_on, "Created instance");
        Ok((act.id.clone(), true))
    }

    /// Destroy every instance recorded in the run cache
    pub async fn cleanup(&self) -> Result<Vec<String>> {
        let ids = self.cache.instance_ids()?;
        tracing::debug!(run_id = %self.cache.run_id(), instances = ?ids, "cleaning up");
        self.provider.destroy(&ids).await?;
        Ok(ids)
    }
}

/// Run a playthrough from start to finish
///
/// Cleanup runs whether or not the acts succeed. A cleanup failure is
/// reported together with the act failure that preceded it, if any.
pub async fn run(
    playthrough: &Playthrough,
    provider: &dyn InstanceProvider,
    cache: RunCache,
) -> Result<RunReport> {
    let run_id = cache.run_id().to_string();
    tracing::info!(
        run_id = %run_id,
        playthrough = %playthrough.name,
        provider = provider.name(),
        acts = playthrough.acts.len(),
        "Starting run"
    );

    let scheduler = Scheduler::new(provider, &cache);
    let mut queue = WorkQueue::new(playthrough.acts.iter().cloned());
    let outcome = scheduler.run_queue(&mut queue).await;
    let cleanup = scheduler.cleanup().await;

    match (outcome, cleanup) {
        (Ok(acts), Ok(destroyed)) => {
            cache.flush()?;
            tracing::info!(run_id = %run_id, "Run complete");
            Ok(RunReport {
                name: playthrough.name.clone(),
                run_id,
                acts,
                destroyed,
            })
        }
        (Err(run_error), Ok(_)) => {
            tracing::warn!(run_id = %run_id, "Run failed, keeping run cache");
            Err(run_error)
        }
        (outcome, Err(cleanup_error)) => {
            tracing::error!(run_id = %run_id, error = %cleanup_error, "Cleanup failed");
            Err(Error::Cleanup {
                source: Box::new(cleanup_error),
                run_error: outcome.err().map(Box::new),
            })
        }
    }
}

/// Tear down what an earlier run left behind
///
/// Destroys the run's recorded instances and flushes its cache. Returns the
/// ids that were recorded.
pub async fn recover(provider: &dyn InstanceProvider, cache: RunCache) -> Result<Vec<String>> {
    let destroyed = Scheduler::new(provider, &cache).cleanup().await?;
    let run_id = cache.run_id().to_string();
    cache.flush()?;
    tracing::info!(run_id = %run_id, instances = destroyed.len(), "Recovered run");
    Ok(destroyed)
}

fn label(artifact: &Artifact) -> String {
    artifact.name().unwrap_or_else(|_| artifact.path.clone())
}
