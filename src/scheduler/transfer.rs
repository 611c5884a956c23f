//! Moving artifacts between host, run cache and instances

use crate::artifact::{Artifact, ArtifactSource};
use crate::cache::RunCache;
use crate::common::Result;
use crate::provider::InstanceProvider;

/// Copy an artifact from the host or the cache into an instance
pub async fn push(
    provider: &dyn InstanceProvider,
    cache: &RunCache,
    instance: &str,
    artifact: &Artifact,
) -> Result<()> {
    let archive = match artifact.source()? {
        ArtifactSource::Host(_) => artifact.wrap()?,
        ArtifactSource::Cache(key) => cache.get_artifact(key)?,
    };

    tracing::debug!(
        instance,
        artifact = %artifact.name()?,
        path = %artifact.path,
        bytes = archive.len(),
        "pushing artifact"
    );
    provider.put_artifact(instance, artifact, &archive).await
}

/// Copy an artifact out of an instance into the cache or onto the host
pub async fn pull(
    provider: &dyn InstanceProvider,
    cache: &RunCache,
    instance: &str,
    artifact: &Artifact,
) -> Result<()> {
    // Resolve before any remote call so an ambiguous artifact fails fast
    let source = artifact.source()?;
    let archive = provider.get_artifact(instance, artifact).await?;

    tracing::debug!(
        instance,
        artifact = %artifact.name()?,
        path = %artifact.path,
        bytes = archive.len(),
        "pulled artifact"
    );
    match source {
        ArtifactSource::Cache(key) => cache.put_artifact(key, &archive),
        ArtifactSource::Host(_) => artifact.unwrap_onto_host(&archive),
    }
}
