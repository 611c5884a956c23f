//! Artifacts moved between host, run cache and instances
//!
//! An artifact names exactly one outside location, either a cache key or a
//! host path, plus the path it occupies inside the instance. Which one is set
//! is only checked when the artifact is first used.

pub mod codec;

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

pub use codec::ArtifactKind;

/// A file or directory transfer unit
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Artifact {
    /// Key for storing or retrieving the artifact in the run cache
    #[serde(default)]
    pub key: Option<String>,

    /// Location of the artifact on the host
    #[serde(default)]
    pub host_path: Option<PathBuf>,

    /// Location of the artifact inside the instance
    pub path: String,
}

/// Where an artifact lives outside the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource<'a> {
    /// Run cache entry
    Cache(&'a str),
    /// Host filesystem path
    Host(&'a Path),
}

impl Artifact {
    /// Artifact addressed by cache key
    pub fn cached(key: &str, path: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            host_path: None,
            path: path.to_string(),
        }
    }

    /// Artifact addressed by host path
    pub fn host(host_path: impl Into<PathBuf>, path: &str) -> Self {
        Self {
            key: None,
            host_path: Some(host_path.into()),
            path: path.to_string(),
        }
    }

    /// Resolve the outside location of this artifact
    pub fn source(&self) -> Result<ArtifactSource<'_>> {
        match (self.key.as_deref(), self.host_path.as_deref()) {
            (Some(_), Some(_)) => Err(Error::ambiguous_artifact(
                &self.path,
                "only one of 'key' or 'host-path' may be set",
            )),
            (None, None) => Err(Error::ambiguous_artifact(
                &self.path,
                "one of 'key' or 'host-path' must be set",
            )),
            (Some(key), None) => Ok(ArtifactSource::Cache(key)),
            (None, Some(host_path)) => Ok(ArtifactSource::Host(host_path)),
        }
    }

    /// Name used in diagnostics: the cache key or the host path
    pub fn name(&self) -> Result<String> {
        Ok(match self.source()? {
            ArtifactSource::Cache(key) => key.to_string(),
            ArtifactSource::Host(path) => path.display().to_string(),
        })
    }

    /// Package the host path of this artifact into an archive
    pub fn wrap(&self) -> Result<Vec<u8>> {
        match self.source()? {
            ArtifactSource::Host(path) => codec::pack(path),
            ArtifactSource::Cache(key) => Err(Error::ambiguous_artifact(
                &self.path,
                &format!("cache artifact '{key}' has no host path to package"),
            )),
        }
    }

    /// Unpack an archive onto the host path of this artifact
    pub fn unwrap_onto_host(&self, archive: &[u8]) -> Result<()> {
        let name = self.name()?;
        match self.source()? {
            ArtifactSource::Host(path) => codec::unpack(&name, archive, path),
            ArtifactSource::Cache(key) => Err(Error::ambiguous_artifact(
                &self.path,
                &format!("cache artifact '{key}' has no host path to unpack onto"),
            )),
        }
    }

    /// Classify an archive of this artifact as a file or a directory
    pub fn kind_of(&self, archive: &[u8]) -> Result<ArtifactKind> {
        codec::probe(&self.name()?, archive)
    }

    /// Make a relative host path absolute against `base`
    pub fn resolve_host_path(&mut self, base: &Path) {
        if let Some(host_path) = &self.host_path {
            if host_path.is_relative() {
                self.host_path = Some(base.join(host_path));
            }
        }
    }
}
