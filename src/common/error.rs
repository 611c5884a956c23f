//! Error types for gambol
//!
//! Every failure at or below the act level propagates to the run; the only
//! place two errors meet is end-of-run cleanup, which keeps both.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gambol
#[derive(Error, Debug)]
pub enum Error {
    // === Playthrough Errors ===
    #[error("Playthrough file '{}' does not exist or is unreadable", path.display())]
    PlaythroughNotFound { path: PathBuf },

    #[error("Failed to load playthrough '{}': {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    // === Artifact Errors ===
    #[error("Artifact for '{path}' is ambiguous: {reason}")]
    AmbiguousArtifact { path: String, reason: String },

    #[error("Artifact '{0}' is empty")]
    EmptyArtifact(String),

    // === Provider Errors ===
    #[error("Provider call '{operation}' failed: {message}")]
    Provider { operation: String, message: String },

    #[error("Instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("Script in instance '{instance}' exited with status {code}")]
    SceneFailed { instance: String, code: i64 },

    // === Cache Errors ===
    #[error("Artifact '{0}' not found in cache")]
    ArtifactNotFound(String),

    #[error("Run storage at '{}' is unavailable: {reason}", path.display())]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error("Run storage error: {0}")]
    Storage(String),

    // === Scheduling Errors ===
    #[error("No acts in work queue")]
    EmptyQueue,

    #[error("Act '{act}' failed during {stage}: {source}")]
    Act {
        act: String,
        stage: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{}", cleanup_message(source, run_error.as_deref()))]
    Cleanup {
        #[source]
        source: Box<Error>,
        run_error: Option<Box<Error>>,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn cleanup_message(source: &Error, run_error: Option<&Error>) -> String {
    match run_error {
        Some(run) => format!("{run}; cleanup also failed: {source}"),
        None => format!("Cleanup failed: {source}"),
    }
}

impl Error {
    /// Create a provider error for a named remote operation
    pub fn provider<S: ToString>(operation: &str, message: S) -> Self {
        Self::Provider {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an ambiguous artifact error
    pub fn ambiguous_artifact(path: &str, reason: &str) -> Self {
        Self::AmbiguousArtifact {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a load error for a playthrough file
    pub fn load<S: ToString>(path: impl Into<PathBuf>, reason: S) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap an error with the act and stage it happened in
    pub fn in_act(self, act: &str, stage: impl Into<String>) -> Self {
        Self::Act {
            act: act.to_string(),
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through act context
    ///
    /// A cleanup failure reports the run error when there was one, since that
    /// is the failure that stopped the playthrough.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Act { source, .. } => source.root_cause(),
            Error::Cleanup {
                run_error: Some(run),
                ..
            } => run.root_cause(),
            other => other,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::PlaythroughNotFound { .. } => 2,
            _ => 1,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_act_context() {
        let err = Error::SceneFailed {
            instance: "a".to_string(),
            code: 1,
        }
        .in_act("Act A", "scene 'build'");

        assert!(matches!(err.root_cause(), Error::SceneFailed { code: 1, .. }));
        assert_eq!(
            err.to_string(),
            "Act 'Act A' failed during scene 'build': Script in instance 'a' exited with status 1"
        );
    }

    #[test]
    fn test_cleanup_keeps_run_error() {
        let err = Error::Cleanup {
            source: Box::new(Error::provider("delete", "boom")),
            run_error: Some(Box::new(Error::ArtifactNotFound("logs".to_string()))),
        };

        let message = err.to_string();
        assert!(message.contains("Artifact 'logs' not found in cache"));
        assert!(message.contains("cleanup also failed"));
        assert!(matches!(err.root_cause(), Error::ArtifactNotFound(_)));
    }

    #[test]
    fn test_exit_codes() {
        let missing = Error::PlaythroughNotFound {
            path: PathBuf::from("nope.yaml"),
        };
        assert_eq!(missing.exit_code(), 2);
        assert_eq!(Error::EmptyArtifact("x".to_string()).exit_code(), 1);
    }
}
