//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::{config_path, storage_dir};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Run cache settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// LXD backend settings
    #[serde(default)]
    pub lxd: LxdConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Run cache settings
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the artifact and instance stores
    #[serde(default = "storage_dir")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: storage_dir() }
    }
}

/// LXD backend settings
#[derive(Debug, Deserialize, Clone)]
pub struct LxdConfig {
    /// Path to the LXD control socket
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// Image server instances are provisioned from
    #[serde(default = "default_image_server")]
    pub image_server: String,

    /// Protocol spoken by the image server
    #[serde(default = "default_image_protocol")]
    pub image_protocol: String,

    /// Instance type to create ("container" or "virtual-machine")
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
}

impl Default for LxdConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            image_server: default_image_server(),
            image_protocol: default_image_protocol(),
            instance_type: default_instance_type(),
        }
    }
}

fn default_socket() -> PathBuf {
    PathBuf::from("/var/snap/lxd/common/lxd/unix.socket")
}
fn default_image_server() -> String {
    "https://cloud-images.ubuntu.com/releases".to_string()
}
fn default_image_protocol() -> String {
    "simplestreams".to_string()
}
fn default_instance_type() -> String {
    "container".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// How long to wait on a remote operation; -1 waits indefinitely
    #[serde(default = "default_operation")]
    pub operation_secs: i64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operation_secs: default_operation(),
        }
    }
}

fn default_operation() -> i64 {
    -1
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default config file is
    /// read if present and defaults are returned otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("no config file found, using preset defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.lxd.instance_type.as_str() {
            "container" | "virtual-machine" => {}
            other => {
                return Err(super::Error::Config(format!(
                    "lxd.instance_type must be 'container' or 'virtual-machine', not '{other}'"
                )))
            }
        }
        if self.timeouts.operation_secs < -1 {
            return Err(super::Error::Config(
                "timeouts.operation_secs must be -1 or a number of seconds".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.lxd.image_protocol, "simplestreams");
        assert_eq!(config.lxd.instance_type, "container");
        assert_eq!(config.timeouts.operation_secs, -1);
        assert!(config.storage.root.ends_with("storage"));
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = Config::parse(
            r#"
[storage]
root = "/tmp/gambol-storage"

[lxd]
socket = "/var/lib/lxd/unix.socket"

[timeouts]
operation_secs = 600
"#,
        )
        .unwrap();

        assert_eq!(config.storage.root, PathBuf::from("/tmp/gambol-storage"));
        assert_eq!(config.lxd.socket, PathBuf::from("/var/lib/lxd/unix.socket"));
        assert_eq!(
            config.lxd.image_server,
            "https://cloud-images.ubuntu.com/releases"
        );
        assert_eq!(config.timeouts.operation_secs, 600);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Config::parse("[timeouts]\noperation_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, crate::common::Error::ConfigParse(_)));
    }

    #[test]
    fn test_unknown_instance_type_is_rejected() {
        let err = Config::parse("[lxd]\ninstance_type = \"pod\"").unwrap_err();
        assert!(matches!(err, crate::common::Error::Config(_)));
        assert!(Config::parse("[lxd]\ninstance_type = \"virtual-machine\"").is_ok());
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/gambol.toml"))).unwrap_err();
        assert!(matches!(err, crate::common::Error::FileRead { .. }));
    }
}
