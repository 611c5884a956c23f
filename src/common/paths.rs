//! Configuration and storage locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/gambol/` and `~/.local/share/gambol/`
//! - macOS: `~/Library/Application Support/gambol/`

use std::path::PathBuf;

/// Application name used for every platform directory
const APP_NAME: &str = "gambol";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Default root for run-scoped storage
pub fn storage_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("storage"))
        .unwrap_or_else(|| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".gambol")
                .join("storage")
        })
}
