//! LXD REST API types
//!
//! Only the fields gambol reads or sends are modelled.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::provider::InstanceStatus;

/// Status codes shared by instances and operations
pub mod status_code {
    pub const STOPPED: i64 = 102;
    pub const RUNNING: i64 = 103;
    pub const ERROR: i64 = 112;
    pub const SUCCESS: i64 = 200;
}

/// Envelope wrapping every JSON response
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// "sync", "async" or "error"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status_code: i64,
    /// Operation URL for async responses
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub metadata: Value,
}

impl Envelope {
    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    pub fn is_async(&self) -> bool {
        self.kind == "async"
    }
}

/// Background operation
#[derive(Debug, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub status_code: i64,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Operation {
    pub fn succeeded(&self) -> bool {
        self.status_code == status_code::SUCCESS && self.err.is_empty()
    }
}

/// Result metadata of a finished exec operation
#[derive(Debug, Deserialize, Default)]
pub struct ExecResult {
    #[serde(rename = "return", default)]
    pub return_code: i64,
    /// Log file URLs keyed by file descriptor ("1" stdout, "2" stderr)
    #[serde(default)]
    pub output: HashMap<String, String>,
}

impl ExecResult {
    pub fn stdout_log(&self) -> Option<&str> {
        self.output.get("1").map(String::as_str)
    }

    pub fn stderr_log(&self) -> Option<&str> {
        self.output.get("2").map(String::as_str)
    }
}

/// Runtime state of an instance
#[derive(Debug, Deserialize)]
pub struct InstanceState {
    #[serde(default)]
    pub status: String,
    pub status_code: i64,
}

impl InstanceState {
    pub fn lifecycle(&self) -> InstanceStatus {
        match self.status_code {
            status_code::RUNNING => InstanceStatus::Running,
            status_code::STOPPED => InstanceStatus::Stopped,
            status_code::ERROR => InstanceStatus::Error,
            _ => InstanceStatus::Transitioning,
        }
    }
}

/// Body of `POST /1.0/instances`
#[derive(Debug, Serialize)]
pub struct InstancesPost {
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub source: InstanceSource,
}

/// Image an instance is created from
#[derive(Debug, Serialize)]
pub struct InstanceSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub protocol: String,
    pub server: String,
    pub alias: String,
}

/// Body of `PUT /1.0/instances/<name>/state`
#[derive(Debug, Serialize)]
pub struct InstanceStatePut {
    pub action: String,
    /// Seconds to wait for the change, -1 to wait indefinitely
    pub timeout: i64,
    pub force: bool,
}

/// Body of `POST /1.0/instances/<name>/exec`
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceExecPost {
    pub command: Vec<String>,
    pub environment: HashMap<String, String>,
    pub interactive: bool,
    pub wait_for_websocket: bool,
    pub record_output: bool,
}

impl InstanceExecPost {
    /// Non-interactive command with recorded output
    pub fn recorded(command: Vec<String>) -> Self {
        Self {
            command,
            environment: HashMap::new(),
            interactive: false,
            wait_for_websocket: false,
            record_output: true,
        }
    }
}

/// Instance name from an instance URL such as `/1.0/instances/web?project=x`
pub fn instance_name_from_url(url: &str) -> &str {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}
