//! LXD REST client over the local control socket

use std::path::{Path, PathBuf};

use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::GenericFilePath;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::Value;
use tokio::io::BufReader;

use crate::common::{Error, Result};

use super::codec::{self, HttpResponse};
use super::types::{
    instance_name_from_url, Envelope, ExecResult, InstanceExecPost, InstanceState,
    InstanceStatePut, InstancesPost, Operation,
};

/// Client for one LXD daemon
#[derive(Debug, Clone)]
pub struct LxdClient {
    socket: PathBuf,
    /// Seconds to wait on background operations, -1 for no limit
    operation_timeout: i64,
}

impl LxdClient {
    pub fn new(socket: &Path, operation_timeout: i64) -> Self {
        Self {
            socket: socket.to_path_buf(),
            operation_timeout,
        }
    }

    async fn connect(&self) -> Result<Stream> {
        let name = self
            .socket
            .as_path()
            .to_fs_name::<GenericFilePath>()
            .map_err(|e| Error::provider("connect", e))?;
        Stream::connect(name).await.map_err(|e| {
            Error::provider(
                "connect",
                format!("{} ({})", e, self.socket.display()),
            )
        })
    }

    /// Send one request on a fresh connection
    async fn send(
        &self,
        method: &str,
        target: &str,
        headers: &[(&str, String)],
        body: &[u8],
    ) -> Result<HttpResponse> {
        tracing::debug!(method, target, bytes = body.len(), "LXD request");
        let stream = self.connect().await?;
        let (reader, mut writer) = tokio::io::split(stream);

        codec::write_request(&mut writer, method, target, headers, body).await?;
        let response = codec::read_response(&mut BufReader::new(reader)).await?;

        tracing::debug!(method, target, status = response.status, "LXD response");
        Ok(response)
    }

    /// Send a JSON request and decode the response envelope
    async fn request<B: Serialize>(
        &self,
        operation: &str,
        method: &str,
        target: &str,
        body: Option<&B>,
    ) -> Result<Envelope> {
        let (headers, payload) = match body {
            Some(body) => (
                vec![("Content-Type", "application/json".to_string())],
                serde_json::to_vec(body)?,
            ),
            None => (Vec::new(), Vec::new()),
        };
        let response = self.send(method, target, &headers, &payload).await?;
        decode_envelope(operation, &response)
    }

    async fn get(&self, operation: &str, target: &str) -> Result<Envelope> {
        self.request::<()>(operation, "GET", target, None).await
    }

    /// Wait for the background operation behind an async response
    async fn wait(&self, operation: &str, envelope: Envelope) -> Result<Option<Value>> {
        if !envelope.is_async() {
            return Ok(Some(envelope.metadata));
        }

        let target = format!(
            "{}/wait?timeout={}",
            envelope.operation, self.operation_timeout
        );
        let waited = self.get(operation, &target).await?;
        let op: Operation = serde_json::from_value(waited.metadata)?;

        if op.succeeded() {
            Ok(op.metadata)
        } else if op.err.is_empty() {
            Err(Error::provider(
                operation,
                format!("operation {} ended as '{}'", op.id, op.status),
            ))
        } else {
            Err(Error::provider(operation, op.err))
        }
    }

    /// Check that the daemon answers
    pub async fn server_info(&self) -> Result<Value> {
        Ok(self.get("server info", "/1.0").await?.metadata)
    }

    /// Names of all instances of a type
    pub async fn instance_names(&self, instance_type: &str) -> Result<Vec<String>> {
        let target = format!("/1.0/instances?instance-type={}", encode(instance_type));
        let envelope = self.get("list instances", &target).await?;
        let urls: Vec<String> = serde_json::from_value(envelope.metadata)?;
        Ok(urls
            .iter()
            .map(|url| instance_name_from_url(url).to_string())
            .collect())
    }

    pub async fn instance_state(&self, name: &str) -> Result<InstanceState> {
        let target = format!("/1.0/instances/{}/state", encode(name));
        let envelope = self.get("instance state", &target).await.map_err(|e| {
            not_found_as(e, name)
        })?;
        Ok(serde_json::from_value(envelope.metadata)?)
    }

    pub async fn create_instance(&self, request: &InstancesPost) -> Result<()> {
        let envelope = self
            .request("create instance", "POST", "/1.0/instances", Some(request))
            .await?;
        self.wait("create instance", envelope).await?;
        Ok(())
    }

    /// Start or stop an instance and wait for the change
    pub async fn update_instance_state(&self, name: &str, action: &str) -> Result<()> {
        let operation = format!("{action} instance");
        let target = format!("/1.0/instances/{}/state", encode(name));
        let body = InstanceStatePut {
            action: action.to_string(),
            timeout: -1,
            force: false,
        };
        let envelope = self
            .request(&operation, "PUT", &target, Some(&body))
            .await
            .map_err(|e| not_found_as(e, name))?;
        self.wait(&operation, envelope).await?;
        Ok(())
    }

    pub async fn delete_instance(&self, name: &str) -> Result<()> {
        let target = format!("/1.0/instances/{}", encode(name));
        let envelope = self
            .request::<()>("delete instance", "DELETE", &target, None)
            .await
            .map_err(|e| not_found_as(e, name))?;
        self.wait("delete instance", envelope).await?;
        Ok(())
    }

    /// Run a command and wait for it to exit
    pub async fn exec(&self, name: &str, command: Vec<String>) -> Result<ExecResult> {
        let target = format!("/1.0/instances/{}/exec", encode(name));
        let body = InstanceExecPost::recorded(command);
        let envelope = self
            .request("exec", "POST", &target, Some(&body))
            .await
            .map_err(|e| not_found_as(e, name))?;
        let metadata = self.wait("exec", envelope).await?;
        match metadata {
            Some(metadata) if !metadata.is_null() => Ok(serde_json::from_value(metadata)?),
            _ => Ok(ExecResult::default()),
        }
    }

    /// Write a file at an absolute path inside an instance
    pub async fn push_file(&self, name: &str, path: &str, content: &[u8]) -> Result<()> {
        let target = format!("/1.0/instances/{}/files?path={}", encode(name), encode(path));
        let headers = [
            ("Content-Type", "application/octet-stream".to_string()),
            ("X-LXD-type", "file".to_string()),
            ("X-LXD-write", "overwrite".to_string()),
        ];
        let response = self.send("POST", &target, &headers, content).await?;
        decode_envelope("push file", &response)?;
        Ok(())
    }

    /// Read a file at an absolute path inside an instance
    pub async fn pull_file(&self, name: &str, path: &str) -> Result<Vec<u8>> {
        let target = format!("/1.0/instances/{}/files?path={}", encode(name), encode(path));
        self.get_raw("pull file", &target).await
    }

    /// Fetch a raw resource such as a file or an exec log
    pub async fn get_raw(&self, operation: &str, target: &str) -> Result<Vec<u8>> {
        let response = self.send("GET", target, &[], &[]).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(decode_envelope(operation, &response)
                .err()
                .unwrap_or_else(|| {
                    Error::provider(operation, format!("HTTP status {}", response.status))
                }))
        }
    }
}

/// Decode a JSON envelope, turning LXD errors into provider errors
fn decode_envelope(operation: &str, response: &HttpResponse) -> Result<Envelope> {
    let envelope: Envelope = serde_json::from_slice(&response.body).map_err(|e| {
        Error::provider(
            operation,
            format!("HTTP status {} with undecodable body: {}", response.status, e),
        )
    })?;

    if envelope.is_error() || !response.is_success() {
        let code = if envelope.error_code != 0 {
            envelope.error_code
        } else {
            response.status as i64
        };
        return Err(Error::Provider {
            operation: operation.to_string(),
            message: format!("{} (status {})", envelope.error, code),
        });
    }
    Ok(envelope)
}

/// Report a 404 from an instance endpoint as a missing instance
fn not_found_as(error: Error, name: &str) -> Error {
    match &error {
        Error::Provider { message, .. } if message.ends_with("(status 404)") => {
            Error::InstanceNotFound(name.to_string())
        }
        _ => error,
    }
}

/// Everything except RFC 3986 unreserved characters
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a path segment or query value
fn encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}
