use hyper::{Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, Uri as UnixUri};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ControlPlaneError;

/// Firecracker API client for configuring a VM via HTTP over its Unix socket.
///
/// Every request dials `socket_path`; the URI host is only there to satisfy
/// the HTTP layer.
#[derive(Debug, Clone)]
pub struct FirecrackerClient {
    socket_path: PathBuf,
    client: Client<hyperlocal::UnixConnector>,
    /// Per-request timeout; `None` waits as long as Firecracker takes
    request_timeout: Option<Duration>,
}

impl FirecrackerClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            client: Client::unix(),
            request_timeout: None,
        }
    }

    /// Return a clone that gives up on requests after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            socket_path: self.socket_path.clone(),
            client: self.client.clone(),
            request_timeout: Some(timeout),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn uri(&self, path: &str) -> hyper::Uri {
        UnixUri::new(&self.socket_path, path).into()
    }

    /// PUT a JSON body; any 2xx is success, everything else is an error.
    async fn put<T: Serialize>(&self, path: &str, body: &T) -> Result<(), ControlPlaneError> {
        let json = serde_json::to_string(body).map_err(|source| ControlPlaneError::Encode {
            path: path.to_string(),
            source,
        })?;
        debug!(target: "firecracker", path, body = %json, "PUT");

        let req = Request::builder()
            .method(Method::PUT)
            .uri(self.uri(path))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(Body::from(json))
            .map_err(|source| ControlPlaneError::Request {
                path: path.to_string(),
                source,
            })?;

        let send = self.client.request(req);
        let result = match self.request_timeout {
            Some(after) => tokio::time::timeout(after, send)
                .await
                .map_err(|_| ControlPlaneError::Timeout {
                    path: path.to_string(),
                    after,
                })?,
            None => send.await,
        };
        let resp = result.map_err(|source| ControlPlaneError::Transport {
            path: path.to_string(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            // Firecracker puts a `fault_message` in the body; keep it for the operator
            let body = hyper::body::to_bytes(resp.into_body())
                .await
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            return Err(ControlPlaneError::Status {
                path: path.to_string(),
                status,
                body,
            });
        }
        Ok(())
    }

    /// Configure boot source (kernel, initrd, command line)
    pub async fn set_boot_source(&self, config: &BootSource) -> Result<(), ControlPlaneError> {
        self.put("/boot-source", config).await
    }

    /// Attach a block device
    pub async fn add_drive(&self, drive_id: &str, config: &Drive) -> Result<(), ControlPlaneError> {
        // The id becomes a path segment, so it must not need escaping
        if !is_valid_drive_id(drive_id) {
            return Err(ControlPlaneError::InvalidDriveId {
                drive_id: drive_id.to_string(),
            });
        }
        self.put(&format!("/drives/{}", drive_id), config).await
    }

    /// Attach the vsock device backed by a host Unix socket
    pub async fn set_vsock(&self, config: &Vsock) -> Result<(), ControlPlaneError> {
        self.put("/vsock", config).await
    }

    /// Perform an instance action (InstanceStart, ...)
    pub async fn put_action(&self, action: &InstanceAction) -> Result<(), ControlPlaneError> {
        self.put("/actions", action).await
    }
}

/// Firecracker drive ids are non-empty and limited to `[A-Za-z0-9_]`.
pub fn is_valid_drive_id(drive_id: &str) -> bool {
    !drive_id.is_empty()
        && drive_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// API data structures

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootSource {
    pub kernel_image_path: String,
    pub boot_args: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initrd_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Drive {
    pub drive_id: String,
    pub path_on_host: String,
    pub is_read_only: bool,
    pub is_root_device: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vsock {
    /// Guest CID (must be > 2, typically 3)
    pub guest_cid: u32,
    /// Path to Unix socket on host
    pub uds_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action_type")]
pub enum InstanceAction {
    InstanceStart,
}
