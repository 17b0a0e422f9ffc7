use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Prefix for per-run directories under the system temp dir
const RUN_DIR_PREFIX: &str = "vmrun-";

/// Control-plane socket file name inside the run directory
const API_SOCKET_NAME: &str = "firecracker-api.sock";

/// Base vsock socket file name inside the run directory
const VSOCK_SOCKET_NAME: &str = "v.sock";

/// Private directory holding the sockets of one run.
///
/// The directory and everything in it is removed when this value is
/// dropped, on success and error paths alike.
#[derive(Debug)]
pub struct RunDir {
    dir: TempDir,
}

impl RunDir {
    /// Create a fresh run directory under the system temp dir
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(RUN_DIR_PREFIX).tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path Firecracker binds its HTTP API to (`--api-sock`)
    pub fn api_socket(&self) -> PathBuf {
        self.path().join(API_SOCKET_NAME)
    }

    /// Base path handed to Firecracker as the vsock `uds_path`
    pub fn vsock_socket(&self) -> PathBuf {
        self.path().join(VSOCK_SOCKET_NAME)
    }
}

/// Host listener path for guest-initiated vsock connections.
///
/// When the guest connects to CID 2 on `port`, Firecracker forwards the
/// connection to `{uds_path}_{port}` on the host.
pub fn vsock_listener_path(uds_path: &Path, port: u32) -> PathBuf {
    PathBuf::from(format!("{}_{}", uds_path.display(), port))
}
