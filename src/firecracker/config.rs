//! Device configuration for the VM.
//!
//! These are the host-side descriptions of what Firecracker receives; each
//! one is turned into its API body exactly once per run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::api;

/// Kernel boot arguments the guest image expects
pub const DEFAULT_BOOT_ARGS: &str = "console=ttyS0 reboot=k panic=-1 quiet";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootSourceConfig {
    pub kernel_image_path: PathBuf,
    pub boot_args: String,
    pub initrd_path: Option<PathBuf>,
}

impl Default for BootSourceConfig {
    fn default() -> Self {
        Self {
            kernel_image_path: PathBuf::from("./crack/vmlinux"),
            boot_args: DEFAULT_BOOT_ARGS.to_string(),
            initrd_path: Some(PathBuf::from("./crack/bootstrap.cpio")),
        }
    }
}

impl BootSourceConfig {
    pub fn to_api(&self) -> api::BootSource {
        api::BootSource {
            kernel_image_path: self.kernel_image_path.display().to_string(),
            boot_args: self.boot_args.clone(),
            initrd_path: self.initrd_path.as_ref().map(|p| p.display().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriveConfig {
    pub drive_id: String,
    pub path_on_host: PathBuf,
    pub is_read_only: bool,
    pub is_root_device: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        // Booted from the initrd, so the image is attached as a plain data disk
        Self {
            drive_id: "root".to_string(),
            path_on_host: PathBuf::from("./crack/postgres16-1.erofs"),
            is_read_only: true,
            is_root_device: false,
        }
    }
}

impl DriveConfig {
    pub fn to_api(&self) -> api::Drive {
        api::Drive {
            drive_id: self.drive_id.clone(),
            path_on_host: self.path_on_host.display().to_string(),
            is_read_only: self.is_read_only,
            is_root_device: self.is_root_device,
        }
    }
}

/// Vsock settings; the socket path itself is per-run and supplied later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SideChannelConfig {
    /// Guest CID (must be > 2)
    pub guest_cid: u32,
    /// Guest port the guest agent dials on the host (CID 2)
    pub port: u32,
}

impl Default for SideChannelConfig {
    fn default() -> Self {
        Self {
            guest_cid: 3,
            port: 1,
        }
    }
}

impl SideChannelConfig {
    pub fn to_api(&self, uds_path: &Path) -> api::Vsock {
        api::Vsock {
            guest_cid: self.guest_cid,
            uds_path: uds_path.display().to_string(),
        }
    }
}
