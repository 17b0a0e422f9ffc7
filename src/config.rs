//! Run configuration.
//!
//! Everything a run needs is in `BootConfig`: defaults reproduce the stock
//! postgres image deployment, a JSON file can override any subset, and CLI
//! flags override the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::firecracker::api::is_valid_drive_id;
use crate::firecracker::{BootSourceConfig, DriveConfig, OutputMode, SideChannelConfig};
use crate::protocol::GuestCommand;
use crate::readiness::ReadinessConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootConfig {
    /// Firecracker executable (looked up in PATH if relative)
    pub firecracker_bin: PathBuf,
    pub hypervisor_output: OutputMode,
    pub boot_source: BootSourceConfig,
    pub drive: DriveConfig,
    pub side_channel: SideChannelConfig,
    /// Command handed to the guest in the `HELO` response
    pub guest: GuestCommand,
    pub readiness: ReadinessConfig,
    /// Per-request control-plane timeout; unset waits as long as it takes
    pub api_timeout_secs: Option<u64>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            firecracker_bin: PathBuf::from("firecracker"),
            hypervisor_output: OutputMode::default(),
            boot_source: BootSourceConfig::default(),
            drive: DriveConfig::default(),
            side_channel: SideChannelConfig::default(),
            guest: GuestCommand::default(),
            readiness: ReadinessConfig::default(),
            api_timeout_secs: None,
        }
    }
}

impl BootConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: BootConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.guest.argv.is_empty() {
            bail!("guest argv must not be empty");
        }
        for entry in &self.guest.envp {
            match entry.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => bail!("guest env entry {:?} is not KEY=VALUE", entry),
            }
        }
        if !is_valid_drive_id(&self.drive.drive_id) {
            bail!(
                "drive id {:?} must be non-empty and only contain [A-Za-z0-9_]",
                self.drive.drive_id
            );
        }
        // CIDs 0-2 are reserved (hypervisor, local, host)
        if self.side_channel.guest_cid < 3 {
            bail!(
                "guest CID must be 3 or higher, got {}",
                self.side_channel.guest_cid
            );
        }
        if self.readiness.max_attempts == 0 {
            bail!("readiness max_attempts must be at least 1");
        }
        if self.readiness.backoff_factor == 0 {
            bail!("readiness backoff_factor must be at least 1");
        }
        Ok(())
    }

    /// Pretty JSON, in the same shape `load` accepts
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing config")
    }
}
