use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::BootConfig;
use crate::firecracker::OutputMode;

#[derive(Parser, Debug)]
#[command(
    name = "vmrun",
    version,
    about = "Boot a Firecracker microVM and hand the guest a command over vsock"
)]
pub struct Cli {
    /// JSON config file; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Firecracker binary
    #[arg(long)]
    pub firecracker: Option<PathBuf>,

    /// Guest kernel image
    #[arg(long)]
    pub kernel: Option<PathBuf>,

    /// Initial ramdisk
    #[arg(long)]
    pub initrd: Option<PathBuf>,

    /// Kernel command line
    #[arg(long)]
    pub boot_args: Option<String>,

    /// Disk image attached as the VM's drive
    #[arg(long)]
    pub rootfs: Option<PathBuf>,

    /// Attach the drive read-write
    #[arg(long)]
    pub rootfs_writable: bool,

    /// Mark the drive as the root device
    #[arg(long)]
    pub root_device: bool,

    /// Guest CID for the vsock device
    #[arg(long)]
    pub guest_cid: Option<u32>,

    /// Port the guest dials on the host
    #[arg(long)]
    pub vsock_port: Option<u32>,

    /// Guest environment KEY=VALUE (repeat; replaces the default environment)
    #[arg(long)]
    pub env: Vec<String>,

    /// Fail if the API socket never appears instead of trying anyway
    #[arg(long)]
    pub strict_readiness: bool,

    /// Route Firecracker output through the logger instead of stderr
    #[arg(long)]
    pub log_firecracker: bool,

    /// Print the resolved config as JSON and exit
    #[arg(long)]
    pub print_config: bool,

    /// Command for the guest to run
    #[arg(last = true)]
    pub argv: Vec<String>,
}

impl Cli {
    /// Load the config file (or defaults) and apply flag overrides.
    pub fn resolve_config(&self) -> Result<BootConfig> {
        let config = match &self.config {
            Some(path) => BootConfig::load(path)?,
            None => BootConfig::default(),
        };
        Ok(self.apply(config))
    }

    fn apply(&self, mut config: BootConfig) -> BootConfig {
        if let Some(bin) = &self.firecracker {
            config.firecracker_bin = bin.clone();
        }
        if let Some(kernel) = &self.kernel {
            config.boot_source.kernel_image_path = kernel.clone();
        }
        if let Some(initrd) = &self.initrd {
            config.boot_source.initrd_path = Some(initrd.clone());
        }
        if let Some(args) = &self.boot_args {
            config.boot_source.boot_args = args.clone();
        }
        if let Some(rootfs) = &self.rootfs {
            config.drive.path_on_host = rootfs.clone();
        }
        if self.rootfs_writable {
            config.drive.is_read_only = false;
        }
        if self.root_device {
            config.drive.is_root_device = true;
        }
        if let Some(cid) = self.guest_cid {
            config.side_channel.guest_cid = cid;
        }
        if let Some(port) = self.vsock_port {
            config.side_channel.port = port;
        }
        if !self.env.is_empty() {
            config.guest.envp = self.env.clone();
        }
        if !self.argv.is_empty() {
            config.guest.argv = self.argv.clone();
        }
        if self.strict_readiness {
            config.readiness.fail_on_timeout = true;
        }
        if self.log_firecracker {
            config.hypervisor_output = OutputMode::Log;
        }
        config
    }
}
