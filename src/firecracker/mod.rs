pub mod api;
pub mod config;
pub mod vm;

pub use api::FirecrackerClient;
pub use config::{BootSourceConfig, DriveConfig, SideChannelConfig};
pub use vm::{FirecrackerProcess, Hypervisor, OutputMode};
