pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod firecracker;
pub mod paths;
pub mod protocol;
pub mod readiness;
pub mod vsock;

// Re-export core types for convenience
pub use bootstrap::{BootStage, Bootstrapper};
pub use config::BootConfig;
pub use error::BootError;
