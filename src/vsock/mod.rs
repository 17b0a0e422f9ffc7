pub mod server;

pub use server::{FrameServerHandle, VsockFrameServer};
