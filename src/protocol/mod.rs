//! Side-channel wire protocol spoken with the guest over vsock.

pub mod frame;
pub mod handshake;

pub use frame::{
    decode_header, encode_frame, read_frame, write_frame, Frame, FrameHeader, Tag, HEADER_LEN,
    MAX_PAYLOAD_LEN,
};
pub use handshake::GuestCommand;
