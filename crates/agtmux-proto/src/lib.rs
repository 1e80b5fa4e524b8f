//! Wire protocol for daemon ↔ client RPC.
//!
//! Frames are MessagePack maps with a u32 big-endian length prefix. The
//! capability envelope lets clients probe for optional surfaces before
//! using them; a raw binary hot-path variant is reserved behind
//! `terminal_frame_protocol = "terminal-stream-v1"`.

pub mod codec;
pub mod error;
pub mod frames;
pub mod rpc;

pub use codec::{decode, encode, read_frame, write_frame, CodecError, MAX_FRAME_LEN};
pub use error::ErrorCode;
pub use frames::TerminalFrame;
