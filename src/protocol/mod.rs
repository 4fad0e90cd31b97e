//! Peer-to-peer command protocol.
//!
//! Every frame is `[protocol version][command type id][payload]` over a
//! [`BinaryChannel`](crate::channel::BinaryChannel). Readers reject frames
//! whose version they do not understand, which keeps rolling upgrades
//! forward-compatible: the connection fails fast instead of misparsing.

mod errors;
mod messages;

pub use errors::{ProtocolError, ProtocolResult};
pub use messages::{Command, CommandType, ErrorCode, PROTOCOL_VERSION};
