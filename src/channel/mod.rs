//! Binary channel: framed, versioned read/write primitives over a byte
//! stream.
//!
//! Foundation for all peer messages. All multi-byte integers travel in
//! network (big-endian) byte order. No operation may silently truncate: a
//! partial write loops until complete or the stream reports an error, and
//! the first error poisons the channel.

mod binary;
mod errors;

pub use binary::{BinaryChannel, Rid, MAX_FRAME_BYTES};
pub use errors::{ChannelError, ChannelErrorKind, ChannelResult};
