//! Framed binary read/write primitives.
//!
//! Fixed-width encodings are big-endian. Strings are length-prefixed UTF-8.
//! Large blobs carry an unsigned varint length prefix. Record identifiers
//! are a compact pair of zig-zag varints. Writers either complete the whole
//! value or poison the channel; readers never return a partially decoded
//! value.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::errors::{ChannelError, ChannelResult};

/// Upper bound for any length-prefixed field. A peer announcing more than
/// this is treated as a malformed frame, not an allocation request.
pub const MAX_FRAME_BYTES: u64 = 256 * 1024 * 1024;

/// Maximum encoded width of a 64-bit varint.
const MAX_VARINT_BYTES: usize = 10;

/// A 2-component record identifier: bucket id and position within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    /// Bucket identifier (negative for unplaced records)
    pub bucket_id: i32,
    /// Position inside the bucket (negative for unplaced records)
    pub position: i64,
}

impl Rid {
    /// Create a new record identifier.
    pub fn new(bucket_id: i32, position: i64) -> Self {
        Self {
            bucket_id,
            position,
        }
    }
}

/// Framed, versioned channel over a connected byte stream.
///
/// The first I/O failure marks the channel broken; every later call fails
/// with [`ChannelErrorKind::Broken`](super::ChannelErrorKind::Broken) and
/// the caller must close the underlying stream.
pub struct BinaryChannel<S> {
    stream: S,
    broken: bool,
}

impl<S> BinaryChannel<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            broken: false,
        }
    }

    /// Whether a previous failure poisoned this channel.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Consume the channel, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn ensure_open(&self) -> ChannelResult<()> {
        if self.broken {
            Err(ChannelError::broken())
        } else {
            Ok(())
        }
    }

    fn poison(&mut self, err: ChannelError) -> ChannelError {
        self.broken = true;
        err
    }
}

impl<S: AsyncWrite + Unpin> BinaryChannel<S> {
    async fn write_all(&mut self, bytes: &[u8]) -> ChannelResult<()> {
        self.ensure_open()?;
        match self.stream.write_all(bytes).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.poison(ChannelError::io("write failed", e))),
        }
    }

    /// Flush buffered bytes to the peer.
    pub async fn flush(&mut self) -> ChannelResult<()> {
        self.ensure_open()?;
        match self.stream.flush().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.poison(ChannelError::io("flush failed", e))),
        }
    }

    /// Write a single byte.
    pub async fn write_u8(&mut self, v: u8) -> ChannelResult<()> {
        self.write_all(&[v]).await
    }

    /// Write a boolean as one byte (0 or 1).
    pub async fn write_bool(&mut self, v: bool) -> ChannelResult<()> {
        self.write_u8(u8::from(v)).await
    }

    /// Write a signed 16-bit integer.
    pub async fn write_i16(&mut self, v: i16) -> ChannelResult<()> {
        self.write_all(&v.to_be_bytes()).await
    }

    /// Write a signed 32-bit integer.
    pub async fn write_i32(&mut self, v: i32) -> ChannelResult<()> {
        self.write_all(&v.to_be_bytes()).await
    }

    /// Write a signed 64-bit integer.
    pub async fn write_i64(&mut self, v: i64) -> ChannelResult<()> {
        self.write_all(&v.to_be_bytes()).await
    }

    /// Write an unsigned 64-bit integer.
    pub async fn write_u64(&mut self, v: u64) -> ChannelResult<()> {
        self.write_all(&v.to_be_bytes()).await
    }

    /// Write an unsigned 32-bit integer.
    pub async fn write_u32(&mut self, v: u32) -> ChannelResult<()> {
        self.write_all(&v.to_be_bytes()).await
    }

    /// Write a length-prefixed UTF-8 string.
    pub async fn write_string(&mut self, s: &str) -> ChannelResult<()> {
        let len = s.len() as u64;
        if len > MAX_FRAME_BYTES {
            return Err(ChannelError::frame_too_large(len, MAX_FRAME_BYTES));
        }
        self.write_u32(len as u32).await?;
        self.write_all(s.as_bytes()).await
    }

    /// Write a variable-length-prefixed binary blob.
    ///
    /// Used for large serialized transaction payloads; the length travels
    /// as an unsigned varint.
    pub async fn write_var_bytes(&mut self, bytes: &[u8]) -> ChannelResult<()> {
        let len = bytes.len() as u64;
        if len > MAX_FRAME_BYTES {
            return Err(ChannelError::frame_too_large(len, MAX_FRAME_BYTES));
        }
        self.write_unsigned_varint(len).await?;
        self.write_all(bytes).await
    }

    /// Write an unsigned LEB128 varint.
    pub async fn write_unsigned_varint(&mut self, mut v: u64) -> ChannelResult<()> {
        let mut buf = [0u8; MAX_VARINT_BYTES];
        let mut i = 0;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                buf[i] = byte;
                i += 1;
                break;
            }
            buf[i] = byte | 0x80;
            i += 1;
        }
        self.write_all(&buf[..i]).await
    }

    /// Write a signed varint (zig-zag encoded).
    pub async fn write_varint(&mut self, v: i64) -> ChannelResult<()> {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        self.write_unsigned_varint(zigzag).await
    }

    /// Write a record identifier as a compact pair of signed varints.
    pub async fn write_rid(&mut self, rid: Rid) -> ChannelResult<()> {
        self.write_varint(i64::from(rid.bucket_id)).await?;
        self.write_varint(rid.position).await
    }

    /// Write a protocol version tag.
    pub async fn write_version(&mut self, version: u16) -> ChannelResult<()> {
        self.write_all(&version.to_be_bytes()).await
    }
}

impl<S: AsyncRead + Unpin> BinaryChannel<S> {
    async fn read_exact(&mut self, buf: &mut [u8]) -> ChannelResult<()> {
        self.ensure_open()?;
        match self.stream.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.poison(ChannelError::io("read failed", e))),
        }
    }

    /// Read a single byte.
    pub async fn read_u8(&mut self) -> ChannelResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf).await?;
        Ok(buf[0])
    }

    /// Read a boolean; any non-zero byte is true.
    pub async fn read_bool(&mut self) -> ChannelResult<bool> {
        Ok(self.read_u8().await? != 0)
    }

    /// Read a signed 16-bit integer.
    pub async fn read_i16(&mut self) -> ChannelResult<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf).await?;
        Ok(i16::from_be_bytes(buf))
    }

    /// Read a signed 32-bit integer.
    pub async fn read_i32(&mut self) -> ChannelResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).await?;
        Ok(i32::from_be_bytes(buf))
    }

    /// Read a signed 64-bit integer.
    pub async fn read_i64(&mut self) -> ChannelResult<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf).await?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Read an unsigned 64-bit integer.
    pub async fn read_u64(&mut self) -> ChannelResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf).await?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Read an unsigned 32-bit integer.
    pub async fn read_u32(&mut self) -> ChannelResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a length-prefixed UTF-8 string.
    pub async fn read_string(&mut self) -> ChannelResult<String> {
        let len = u64::from(self.read_u32().await?);
        if len > MAX_FRAME_BYTES {
            return Err(self.poison(ChannelError::frame_too_large(len, MAX_FRAME_BYTES)));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf).await?;
        String::from_utf8(buf).map_err(|e| {
            self.poison(ChannelError::invalid_utf8(format!(
                "string field is not valid UTF-8: {}",
                e
            )))
        })
    }

    /// Read a variable-length-prefixed binary blob.
    pub async fn read_var_bytes(&mut self) -> ChannelResult<Vec<u8>> {
        let len = self.read_unsigned_varint().await?;
        if len > MAX_FRAME_BYTES {
            return Err(self.poison(ChannelError::frame_too_large(len, MAX_FRAME_BYTES)));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Read an unsigned LEB128 varint.
    pub async fn read_unsigned_varint(&mut self) -> ChannelResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        for _ in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8().await?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(self.poison(ChannelError::varint_overflow()))
    }

    /// Read a signed varint (zig-zag encoded).
    pub async fn read_varint(&mut self) -> ChannelResult<i64> {
        let zigzag = self.read_unsigned_varint().await?;
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    /// Read a record identifier.
    pub async fn read_rid(&mut self) -> ChannelResult<Rid> {
        let bucket_id = self.read_varint().await?;
        let position = self.read_varint().await?;
        Ok(Rid::new(bucket_id as i32, position))
    }

    /// Read a protocol version tag and reject frames this node does not
    /// understand.
    pub async fn read_version(&mut self, expected: u16) -> ChannelResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf).await?;
        let actual = u16::from_be_bytes(buf);
        if actual != expected {
            return Err(self.poison(ChannelError::version_mismatch(expected, actual)));
        }
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelErrorKind;

    #[tokio::test]
    async fn test_fixed_width_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = BinaryChannel::new(client);
        let mut reader = BinaryChannel::new(server);

        writer.write_u8(0xAB).await.unwrap();
        writer.write_bool(true).await.unwrap();
        writer.write_i16(-2).await.unwrap();
        writer.write_i32(123_456).await.unwrap();
        writer.write_i64(-9_876_543_210).await.unwrap();
        writer.write_u64(u64::MAX).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_u8().await.unwrap(), 0xAB);
        assert!(reader.read_bool().await.unwrap());
        assert_eq!(reader.read_i16().await.unwrap(), -2);
        assert_eq!(reader.read_i32().await.unwrap(), 123_456);
        assert_eq!(reader.read_i64().await.unwrap(), -9_876_543_210);
        assert_eq!(reader.read_u64().await.unwrap(), u64::MAX);
    }

    #[tokio::test]
    async fn test_string_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = BinaryChannel::new(client);
        let mut reader = BinaryChannel::new(server);

        writer.write_string("node-1 ный").await.unwrap();
        writer.write_string("").await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_string().await.unwrap(), "node-1 ный");
        assert_eq!(reader.read_string().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_var_bytes_round_trip() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let mut writer = BinaryChannel::new(client);
        let mut reader = BinaryChannel::new(server);

        let blob: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        writer.write_var_bytes(&blob).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_var_bytes().await.unwrap(), blob);
    }

    #[tokio::test]
    async fn test_varint_extremes() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = BinaryChannel::new(client);
        let mut reader = BinaryChannel::new(server);

        for v in [0i64, 1, -1, 63, -64, i64::MAX, i64::MIN] {
            writer.write_varint(v).await.unwrap();
        }
        writer.flush().await.unwrap();

        for v in [0i64, 1, -1, 63, -64, i64::MAX, i64::MIN] {
            assert_eq!(reader.read_varint().await.unwrap(), v);
        }
    }

    #[tokio::test]
    async fn test_rid_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = BinaryChannel::new(client);
        let mut reader = BinaryChannel::new(server);

        let rid = Rid::new(12, 9_000_000_001);
        writer.write_rid(rid).await.unwrap();
        writer.write_rid(Rid::new(-1, -1)).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_rid().await.unwrap(), rid);
        assert_eq!(reader.read_rid().await.unwrap(), Rid::new(-1, -1));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = BinaryChannel::new(client);
        let mut reader = BinaryChannel::new(server);

        writer.write_version(9).await.unwrap();
        writer.flush().await.unwrap();

        let err = reader.read_version(1).await.unwrap_err();
        assert!(err.is_version_mismatch());
        assert!(reader.is_broken());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_eof() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = BinaryChannel::new(client);
        let mut reader = BinaryChannel::new(server);

        // Announce 100 bytes but deliver only 3, then close.
        writer.write_u32(100).await.unwrap();
        writer.write_u8(1).await.unwrap();
        writer.write_u8(2).await.unwrap();
        writer.write_u8(3).await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let err = reader.read_string().await.unwrap_err();
        assert_eq!(err.kind, ChannelErrorKind::UnexpectedEof);
        assert!(reader.is_broken());
    }

    #[tokio::test]
    async fn test_broken_channel_stays_broken() {
        let (client, server) = tokio::io::duplex(4096);
        let mut reader = BinaryChannel::new(server);
        drop(client);

        assert!(reader.read_u8().await.is_err());
        let err = reader.read_u8().await.unwrap_err();
        assert_eq!(err.kind, ChannelErrorKind::Broken);
    }
}
