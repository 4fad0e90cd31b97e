//! Replication log record framing.
//!
//! Each record on disk is:
//! - Record Length (u32 LE, total including length and checksum)
//! - Message Number (u64 LE)
//! - Sender Length (u32 LE) + sender server name (UTF-8)
//! - Payload Length (u32 LE) + opaque serialized transaction bytes
//! - Checksum (u32 LE, CRC32 over all preceding bytes)
//!
//! Records always store the full payload verbatim; no deltas, no
//! re-encoding. This guarantees deterministic replay on replicas.

use super::errors::{LogError, LogResult};

/// Minimum size of a serialized record (empty sender, empty payload).
pub(crate) const MIN_RECORD_SIZE: usize = 4 + 8 + 4 + 4 + 4;

/// One replication message as stored in the log and shipped to replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Strictly increasing, gapless within a leader epoch
    pub message_number: u64,
    /// Name of the server that assigned this number
    pub sender_server_name: String,
    /// Opaque serialized transaction
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Create a new record.
    pub fn new(
        message_number: u64,
        sender_server_name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_number,
            sender_server_name: sender_server_name.into(),
            payload,
        }
    }

    /// Size of this record once serialized.
    pub fn encoded_len(&self) -> usize {
        MIN_RECORD_SIZE + self.sender_server_name.len() + self.payload.len()
    }

    /// Serialize to the on-disk framing.
    pub fn serialize(&self) -> Vec<u8> {
        let total = self.encoded_len();
        let mut buf = Vec::with_capacity(total);

        buf.extend_from_slice(&(total as u32).to_le_bytes());
        buf.extend_from_slice(&self.message_number.to_le_bytes());
        buf.extend_from_slice(&(self.sender_server_name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.sender_server_name.as_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Deserialize one record from the start of `data`.
    ///
    /// Returns the record and the number of bytes consumed. Fails with a
    /// corruption error on any structural or checksum violation; no repair
    /// is attempted.
    pub fn deserialize(data: &[u8]) -> LogResult<(LogRecord, usize)> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(LogError::corruption(format!(
                "truncated record: {} bytes available, minimum is {}",
                data.len(),
                MIN_RECORD_SIZE
            )));
        }

        let total = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if total < MIN_RECORD_SIZE {
            return Err(LogError::corruption(format!(
                "invalid record length {}",
                total
            )));
        }
        if total > data.len() {
            return Err(LogError::corruption(format!(
                "record length {} exceeds available {} bytes",
                total,
                data.len()
            )));
        }

        let body = &data[..total];
        let stored_crc = u32::from_le_bytes([
            body[total - 4],
            body[total - 3],
            body[total - 2],
            body[total - 1],
        ]);
        let computed_crc = crc32fast::hash(&body[..total - 4]);
        if stored_crc != computed_crc {
            return Err(LogError::corruption(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, computed_crc
            )));
        }

        let mut cursor = 4;
        let message_number = u64::from_le_bytes(body[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;

        let sender_len =
            u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + sender_len + 4 + 4 > total {
            return Err(LogError::corruption_at_message(
                message_number,
                "sender length exceeds record bounds",
            ));
        }
        let sender_server_name = String::from_utf8(body[cursor..cursor + sender_len].to_vec())
            .map_err(|e| {
                LogError::corruption_at_message(
                    message_number,
                    format!("sender name is not valid UTF-8: {}", e),
                )
            })?;
        cursor += sender_len;

        let payload_len =
            u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + payload_len + 4 != total {
            return Err(LogError::corruption_at_message(
                message_number,
                "payload length does not match record length",
            ));
        }
        let payload = body[cursor..cursor + payload_len].to_vec();

        Ok((
            LogRecord {
                message_number,
                sender_server_name,
                payload,
            },
            total,
        ))
    }
}
