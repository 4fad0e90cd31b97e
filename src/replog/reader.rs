//! Sequential log reader with strict corruption detection.
//!
//! - Records are read strictly in message-number order
//! - Any checksum or structure violation fails the read immediately
//! - No partial replay, no skipping records, no repair attempts
//!
//! The reader is lazy and restartable: it is an iterator that can be
//! reopened from any retained message number, and it runs safely while a
//! writer keeps appending because the log is append-only.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use super::errors::{LogError, LogResult};
use super::record::{LogRecord, MIN_RECORD_SIZE};

/// Lazy sequence of [`LogRecord`] starting at a requested message number.
#[derive(Debug)]
pub struct LogReader {
    reader: BufReader<File>,
    current_offset: u64,
    file_size: u64,
    last_number: u64,
    start: u64,
    done: bool,
}

impl LogReader {
    /// Open the log file, positioned to yield records with
    /// `message_number >= start`.
    ///
    /// The file size is sampled at open time, so the sequence is finite
    /// even while appends continue.
    pub(crate) fn open(path: &Path, start: u64) -> LogResult<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LogError::corruption(format!("log file not found: {}", path.display()))
            } else {
                LogError::corruption(format!(
                    "failed to open log file {}: {}",
                    path.display(),
                    e
                ))
            }
        })?;

        let file_size = file
            .metadata()
            .map_err(|e| LogError::corruption(format!("failed to read log metadata: {}", e)))?
            .len();

        Ok(Self {
            reader: BufReader::new(file),
            current_offset: 0,
            file_size,
            last_number: 0,
            start,
            done: false,
        })
    }

    /// Last message number successfully read.
    pub fn last_message_number(&self) -> u64 {
        self.last_number
    }

    fn read_next(&mut self) -> LogResult<Option<LogRecord>> {
        if self.current_offset >= self.file_size {
            return Ok(None);
        }

        let remaining = self.file_size - self.current_offset;
        if remaining < MIN_RECORD_SIZE as u64 {
            return Err(LogError::corruption_at_offset(
                self.current_offset,
                format!(
                    "truncated log: {} bytes remaining, minimum record size is {}",
                    remaining, MIN_RECORD_SIZE
                ),
            ));
        }

        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf).map_err(|e| {
            LogError::corruption_at_offset(
                self.current_offset,
                format!("failed to read record length: {}", e),
            )
        })?;
        let record_length = u32::from_le_bytes(len_buf) as u64;

        if record_length < MIN_RECORD_SIZE as u64 || record_length > remaining {
            return Err(LogError::corruption_at_offset(
                self.current_offset,
                format!(
                    "invalid record length {} with {} bytes remaining",
                    record_length, remaining
                ),
            ));
        }

        let mut record_buf = vec![0u8; record_length as usize];
        record_buf[..4].copy_from_slice(&len_buf);
        self.reader.read_exact(&mut record_buf[4..]).map_err(|e| {
            LogError::corruption_at_offset(
                self.current_offset,
                format!("failed to read record body: {}", e),
            )
        })?;

        let (record, consumed) = LogRecord::deserialize(&record_buf)?;

        // Numbers must be contiguous; the first retained record may start
        // anywhere above the checkpoint.
        if self.last_number > 0 && record.message_number != self.last_number + 1 {
            return Err(LogError::corruption_at_message(
                record.message_number,
                format!(
                    "non-contiguous message number: expected {}, got {}",
                    self.last_number + 1,
                    record.message_number
                ),
            ));
        }

        self.current_offset += consumed as u64;
        self.last_number = record.message_number;

        Ok(Some(record))
    }
}

impl Iterator for LogReader {
    type Item = LogResult<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.read_next() {
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Ok(Some(record)) if record.message_number < self.start => continue,
                Ok(Some(record)) => return Some(Ok(record)),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
