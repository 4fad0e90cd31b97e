//! The replication log file.
//!
//! Lifecycle: CLOSED -> OPEN (append/read enabled) -> CLOSED.
//!
//! Append discipline:
//! 1. Serialize the record with the next message number
//! 2. Write it to the log file
//! 3. Flush according to the configured sync mode
//! 4. Only then is the number returned to the caller
//!
//! Single-writer: the leader role owns the append path exclusively.
//! Readers run concurrently because appended bytes are immutable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::errors::{LogError, LogResult};
use super::reader::LogReader;
use super::record::LogRecord;

/// Flush policy applied after every append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// OS-buffered; no explicit flush
    No,
    /// Data flushed, file metadata may lag
    NoMetadata,
    /// Data and metadata flushed
    #[default]
    Full,
}

const LOG_FILE: &str = "replication.log";
const CHECKPOINT_FILE: &str = "checkpoint";

/// Durable append-only store of numbered replication messages.
pub struct ReplicationLog {
    dir: PathBuf,
    path: PathBuf,
    checkpoint_path: PathBuf,
    file: Option<File>,
    sync: SyncMode,
    /// Full-resync checkpoint; retained numbering restarts above it.
    base: u64,
    /// Oldest retained message number, 0 when the file holds no records.
    first: u64,
    /// Highest durable message number; equals `base` when the file is empty.
    last: u64,
}

impl ReplicationLog {
    /// Open or create the log under `<data_dir>/replog/`.
    ///
    /// Scans existing records to restore the numbering state; any
    /// corruption found during the scan halts the open.
    pub fn open(data_dir: &Path, sync: SyncMode) -> LogResult<Self> {
        let dir = data_dir.join("replog");
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                LogError::append_failed(
                    format!("failed to create log directory {}", dir.display()),
                    e,
                )
            })?;
        }

        let path = dir.join(LOG_FILE);
        let checkpoint_path = dir.join(CHECKPOINT_FILE);
        let base = Self::read_checkpoint(&checkpoint_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                LogError::append_failed(
                    format!("failed to open log file {}", path.display()),
                    e,
                )
            })?;

        let mut first = 0u64;
        let mut last = base;
        let size = file
            .metadata()
            .map_err(|e| LogError::append_failed("failed to read log metadata", e))?
            .len();
        if size > 0 {
            for entry in LogReader::open(&path, 1)? {
                let record = entry?;
                if record.message_number <= base {
                    return Err(LogError::corruption_at_message(
                        record.message_number,
                        format!("record predates checkpoint {}", base),
                    ));
                }
                if first == 0 {
                    first = record.message_number;
                }
                last = record.message_number;
            }
        }

        Ok(Self {
            dir,
            path,
            checkpoint_path,
            file: Some(file),
            sync,
            base,
            first,
            last,
        })
    }

    /// Whether the log is open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Highest durable message number, or 0 if nothing was ever appended.
    pub fn last_message_number(&self) -> u64 {
        self.last
    }

    /// Oldest retained message number, or 0 when no records are retained.
    pub fn first_message_number(&self) -> u64 {
        self.first
    }

    /// Full-resync checkpoint below which nothing is retained.
    pub fn checkpoint(&self) -> u64 {
        self.base
    }

    /// Assign the next message number, persist the record, and return the
    /// number. Linearizable with prior appends: the number is handed out
    /// only after the configured flush completes.
    pub fn append(&mut self, sender_server_name: &str, payload: &[u8]) -> LogResult<u64> {
        let number = self.last + 1;
        let record = LogRecord::new(number, sender_server_name, payload.to_vec());
        self.write_record(&record)?;
        Ok(number)
    }

    /// Append a record that already carries its leader-assigned number
    /// (replica side). The number must extend the local sequence exactly.
    pub fn append_message(&mut self, record: &LogRecord) -> LogResult<()> {
        if record.message_number != self.last + 1 {
            return Err(LogError::corruption_at_message(
                record.message_number,
                format!(
                    "non-contiguous append: expected {}, got {}",
                    self.last + 1,
                    record.message_number
                ),
            ));
        }
        self.write_record(record)
    }

    fn write_record(&mut self, record: &LogRecord) -> LogResult<()> {
        let file = self.file.as_mut().ok_or_else(LogError::closed)?;

        let serialized = record.serialize();
        file.write_all(&serialized).map_err(|e| {
            LogError::append_failed(
                format!(
                    "failed to write log record {}",
                    record.message_number
                ),
                e,
            )
        })?;

        match self.sync {
            SyncMode::No => {}
            SyncMode::NoMetadata => {
                file.sync_data().map_err(|e| {
                    LogError::sync_failed(
                        format!("sync_data failed after record {}", record.message_number),
                        e,
                    )
                })?;
            }
            SyncMode::Full => {
                file.sync_all().map_err(|e| {
                    LogError::sync_failed(
                        format!("sync_all failed after record {}", record.message_number),
                        e,
                    )
                })?;
            }
        }

        self.last = record.message_number;
        if self.first == 0 {
            self.first = record.message_number;
        }
        Ok(())
    }

    /// Lazy, restartable sequence of records starting at `from`.
    ///
    /// Fails with `REPL_LOG_MESSAGE_NOT_FOUND` when `from` precedes the
    /// oldest retained entry; that signal triggers a full resync upstream.
    pub fn read_from(&self, from: u64) -> LogResult<LogReader> {
        if !self.is_open() {
            return Err(LogError::closed());
        }
        let floor = if self.first == 0 {
            self.base + 1
        } else {
            self.first
        };
        if from < floor {
            return Err(LogError::message_not_found(from, floor));
        }
        LogReader::open(&self.path, from)
    }

    /// Drop records below `first_retained`, keeping the tail.
    ///
    /// The log is rewritten to a temporary file which atomically replaces
    /// the old one; the directory entry is synced so the swap survives a
    /// crash.
    pub fn prune_to(&mut self, first_retained: u64) -> LogResult<()> {
        if !self.is_open() {
            return Err(LogError::closed());
        }
        if self.first == 0 || first_retained <= self.first {
            return Ok(());
        }

        let tmp_path = self.dir.join(format!("{}.tmp", LOG_FILE));
        {
            let mut tmp = File::create(&tmp_path).map_err(|e| {
                LogError::append_failed(
                    format!("failed to create prune file {}", tmp_path.display()),
                    e,
                )
            })?;
            for entry in LogReader::open(&self.path, first_retained)? {
                let record = entry?;
                tmp.write_all(&record.serialize()).map_err(|e| {
                    LogError::append_failed("failed to write pruned record", e)
                })?;
            }
            tmp.sync_all()
                .map_err(|e| LogError::sync_failed("failed to sync pruned log", e))?;
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            LogError::append_failed("failed to swap pruned log into place", e)
        })?;
        self.sync_dir()?;
        self.reopen_for_append()?;

        if first_retained > self.last {
            // Everything was dropped; the checkpoint moves up so numbering
            // continues from the old tail.
            self.base = self.last;
            self.write_checkpoint(self.base)?;
            self.first = 0;
        } else {
            self.first = first_retained;
        }
        Ok(())
    }

    /// Full-resync reset: discard all records and restart the sequence
    /// above `checkpoint`.
    pub fn reset(&mut self, checkpoint: u64) -> LogResult<()> {
        if !self.is_open() {
            return Err(LogError::closed());
        }

        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                LogError::append_failed("failed to remove log during reset", e)
            })?;
        }
        let new_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| LogError::append_failed("failed to create log during reset", e))?;
        new_file
            .sync_all()
            .map_err(|e| LogError::sync_failed("failed to sync log during reset", e))?;
        self.sync_dir()?;

        self.write_checkpoint(checkpoint)?;
        self.reopen_for_append()?;
        self.base = checkpoint;
        self.first = 0;
        self.last = checkpoint;
        Ok(())
    }

    /// Flush pending bytes and close the log.
    pub fn close(&mut self) -> LogResult<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| LogError::sync_failed("failed to sync log on close", e))?;
        }
        Ok(())
    }

    fn reopen_for_append(&mut self) -> LogResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LogError::append_failed("failed to reopen log for append", e))?;
        self.file = Some(file);
        Ok(())
    }

    fn sync_dir(&self) -> LogResult<()> {
        let dir = OpenOptions::new().read(true).open(&self.dir).map_err(|e| {
            LogError::append_failed(
                format!("failed to open log directory {}", self.dir.display()),
                e,
            )
        })?;
        dir.sync_all()
            .map_err(|e| LogError::sync_failed("failed to sync log directory", e))
    }

    fn write_checkpoint(&self, checkpoint: u64) -> LogResult<()> {
        let tmp_path = self.dir.join(format!("{}.tmp", CHECKPOINT_FILE));
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&checkpoint.to_le_bytes());
        let crc = crc32fast::hash(&buf[..8]);
        buf[8..].copy_from_slice(&crc.to_le_bytes());

        {
            let mut tmp = File::create(&tmp_path).map_err(|e| {
                LogError::append_failed("failed to create checkpoint file", e)
            })?;
            tmp.write_all(&buf)
                .map_err(|e| LogError::append_failed("failed to write checkpoint", e))?;
            tmp.sync_all()
                .map_err(|e| LogError::sync_failed("failed to sync checkpoint", e))?;
        }
        fs::rename(&tmp_path, &self.checkpoint_path)
            .map_err(|e| LogError::append_failed("failed to swap checkpoint", e))?;
        self.sync_dir()
    }

    fn read_checkpoint(path: &Path) -> LogResult<u64> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(LogError::append_failed("failed to open checkpoint", e));
            }
        };
        let mut buf = [0u8; 12];
        file.read_exact(&mut buf)
            .map_err(|_| LogError::corruption("checkpoint file is truncated"))?;
        let value = u64::from_le_bytes(buf[..8].try_into().unwrap());
        let stored_crc = u32::from_le_bytes(buf[8..].try_into().unwrap());
        if stored_crc != crc32fast::hash(&buf[..8]) {
            return Err(LogError::corruption("checkpoint checksum mismatch"));
        }
        Ok(value)
    }
}
