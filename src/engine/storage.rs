//! Storage engine facade and the file-backed reference implementation.
//!
//! The core ships transaction payloads opaquely; only the storage facade
//! decodes them. A payload is `[database][body]`, both length-prefixed, so
//! one replication stream can carry transactions for every database on the
//! node.
//!
//! Full-resync snapshots travel as tar archives with a CRC32 over the
//! archive bytes; installation verifies the checksum first and replaces
//! the database directory atomically from the receiver's point of view.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::errors::{EngineError, EngineResult};

/// A committed transaction unit as carried in replication payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPayload {
    /// Target database name
    pub database: String,
    /// Opaque serialized transaction body
    pub body: Vec<u8>,
}

impl TransactionPayload {
    /// Create a new payload.
    pub fn new(database: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            database: database.into(),
            body: body.into(),
        }
    }

    /// Serialize to the wire/log representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(4 + self.database.len() + 4 + self.body.len());
        buf.extend_from_slice(&(self.database.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.database.as_bytes());
        buf.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Decode from the wire/log representation.
    pub fn decode(data: &[u8]) -> EngineResult<Self> {
        if data.len() < 8 {
            return Err(EngineError::MalformedPayload(format!(
                "{} bytes is below the minimum payload size",
                data.len()
            )));
        }
        let db_len = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
        if 4 + db_len + 4 > data.len() {
            return Err(EngineError::MalformedPayload(
                "database name exceeds payload bounds".to_string(),
            ));
        }
        let database = String::from_utf8(data[4..4 + db_len].to_vec()).map_err(|e| {
            EngineError::MalformedPayload(format!("database name is not UTF-8: {}", e))
        })?;
        let body_start = 4 + db_len + 4;
        let body_len = u32::from_le_bytes(
            data[4 + db_len..body_start].try_into().unwrap(),
        ) as usize;
        if body_start + body_len != data.len() {
            return Err(EngineError::MalformedPayload(
                "body length does not match payload size".to_string(),
            ));
        }
        Ok(Self {
            database,
            body: data[body_start..].to_vec(),
        })
    }
}

/// A complete database snapshot for full resync.
#[derive(Debug, Clone)]
pub struct DatabaseSnapshot {
    /// Database name
    pub database: String,
    /// CRC32 over the archive bytes
    pub checksum: u32,
    /// tar archive of the database directory
    pub archive: Vec<u8>,
}

impl DatabaseSnapshot {
    /// Build a snapshot, computing the checksum.
    pub fn new(database: impl Into<String>, archive: Vec<u8>) -> Self {
        let checksum = crc32fast::hash(&archive);
        Self {
            database: database.into(),
            checksum,
            archive,
        }
    }

    /// Verify the archive against the declared checksum.
    pub fn verify(&self) -> EngineResult<()> {
        let computed = crc32fast::hash(&self.archive);
        if computed != self.checksum {
            return Err(EngineError::SnapshotIntegrity {
                database: self.database.clone(),
                stored: self.checksum,
                computed,
            });
        }
        Ok(())
    }
}

/// The storage engine surface the replication core invokes.
///
/// Implementations must apply transactions deterministically: replaying
/// the same payload sequence from the same starting state yields the same
/// on-disk state.
pub trait StorageEngine: Send + Sync {
    /// Apply one committed transaction to a database.
    fn apply_transaction(&self, payload: &TransactionPayload) -> EngineResult<()>;

    /// Names of all databases on this node, sorted.
    fn database_names(&self) -> Vec<String>;

    /// Produce a full snapshot of one database.
    fn snapshot_database(&self, database: &str) -> EngineResult<DatabaseSnapshot>;

    /// Install a full snapshot, replacing any local state for that
    /// database. The checksum is verified before anything is touched.
    fn install_snapshot(&self, snapshot: &DatabaseSnapshot) -> EngineResult<()>;
}

const TXN_LOG: &str = "txn.log";

/// File-backed reference engine: each database is a directory holding an
/// append-only transaction log. Deterministic by construction, which makes
/// replica state comparable byte-for-byte in tests.
pub struct FileStorageEngine {
    databases_dir: PathBuf,
    // Serializes apply/install against snapshot reads.
    guard: Mutex<()>,
}

impl FileStorageEngine {
    /// Open the engine rooted at `<data_dir>/databases/`.
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        let databases_dir = data_dir.join("databases");
        fs::create_dir_all(&databases_dir)?;
        Ok(Self {
            databases_dir,
            guard: Mutex::new(()),
        })
    }

    /// Create an empty database if it does not exist.
    pub fn create_database(&self, name: &str) -> EngineResult<()> {
        let dir = self.databases_dir.join(name);
        fs::create_dir_all(&dir)?;
        let path = dir.join(TXN_LOG);
        if !path.exists() {
            File::create(&path)?.sync_all()?;
        }
        Ok(())
    }

    fn db_dir(&self, name: &str) -> EngineResult<PathBuf> {
        let dir = self.databases_dir.join(name);
        if !dir.is_dir() {
            return Err(EngineError::UnknownDatabase(name.to_string()));
        }
        Ok(dir)
    }

    /// All transaction bodies applied to a database, in order.
    pub fn read_transactions(&self, database: &str) -> EngineResult<Vec<Vec<u8>>> {
        let path = self.db_dir(database)?.join(TXN_LOG);
        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;

        let mut transactions = Vec::new();
        let mut cursor = 0usize;
        while cursor < bytes.len() {
            if cursor + 4 > bytes.len() {
                return Err(EngineError::MalformedPayload(
                    "truncated transaction log".to_string(),
                ));
            }
            let len =
                u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if cursor + len > bytes.len() {
                return Err(EngineError::MalformedPayload(
                    "transaction body exceeds log bounds".to_string(),
                ));
            }
            transactions.push(bytes[cursor..cursor + len].to_vec());
            cursor += len;
        }
        Ok(transactions)
    }

    /// CRC32 fingerprint of a database's applied state.
    pub fn state_fingerprint(&self, database: &str) -> EngineResult<u32> {
        let path = self.db_dir(database)?.join(TXN_LOG);
        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;
        Ok(crc32fast::hash(&bytes))
    }
}

impl StorageEngine for FileStorageEngine {
    fn apply_transaction(&self, payload: &TransactionPayload) -> EngineResult<()> {
        let _guard = self.guard.lock().unwrap();

        let dir = self.databases_dir.join(&payload.database);
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(TXN_LOG))?;
        file.write_all(&(payload.body.len() as u32).to_le_bytes())?;
        file.write_all(&payload.body)?;
        file.sync_all()?;
        Ok(())
    }

    fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.databases_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn snapshot_database(&self, database: &str) -> EngineResult<DatabaseSnapshot> {
        let _guard = self.guard.lock().unwrap();

        let dir = self.db_dir(database)?;
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(database, &dir)?;
        let archive = builder.into_inner()?;
        Ok(DatabaseSnapshot::new(database, archive))
    }

    fn install_snapshot(&self, snapshot: &DatabaseSnapshot) -> EngineResult<()> {
        snapshot.verify()?;

        let _guard = self.guard.lock().unwrap();

        let dir = self.databases_dir.join(&snapshot.database);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        let mut archive = tar::Archive::new(snapshot.archive.as_slice());
        archive.unpack(&self.databases_dir)?;
        Ok(())
    }
}
