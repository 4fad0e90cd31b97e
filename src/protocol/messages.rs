//! Request/response command payloads exchanged between leader and replicas.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::channel::BinaryChannel;

use super::errors::{ProtocolError, ProtocolResult};

/// Current peer protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Command type ids on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    /// Replica opens the handshake
    Connect = 0,
    /// Leader resumes the replica from a retained log offset
    HotResync = 1,
    /// Leader orders a snapshot bootstrap
    FullResync = 2,
    /// One database snapshot archive during full resync
    SnapshotDatabase = 3,
    /// One replicated transaction unit
    TxReplicate = 4,
    /// Replica acknowledgment of an applied message
    Ack = 5,
    /// Liveness probe
    Heartbeat = 6,
    /// Failure response, including leader redirects
    Error = 7,
}

impl CommandType {
    /// Convert from u8, returns None for unknown ids.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CommandType::Connect),
            1 => Some(CommandType::HotResync),
            2 => Some(CommandType::FullResync),
            3 => Some(CommandType::SnapshotDatabase),
            4 => Some(CommandType::TxReplicate),
            5 => Some(CommandType::Ack),
            6 => Some(CommandType::Heartbeat),
            7 => Some(CommandType::Error),
            _ => None,
        }
    }

    /// Convert to u8.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Error codes carried by [`Command::Error`] frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// The addressed node is not the leader; `leader_url` names it
    NotTheLeader = 0,
    /// Internal failure on the remote node
    Internal = 1,
}

impl ErrorCode {
    /// Convert from u8, returns None for unknown codes.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::NotTheLeader),
            1 => Some(ErrorCode::Internal),
            _ => None,
        }
    }
}

/// The peer command set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replica -> leader: open the handshake.
    ///
    /// `last_replication_message_number` is -1 when the replica has no
    /// prior history.
    Connect {
        server_name: String,
        http_address: String,
        last_replication_message_number: i64,
    },

    /// Leader -> replica: resume streaming from a retained offset.
    HotResync { from_message_number: u64 },

    /// Leader -> replica: bootstrap from snapshots; streaming resumes at
    /// `last_message_number + 1`.
    FullResync {
        last_message_number: u64,
        database_names: Vec<String>,
    },

    /// Leader -> replica: one database snapshot during full resync.
    SnapshotDatabase {
        database: String,
        checksum: u32,
        archive: Vec<u8>,
    },

    /// Leader -> replica: one replicated transaction unit.
    TxReplicate {
        message_number: u64,
        sender_server_name: String,
        payload: Vec<u8>,
    },

    /// Replica -> leader: the named message is applied and durable.
    Ack { message_number: u64 },

    /// Either direction: liveness probe, echoed by the receiver.
    Heartbeat,

    /// Failure response. For `NotTheLeader` the `leader_url` carries the
    /// address callers must transparently retry against.
    Error {
        code: ErrorCode,
        message: String,
        leader_url: String,
    },
}

impl Command {
    /// The wire type id of this command.
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Connect { .. } => CommandType::Connect,
            Command::HotResync { .. } => CommandType::HotResync,
            Command::FullResync { .. } => CommandType::FullResync,
            Command::SnapshotDatabase { .. } => CommandType::SnapshotDatabase,
            Command::TxReplicate { .. } => CommandType::TxReplicate,
            Command::Ack { .. } => CommandType::Ack,
            Command::Heartbeat => CommandType::Heartbeat,
            Command::Error { .. } => CommandType::Error,
        }
    }

    /// Write one complete frame and flush it.
    pub async fn write_to<S: AsyncWrite + Unpin>(
        &self,
        channel: &mut BinaryChannel<S>,
    ) -> ProtocolResult<()> {
        channel.write_version(PROTOCOL_VERSION).await?;
        channel.write_u8(self.command_type().as_u8()).await?;

        match self {
            Command::Connect {
                server_name,
                http_address,
                last_replication_message_number,
            } => {
                channel.write_string(server_name).await?;
                channel.write_string(http_address).await?;
                channel.write_i64(*last_replication_message_number).await?;
            }
            Command::HotResync {
                from_message_number,
            } => {
                channel.write_u64(*from_message_number).await?;
            }
            Command::FullResync {
                last_message_number,
                database_names,
            } => {
                channel.write_u64(*last_message_number).await?;
                channel.write_u32(database_names.len() as u32).await?;
                for name in database_names {
                    channel.write_string(name).await?;
                }
            }
            Command::SnapshotDatabase {
                database,
                checksum,
                archive,
            } => {
                channel.write_string(database).await?;
                channel.write_u32(*checksum).await?;
                channel.write_var_bytes(archive).await?;
            }
            Command::TxReplicate {
                message_number,
                sender_server_name,
                payload,
            } => {
                channel.write_u64(*message_number).await?;
                channel.write_string(sender_server_name).await?;
                channel.write_var_bytes(payload).await?;
            }
            Command::Ack { message_number } => {
                channel.write_u64(*message_number).await?;
            }
            Command::Heartbeat => {}
            Command::Error {
                code,
                message,
                leader_url,
            } => {
                channel.write_u8(*code as u8).await?;
                channel.write_string(message).await?;
                channel.write_string(leader_url).await?;
            }
        }

        channel.flush().await?;
        Ok(())
    }

    /// Read one complete frame, rejecting unknown versions and type ids.
    pub async fn read_from<S: AsyncRead + Unpin>(
        channel: &mut BinaryChannel<S>,
    ) -> ProtocolResult<Command> {
        channel.read_version(PROTOCOL_VERSION).await?;

        let type_id = channel.read_u8().await?;
        let command_type =
            CommandType::from_u8(type_id).ok_or(ProtocolError::UnknownCommand(type_id))?;

        let command = match command_type {
            CommandType::Connect => Command::Connect {
                server_name: channel.read_string().await?,
                http_address: channel.read_string().await?,
                last_replication_message_number: channel.read_i64().await?,
            },
            CommandType::HotResync => Command::HotResync {
                from_message_number: channel.read_u64().await?,
            },
            CommandType::FullResync => {
                let last_message_number = channel.read_u64().await?;
                let count = channel.read_u32().await?;
                let mut database_names = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    database_names.push(channel.read_string().await?);
                }
                Command::FullResync {
                    last_message_number,
                    database_names,
                }
            }
            CommandType::SnapshotDatabase => Command::SnapshotDatabase {
                database: channel.read_string().await?,
                checksum: channel.read_u32().await?,
                archive: channel.read_var_bytes().await?,
            },
            CommandType::TxReplicate => Command::TxReplicate {
                message_number: channel.read_u64().await?,
                sender_server_name: channel.read_string().await?,
                payload: channel.read_var_bytes().await?,
            },
            CommandType::Ack => Command::Ack {
                message_number: channel.read_u64().await?,
            },
            CommandType::Heartbeat => Command::Heartbeat,
            CommandType::Error => {
                let raw_code = channel.read_u8().await?;
                let code = ErrorCode::from_u8(raw_code)
                    .ok_or(ProtocolError::UnknownErrorCode(raw_code))?;
                Command::Error {
                    code,
                    message: channel.read_string().await?,
                    leader_url: channel.read_string().await?,
                }
            }
        };

        Ok(command)
    }
}
