//! Replica side: connect to the leader, resync, then apply the stream.
//!
//! The apply loop is strict: each incoming message must extend the local
//! log by exactly one. A duplicate (number already applied) is ignored and
//! re-acknowledged; a gap is a protocol violation that tears the
//! connection down and forces a resync on reconnect. Redirects from a
//! non-leader node are followed transparently up to the configured retry
//! limit.

use std::sync::Arc;

use tokio::time::{sleep, timeout};

use crate::channel::BinaryChannel;
use crate::engine::{DatabaseSnapshot, TransactionPayload};
use crate::observability::{Event, Logger, Severity};
use crate::protocol::{Command, ErrorCode};
use crate::replog::LogRecord;
use crate::transport::PeerStream;

use super::errors::{ClusterError, ClusterResult};
use super::server::HaServer;

pub(crate) struct ReplicaClient;

impl ReplicaClient {
    /// Follow the leader until shutdown, reconnecting (and resyncing)
    /// after every failure.
    pub(crate) async fn run(server: Arc<HaServer>) {
        let mut shutdown_rx = server.shutdown_subscribe();
        let mut redirects_left = server.config.redirect_retry_limit;

        loop {
            let Some(leader) = server.leader_url() else {
                break;
            };

            let outcome = tokio::select! {
                result = Self::connect_and_stream(&server, &leader) => result,
                _ = shutdown_rx.recv() => break,
            };

            match outcome {
                Ok(()) => break,
                Err(e) if e.is_redirect() && redirects_left > 0 => {
                    redirects_left -= 1;
                    let new_leader = e.leader_url.clone().expect("redirect carries a url");
                    if server.follow_new_leader(&new_leader).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    Logger::log(
                        Severity::Warn,
                        "REPLICA_STREAM_LOST",
                        &[
                            ("server", server.server_name()),
                            ("leader", &leader),
                            ("error", &e.to_string()),
                        ],
                    );
                    // A fresh connection gets a fresh redirect allowance.
                    redirects_left = server.config.redirect_retry_limit;
                    tokio::select! {
                        _ = sleep(server.config.reconnect_delay) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        }
    }

    async fn connect_and_stream(server: &Arc<HaServer>, leader: &str) -> ClusterResult<()> {
        let stream = server.factory.connect(leader).await?;
        let mut channel = BinaryChannel::new(stream);

        let last = {
            let log = server.log.lock().await;
            let n = log.last_message_number();
            // -1 announces no prior history at all.
            if n == 0 {
                -1
            } else {
                n as i64
            }
        };

        Command::Connect {
            server_name: server.server_name().to_string(),
            http_address: server.config.http_address.clone(),
            last_replication_message_number: last,
        }
        .write_to(&mut channel)
        .await?;

        let response = match timeout(
            server.factory.read_timeout(),
            Command::read_from(&mut channel),
        )
        .await
        {
            Err(_) => {
                return Err(ClusterError::connection_failed(
                    "handshake response timed out",
                ))
            }
            Ok(result) => result?,
        };

        match response {
            Command::HotResync {
                from_message_number,
            } => {
                Event::HotResyncStarted.emit(&[
                    ("server", server.server_name()),
                    ("from", &from_message_number.to_string()),
                ]);
            }
            Command::FullResync {
                last_message_number,
                database_names,
            } => {
                Self::install_full_resync(server, &mut channel, last_message_number, database_names)
                    .await?;
            }
            Command::Error {
                code: ErrorCode::NotTheLeader,
                leader_url,
                ..
            } => {
                return Err(ClusterError::not_the_leader(leader_url));
            }
            other => {
                return Err(ClusterError::protocol_violation(format!(
                    "unexpected {:?} frame in handshake response",
                    other.command_type()
                )));
            }
        }

        Self::stream_loop(server, channel).await
    }

    /// Receive and install every announced snapshot, then reset the local
    /// log to the leader's checkpoint.
    async fn install_full_resync(
        server: &Arc<HaServer>,
        channel: &mut BinaryChannel<PeerStream>,
        last_message_number: u64,
        database_names: Vec<String>,
    ) -> ClusterResult<()> {
        Event::FullResyncStarted.emit(&[
            ("server", server.server_name()),
            ("last_message_number", &last_message_number.to_string()),
        ]);

        for expected in &database_names {
            let frame = match timeout(
                server.factory.read_timeout(),
                Command::read_from(channel),
            )
            .await
            {
                Err(_) => {
                    return Err(ClusterError::connection_failed(
                        "snapshot transfer timed out",
                    ))
                }
                Ok(result) => result?,
            };
            let Command::SnapshotDatabase {
                database,
                checksum,
                archive,
            } = frame
            else {
                return Err(ClusterError::protocol_violation(
                    "expected a database snapshot frame",
                ));
            };
            if &database != expected {
                return Err(ClusterError::protocol_violation(format!(
                    "snapshot for {} arrived while {} was announced",
                    database, expected
                )));
            }

            // Checksum is verified before anything local is replaced.
            let snapshot = DatabaseSnapshot {
                database,
                checksum,
                archive,
            };
            server.storage.install_snapshot(&snapshot)?;
        }

        {
            let mut log = server.log.lock().await;
            log.reset(last_message_number)?;
        }
        Event::LogReset.emit(&[(
            "checkpoint",
            &last_message_number.to_string(),
        )]);
        Event::FullResyncComplete.emit(&[("server", server.server_name())]);
        Ok(())
    }

    /// Apply incoming messages strictly in ascending number order.
    async fn stream_loop(
        server: &Arc<HaServer>,
        mut channel: BinaryChannel<PeerStream>,
    ) -> ClusterResult<()> {
        let window = server.config.heartbeat_window();
        let mut shutdown_rx = server.shutdown_subscribe();

        loop {
            let command = tokio::select! {
                read = timeout(window, Command::read_from(&mut channel)) => match read {
                    Err(_) => {
                        return Err(ClusterError::connection_failed(format!(
                            "leader silent for {} heartbeat intervals",
                            server.config.heartbeat_misses
                        )))
                    }
                    Ok(Ok(command)) => command,
                    Ok(Err(e)) => return Err(e.into()),
                },
                _ = shutdown_rx.recv() => return Ok(()),
            };

            match command {
                Command::Heartbeat => {
                    Command::Heartbeat.write_to(&mut channel).await?;
                }
                Command::TxReplicate {
                    message_number,
                    sender_server_name,
                    payload,
                } => {
                    {
                        let mut log = server.log.lock().await;
                        let expected = log.last_message_number() + 1;
                        if message_number > expected {
                            // Gapped stream is a fatal protocol violation
                            // for this connection; reconnect resyncs.
                            return Err(ClusterError::protocol_violation(format!(
                                "replication gap: expected {}, received {}",
                                expected, message_number
                            )));
                        }
                        if message_number == expected {
                            let transaction = TransactionPayload::decode(&payload)?;
                            server.storage.apply_transaction(&transaction)?;
                            log.append_message(&LogRecord::new(
                                message_number,
                                sender_server_name,
                                payload,
                            ))?;
                        }
                        // message_number < expected: idempotent duplicate
                        // from a registration race; fall through to re-ack.
                    }
                    Command::Ack { message_number }.write_to(&mut channel).await?;
                }
                Command::Error {
                    code: ErrorCode::NotTheLeader,
                    leader_url,
                    ..
                } => {
                    return Err(ClusterError::not_the_leader(leader_url));
                }
                other => {
                    return Err(ClusterError::protocol_violation(format!(
                        "unexpected {:?} frame in replication stream",
                        other.command_type()
                    )));
                }
            }
        }
    }
}
