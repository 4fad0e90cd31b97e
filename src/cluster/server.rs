//! The HA server: owns the role, the peer set, the connect handshake, and
//! the replication fan-out.
//!
//! Leader side, per accepted replica: one reader task consuming acks and
//! heartbeats, one writer task draining that peer's bounded command queue.
//! The append path assigns the next message number inside a single
//! critical section; fan-out enqueues to a snapshot of the peer set taken
//! inside the same section, so a replica that registers mid-append either
//! receives the push or reads the record from its backlog. Replicas treat
//! number overlaps as idempotent duplicates, so the two paths never
//! conflict.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::ReadHalf;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, RwLock};
use tokio::time::timeout;

use crate::channel::BinaryChannel;
use crate::engine::StorageEngine;
use crate::observability::{Event, Logger, Severity};
use crate::protocol::{Command, ErrorCode};
use crate::replog::ReplicationLog;
use crate::transport::{PeerListener, PeerStream, SocketFactory};

use super::config::ClusterConfig;
use super::errors::{ClusterError, ClusterResult};
use super::peer::{ConnectionState, Peer};
use super::quorum::{DurabilityLevel, QuorumTracker};
use super::replica::ReplicaClient;
use super::role::{RoleState, ServerRole};

/// Depth of each peer's outbound command queue. A replica that cannot
/// drain this many pushes is dropped and comes back through a resync.
const PEER_QUEUE_DEPTH: usize = 256;

/// Live connection to one streaming replica.
pub(crate) struct PeerHandle {
    pub(crate) info: StdMutex<Peer>,
    pub(crate) sender: mpsc::Sender<Command>,
}

enum ResyncDecision {
    Hot(u64),
    Full,
}

/// Role state machine and peer coordinator for one server process.
pub struct HaServer {
    pub(crate) config: ClusterConfig,
    role: StdMutex<RoleState>,
    advertised_address: StdMutex<Option<String>>,
    pub(crate) log: AsyncMutex<ReplicationLog>,
    pub(crate) storage: Arc<dyn StorageEngine>,
    peers: RwLock<HashMap<String, Arc<PeerHandle>>>,
    quorum: QuorumTracker,
    pub(crate) factory: Arc<SocketFactory>,
    shutdown: broadcast::Sender<()>,
}

impl HaServer {
    /// Create a stopped server; `start` brings it online in its configured
    /// role.
    pub fn new(
        config: ClusterConfig,
        storage: Arc<dyn StorageEngine>,
        factory: Arc<SocketFactory>,
    ) -> ClusterResult<Self> {
        config.validate()?;
        let log = ReplicationLog::open(&config.data_dir, config.log_sync)?;
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            config,
            role: StdMutex::new(RoleState::new()),
            advertised_address: StdMutex::new(None),
            log: AsyncMutex::new(log),
            storage,
            peers: RwLock::new(HashMap::new()),
            quorum: QuorumTracker::new(),
            factory,
            shutdown,
        })
    }

    /// Cluster-unique name of this server.
    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    /// Current role.
    pub fn role(&self) -> ServerRole {
        self.role.lock().unwrap().role()
    }

    /// Whether this node is the leader.
    pub fn is_leader(&self) -> bool {
        self.role.lock().unwrap().is_leader()
    }

    /// Address of the current leader: our own peer address when leading,
    /// the followed leader's address on a replica, none when offline.
    pub fn leader_url(&self) -> Option<String> {
        let role = self.role.lock().unwrap().clone();
        match role {
            RoleState::Leader => {
                let advertised = self.advertised_address.lock().unwrap().clone();
                Some(advertised.unwrap_or_else(|| self.config.listen_address.clone()))
            }
            RoleState::Replica { leader_url } => Some(leader_url),
            RoleState::Offline => None,
        }
    }

    /// Names of currently connected replicas, sorted.
    pub async fn replica_server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Advertised HTTP addresses of currently connected replicas, sorted
    /// by server name.
    pub async fn replica_http_addresses(&self) -> Vec<String> {
        let peers = self.peers.read().await;
        let mut entries: Vec<(String, String)> = peers
            .iter()
            .map(|(name, handle)| {
                let info = handle.info.lock().unwrap();
                (name.clone(), info.remote_http_address.clone())
            })
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, addr)| addr).collect()
    }

    /// Number of currently connected replicas.
    pub async fn replica_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Highest durable replication message number on this node.
    pub async fn last_message_number(&self) -> u64 {
        self.log.lock().await.last_message_number()
    }

    pub(crate) fn shutdown_subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// The single role-mutation path. Every transition goes through here
    /// so concurrent connection tasks can never observe a torn role.
    fn update_role(
        &self,
        f: impl FnOnce(RoleState) -> ClusterResult<RoleState>,
    ) -> ClusterResult<()> {
        let mut guard = self.role.lock().unwrap();
        let next = f(guard.clone())?;
        *guard = next;
        Ok(())
    }

    /// Re-point this replica at a new leader after a redirect.
    pub(crate) fn follow_new_leader(&self, leader_url: &str) -> ClusterResult<()> {
        self.update_role(|role| role.become_replica(leader_url))?;
        Event::LeaderChanged.emit(&[
            ("server", self.server_name()),
            ("leader", leader_url),
        ]);
        Ok(())
    }

    /// Demote to OFFLINE after a durability failure. The leader must never
    /// acknowledge a transaction it cannot guarantee.
    fn demote(&self, reason: &str) {
        let _ = self.update_role(|role| Ok(role.go_offline()));
        Logger::log_stderr(
            Severity::Fatal,
            Event::ServerOffline.as_str(),
            &[("server", self.server_name()), ("reason", reason)],
        );
    }

    /// Bring the server online in its configured role. For a leader the
    /// bound peer address is returned (the listener may have been bound to
    /// port 0).
    pub async fn start(self: Arc<Self>) -> ClusterResult<Option<SocketAddr>> {
        Event::ServerStarting.emit(&[
            ("server", self.server_name()),
            ("role", self.config.role.as_str()),
        ]);

        let bound = match self.config.role {
            ServerRole::Leader => {
                self.update_role(RoleState::become_leader)?;
                let listener = self.factory.bind(&self.config.listen_address).await?;
                let addr = listener.local_addr()?;
                *self.advertised_address.lock().unwrap() = Some(addr.to_string());

                let server = Arc::clone(&self);
                tokio::spawn(async move {
                    server.run_accept_loop(listener).await;
                });
                Some(addr)
            }
            ServerRole::Replica => {
                let leader = self
                    .config
                    .leader_address
                    .clone()
                    .expect("validated replica config carries leader_address");
                self.update_role(|role| role.become_replica(&leader))?;

                let server = Arc::clone(&self);
                tokio::spawn(async move {
                    ReplicaClient::run(server).await;
                });
                None
            }
            ServerRole::Offline => {
                return Err(ClusterError::configuration_error(
                    "cannot start in the OFFLINE role",
                ));
            }
        };

        Event::ServerUp.emit(&[("server", self.server_name())]);
        Ok(bound)
    }

    /// Stop serving: notify all tasks, drop peers, close the log.
    pub async fn shutdown(&self) {
        Event::ShutdownStart.emit(&[("server", self.server_name())]);
        let _ = self.shutdown.send(());
        self.peers.write().await.clear();
        let _ = self.log.lock().await.close();
        let _ = self.update_role(|role| Ok(role.go_offline()));
        Event::ShutdownComplete.emit(&[("server", self.server_name())]);
    }

    async fn run_accept_loop(self: Arc<Self>, listener: PeerListener) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    Logger::log(
                                        Severity::Warn,
                                        "PEER_CONNECTION_CLOSED",
                                        &[
                                            ("address", &peer_addr.to_string()),
                                            ("error", &e.to_string()),
                                        ],
                                    );
                                }
                            });
                        }
                        Err(e) => {
                            Logger::log(
                                Severity::Warn,
                                "PEER_ACCEPT_FAILED",
                                &[("error", &e.to_string())],
                            );
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Drive one replica connection: handshake, resync, then streaming.
    async fn handle_connection(
        self: Arc<Self>,
        stream: PeerStream,
        peer_addr: SocketAddr,
    ) -> ClusterResult<()> {
        let mut channel = BinaryChannel::new(stream);

        let first = match timeout(
            self.factory.read_timeout(),
            Command::read_from(&mut channel),
        )
        .await
        {
            Err(_) => {
                return Err(ClusterError::connection_failed(
                    "handshake read timed out",
                ))
            }
            Ok(result) => result?,
        };

        let Command::Connect {
            server_name,
            http_address,
            last_replication_message_number,
        } = first
        else {
            return Err(ClusterError::protocol_violation(
                "session must open with a connect request",
            ));
        };

        if !self.is_leader() {
            // Stale routing: tell the replica where the leader actually is.
            let leader_url = self.leader_url().unwrap_or_default();
            Command::Error {
                code: ErrorCode::NotTheLeader,
                message: "this server is not the leader".to_string(),
                leader_url,
            }
            .write_to(&mut channel)
            .await?;
            return Ok(());
        }

        let connection_id = uuid::Uuid::new_v4().to_string();
        let mut peer = Peer::new(
            &server_name,
            ServerRole::Replica,
            peer_addr.to_string(),
            &http_address,
        );
        peer.advance(ConnectionState::Handshaking)?;

        // Hot resync iff the replica has history and its next message is
        // still retained; everything else falls back to a full snapshot
        // bootstrap.
        let decision = {
            let log = self.log.lock().await;
            let requested = last_replication_message_number;
            if requested >= 0 && (requested as u64) <= log.last_message_number() {
                match log.read_from(requested as u64 + 1) {
                    Ok(_) => ResyncDecision::Hot(requested as u64 + 1),
                    Err(e) if e.is_message_not_found() => ResyncDecision::Full,
                    Err(e) => return Err(e.into()),
                }
            } else {
                ResyncDecision::Full
            }
        };

        let mut cursor = match decision {
            ResyncDecision::Hot(from) => {
                peer.advance(ConnectionState::HotResyncing)?;
                Event::HotResyncStarted.emit(&[
                    ("replica", &server_name),
                    ("from", &from.to_string()),
                ]);
                Command::HotResync {
                    from_message_number: from,
                }
                .write_to(&mut channel)
                .await?;
                from
            }
            ResyncDecision::Full => {
                peer.advance(ConnectionState::FullResyncing)?;
                // Snapshots are taken under the append lock so they are a
                // consistent cut at `last`; streaming resumes right above.
                let (last, snapshots) = {
                    let log = self.log.lock().await;
                    let last = log.last_message_number();
                    let names = self.storage.database_names();
                    let mut snapshots = Vec::with_capacity(names.len());
                    for name in &names {
                        snapshots.push(self.storage.snapshot_database(name)?);
                    }
                    (last, snapshots)
                };
                Event::FullResyncStarted.emit(&[
                    ("replica", &server_name),
                    ("last_message_number", &last.to_string()),
                ]);
                Command::FullResync {
                    last_message_number: last,
                    database_names: snapshots.iter().map(|s| s.database.clone()).collect(),
                }
                .write_to(&mut channel)
                .await?;
                for snapshot in snapshots {
                    Command::SnapshotDatabase {
                        database: snapshot.database,
                        checksum: snapshot.checksum,
                        archive: snapshot.archive,
                    }
                    .write_to(&mut channel)
                    .await?;
                }
                last + 1
            }
        };

        // Stream the backlog, then register the peer inside the append
        // critical section once caught up, so no push can slip past the
        // registration.
        let (tx, rx) = mpsc::channel::<Command>(PEER_QUEUE_DEPTH);
        let mut peer_slot = Some(peer);
        loop {
            let registered = {
                let log = self.log.lock().await;
                if log.last_message_number() < cursor {
                    let mut peer = peer_slot.take().expect("peer registered once");
                    peer.advance(ConnectionState::Streaming)?;
                    let handle = Arc::new(PeerHandle {
                        info: StdMutex::new(peer),
                        sender: tx.clone(),
                    });
                    self.peers
                        .write()
                        .await
                        .insert(server_name.clone(), Arc::clone(&handle));
                    Some(handle)
                } else {
                    None
                }
            };
            if let Some(handle) = registered {
                Event::ReplicaOnline.emit(&[
                    ("replica", &server_name),
                    ("address", &peer_addr.to_string()),
                    ("connection", &connection_id),
                ]);
                let result = self
                    .stream_to_peer(channel, rx, &server_name, Arc::clone(&handle))
                    .await;
                self.disconnect_peer(&server_name, Some(&handle)).await;
                return result;
            }

            let reader = {
                let log = self.log.lock().await;
                log.read_from(cursor)?
            };
            for entry in reader {
                let record = entry?;
                cursor = record.message_number + 1;
                Command::TxReplicate {
                    message_number: record.message_number,
                    sender_server_name: record.sender_server_name,
                    payload: record.payload,
                }
                .write_to(&mut channel)
                .await?;
            }
        }
    }

    /// Streaming phase: split the socket into a reader half (acks,
    /// heartbeats) and a writer half fed by the peer queue.
    async fn stream_to_peer(
        &self,
        channel: BinaryChannel<PeerStream>,
        rx: mpsc::Receiver<Command>,
        server_name: &str,
        handle: Arc<PeerHandle>,
    ) -> ClusterResult<()> {
        let stream = channel.into_inner();
        let (read_half, write_half) = tokio::io::split(stream);

        let heartbeat_interval = self.config.heartbeat_interval;
        let writer = tokio::spawn(async move {
            let mut channel = BinaryChannel::new(write_half);
            let mut rx = rx;
            let mut heartbeats = tokio::time::interval(heartbeat_interval);
            heartbeats.tick().await;
            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(command) => {
                            if command.write_to(&mut channel).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = heartbeats.tick() => {
                        if Command::Heartbeat.write_to(&mut channel).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let result = self
            .run_peer_reader(read_half, server_name, &handle)
            .await;
        writer.abort();
        result
    }

    async fn run_peer_reader(
        &self,
        read_half: ReadHalf<PeerStream>,
        server_name: &str,
        handle: &PeerHandle,
    ) -> ClusterResult<()> {
        let mut channel = BinaryChannel::new(read_half);
        let window = self.config.heartbeat_window();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            let command = tokio::select! {
                read = timeout(window, Command::read_from(&mut channel)) => match read {
                    Err(_) => {
                        return Err(ClusterError::connection_failed(format!(
                            "replica {} silent for {} heartbeat intervals",
                            server_name, self.config.heartbeat_misses
                        )))
                    }
                    Ok(Ok(command)) => command,
                    Ok(Err(e)) => return Err(e.into()),
                },
                _ = shutdown_rx.recv() => return Ok(()),
            };

            match command {
                Command::Ack { message_number } => {
                    handle.info.lock().unwrap().record_ack(message_number)?;
                    self.quorum.ack(server_name, message_number);
                }
                // Any frame refreshes liveness; heartbeat needs no reply
                // here because the writer half probes on its own timer.
                Command::Heartbeat => {}
                other => {
                    return Err(ClusterError::protocol_violation(format!(
                        "unexpected {:?} frame from streaming replica",
                        other.command_type()
                    )))
                }
            }
        }
    }

    /// Remove a peer registration. When `handle` is given, only that exact
    /// registration is removed; a reconnected replica that re-registered
    /// under the same name is left alone when the stale connection's
    /// cleanup runs late.
    pub(crate) async fn disconnect_peer(
        &self,
        server_name: &str,
        handle: Option<&Arc<PeerHandle>>,
    ) {
        let mut peers = self.peers.write().await;
        let is_current = match (peers.get(server_name), handle) {
            (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if is_current {
            peers.remove(server_name);
            Event::ReplicaOffline.emit(&[("replica", server_name)]);
        }
    }

    /// Leader write path: assign the next message number, persist the
    /// record, push it to every connected replica, and suspend until the
    /// requested durability level is satisfied.
    ///
    /// On a non-leader this fails with a redirect carrying the leader's
    /// address. A quorum timeout leaves the leader-local append durable.
    pub async fn append_and_replicate(
        &self,
        payload: &[u8],
        durability: DurabilityLevel,
    ) -> ClusterResult<u64> {
        {
            let role = self.role.lock().unwrap().clone();
            if !role.can_accept_writes() {
                return Err(ClusterError::not_the_leader(
                    role.leader_url().unwrap_or("").to_string(),
                ));
            }
        }

        let (number, wait_rx, stale) = {
            let mut log = self.log.lock().await;
            let number = match log.append(&self.config.server_name, payload) {
                Ok(number) => number,
                Err(e) => {
                    drop(log);
                    let reason = format!("replication log append failed: {}", e);
                    self.demote(&reason);
                    return Err(ClusterError::demoted(reason));
                }
            };

            let peers = self.peers.read().await;
            let required = durability.required_acks(peers.len());
            let wait_rx = self.quorum.register(number, required);

            let mut stale = Vec::new();
            for (name, handle) in peers.iter() {
                let command = Command::TxReplicate {
                    message_number: number,
                    sender_server_name: self.config.server_name.clone(),
                    payload: payload.to_vec(),
                };
                if handle.sender.try_send(command).is_err() {
                    // Queue full or writer gone: this replica cannot keep
                    // up and must come back through a resync.
                    stale.push(name.clone());
                }
            }
            (number, wait_rx, stale)
        };

        for name in &stale {
            self.disconnect_peer(name, None).await;
        }

        self.maybe_prune().await;

        if let Some(rx) = wait_rx {
            if let Err(e) = self
                .quorum
                .wait(number, rx, self.config.quorum_timeout)
                .await
            {
                Event::QuorumTimeout.emit(&[
                    ("message_number", &number.to_string()),
                    ("level", durability.as_str()),
                ]);
                return Err(e);
            }
        }

        Ok(number)
    }

    /// Apply the configured retention, pruning once the retained tail has
    /// grown to twice the floor so the rewrite cost amortizes.
    async fn maybe_prune(&self) {
        let retain = self.config.retain_min_messages;
        if retain == 0 {
            return;
        }
        let mut log = self.log.lock().await;
        let first = log.first_message_number();
        let last = log.last_message_number();
        if first == 0 {
            return;
        }
        let retained = last - first + 1;
        if retained >= retain * 2 {
            let floor = last - retain + 1;
            match log.prune_to(floor) {
                Ok(()) => {
                    Event::LogPruned.emit(&[("first_retained", &floor.to_string())]);
                }
                Err(e) => {
                    Logger::log(
                        Severity::Error,
                        "LOG_PRUNE_FAILED",
                        &[("error", &e.to_string())],
                    );
                }
            }
        }
    }
}
