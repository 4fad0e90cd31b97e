//! Two-node cluster scenarios over real sockets.
//!
//! The client side of a commit is emulated the way the engine drives it:
//! the transaction is executed against the leader's storage engine, then
//! the committed unit enters the replication path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stratadb_repl::channel::BinaryChannel;
use stratadb_repl::cluster::{
    ClusterConfig, ClusterErrorKind, DurabilityLevel, HaServer, ReplicationSink,
};
use stratadb_repl::engine::{FileStorageEngine, StorageEngine, TransactionPayload};
use stratadb_repl::pipeline::{AsyncWritePipeline, PipelineConfig, WriteUnit};
use stratadb_repl::protocol::Command;
use stratadb_repl::transport::{SocketFactory, TransportConfig};
use tempfile::TempDir;

fn tuned(mut config: ClusterConfig) -> ClusterConfig {
    config.heartbeat_interval = Duration::from_millis(100);
    config.heartbeat_misses = 10;
    config.reconnect_delay = Duration::from_millis(100);
    config.quorum_timeout = Duration::from_secs(5);
    config
}

async fn start_server(
    config: ClusterConfig,
    tmp: &TempDir,
) -> (Arc<HaServer>, Arc<FileStorageEngine>, Option<SocketAddr>) {
    let storage = Arc::new(FileStorageEngine::open(tmp.path()).unwrap());
    let factory = Arc::new(SocketFactory::new(TransportConfig::default()).unwrap());
    let server = Arc::new(HaServer::new(config, storage.clone(), factory).unwrap());
    let addr = Arc::clone(&server).start().await.unwrap();
    (server, storage, addr)
}

async fn start_leader(tmp: &TempDir) -> (Arc<HaServer>, Arc<FileStorageEngine>, SocketAddr) {
    let config = tuned(ClusterConfig::leader("leader-1", tmp.path(), "127.0.0.1:0"));
    let (server, storage, addr) = start_server(config, tmp).await;
    (server, storage, addr.expect("leader binds a peer listener"))
}

async fn start_replica(
    name: &str,
    tmp: &TempDir,
    leader_addr: SocketAddr,
) -> (Arc<HaServer>, Arc<FileStorageEngine>) {
    let config = tuned(ClusterConfig::replica(
        name,
        tmp.path(),
        "127.0.0.1:0",
        leader_addr.to_string(),
    ));
    let (server, storage, _) = start_server(config, tmp).await;
    (server, storage)
}

/// Execute-and-commit as the engine would, then replicate.
async fn commit(
    leader: &Arc<HaServer>,
    storage: &FileStorageEngine,
    value: u32,
    level: DurabilityLevel,
) -> u64 {
    let transaction = TransactionPayload::new("orders", value.to_be_bytes().to_vec());
    storage.apply_transaction(&transaction).unwrap();
    leader
        .append_and_replicate(&transaction.encode(), level)
        .await
        .unwrap()
}

async fn wait_for_message(server: &Arc<HaServer>, target: u64) {
    for _ in 0..200 {
        if server.last_message_number().await >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "server {} stuck at {} waiting for {}",
        server.server_name(),
        server.last_message_number().await,
        target
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replica_streams_live_appends() {
    let leader_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    let (leader, leader_storage, leader_addr) = start_leader(&leader_dir).await;
    let (replica, replica_storage) = start_replica("replica-1", &replica_dir, leader_addr).await;

    for i in 1..=25u32 {
        commit(&leader, &leader_storage, i, DurabilityLevel::LeaderOnly).await;
    }
    wait_for_message(&replica, 25).await;

    assert_eq!(replica.last_message_number().await, 25);
    assert_eq!(
        leader_storage.state_fingerprint("orders").unwrap(),
        replica_storage.state_fingerprint("orders").unwrap()
    );

    // Idle connection stays alive across several heartbeat windows.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(leader.replica_count().await, 1);
    assert_eq!(leader.replica_server_names().await, vec!["replica-1"]);

    replica.shutdown().await;
    leader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hot_resync_resumes_from_disconnect_point() {
    let leader_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    let (leader, leader_storage, leader_addr) = start_leader(&leader_dir).await;

    for i in 1..=50u32 {
        commit(&leader, &leader_storage, i, DurabilityLevel::LeaderOnly).await;
    }

    // First session catches up to 50, then disconnects.
    {
        let (replica, _storage) = start_replica("replica-1", &replica_dir, leader_addr).await;
        wait_for_message(&replica, 50).await;
        replica.shutdown().await;
    }

    for i in 51..=100u32 {
        commit(&leader, &leader_storage, i, DurabilityLevel::LeaderOnly).await;
    }

    // Reconnect with retained history resumes at 51 and reaches 100.
    let (replica, replica_storage) = start_replica("replica-1", &replica_dir, leader_addr).await;
    wait_for_message(&replica, 100).await;

    assert_eq!(replica.last_message_number().await, 100);
    assert_eq!(
        leader_storage.state_fingerprint("orders").unwrap(),
        replica_storage.state_fingerprint("orders").unwrap()
    );

    replica.shutdown().await;
    leader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pruned_history_falls_back_to_full_resync() {
    let leader_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();

    let mut config = tuned(ClusterConfig::leader("leader-1", leader_dir.path(), "127.0.0.1:0"));
    config.retain_min_messages = 20;
    let (leader, leader_storage, addr) = start_server(config, &leader_dir).await;
    let leader_addr = addr.unwrap();

    for i in 1..=50u32 {
        commit(&leader, &leader_storage, i, DurabilityLevel::LeaderOnly).await;
    }

    {
        let (replica, _storage) = start_replica("replica-1", &replica_dir, leader_addr).await;
        wait_for_message(&replica, 50).await;
        replica.shutdown().await;
    }

    // Retention prunes far past message 51 while the replica is away.
    for i in 51..=200u32 {
        commit(&leader, &leader_storage, i, DurabilityLevel::LeaderOnly).await;
    }

    let (replica, replica_storage) = start_replica("replica-1", &replica_dir, leader_addr).await;
    wait_for_message(&replica, 200).await;

    assert_eq!(replica.last_message_number().await, 200);
    assert_eq!(
        leader_storage.state_fingerprint("orders").unwrap(),
        replica_storage.state_fingerprint("orders").unwrap()
    );

    replica.shutdown().await;
    leader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_with_retained_offset_yields_hot_resync_response() {
    let leader_dir = TempDir::new().unwrap();
    let (leader, leader_storage, leader_addr) = start_leader(&leader_dir).await;

    for i in 1..=100u32 {
        commit(&leader, &leader_storage, i, DurabilityLevel::LeaderOnly).await;
    }

    let factory = SocketFactory::new(TransportConfig::default()).unwrap();
    let stream = factory.connect(&leader_addr.to_string()).await.unwrap();
    let mut channel = BinaryChannel::new(stream);

    Command::Connect {
        server_name: "probe".to_string(),
        http_address: String::new(),
        last_replication_message_number: 50,
    }
    .write_to(&mut channel)
    .await
    .unwrap();

    let response = Command::read_from(&mut channel).await.unwrap();
    assert_eq!(
        response,
        Command::HotResync {
            from_message_number: 51
        }
    );

    // The backlog replay starts exactly at the resume point.
    let first = Command::read_from(&mut channel).await.unwrap();
    match first {
        Command::TxReplicate { message_number, .. } => assert_eq!(message_number, 51),
        other => panic!("expected a replicated transaction, got {:?}", other),
    }

    leader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_below_retention_yields_full_resync_response() {
    let leader_dir = TempDir::new().unwrap();
    let mut config = tuned(ClusterConfig::leader("leader-1", leader_dir.path(), "127.0.0.1:0"));
    config.retain_min_messages = 20;
    let (leader, leader_storage, addr) = start_server(config, &leader_dir).await;
    let leader_addr = addr.unwrap();

    for i in 1..=200u32 {
        commit(&leader, &leader_storage, i, DurabilityLevel::LeaderOnly).await;
    }

    let factory = SocketFactory::new(TransportConfig::default()).unwrap();
    let stream = factory.connect(&leader_addr.to_string()).await.unwrap();
    let mut channel = BinaryChannel::new(stream);

    Command::Connect {
        server_name: "probe".to_string(),
        http_address: String::new(),
        last_replication_message_number: 50,
    }
    .write_to(&mut channel)
    .await
    .unwrap();

    let response = Command::read_from(&mut channel).await.unwrap();
    match response {
        Command::FullResync {
            last_message_number,
            database_names,
        } => {
            assert_eq!(last_message_number, 200);
            assert_eq!(database_names, vec!["orders".to_string()]);
        }
        other => panic!("expected a full resync order, got {:?}", other),
    }

    leader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn write_to_replica_redirects_to_leader() {
    let leader_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    let (leader, _leader_storage, leader_addr) = start_leader(&leader_dir).await;
    let (replica, _replica_storage) = start_replica("replica-1", &replica_dir, leader_addr).await;

    let payload = TransactionPayload::new("orders", b"misrouted".to_vec()).encode();
    let err = replica
        .append_and_replicate(&payload, DurabilityLevel::LeaderOnly)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ClusterErrorKind::NotTheLeader);
    assert_eq!(err.leader_url.as_deref(), Some(leader_addr.to_string().as_str()));
    assert!(err.is_redirect());

    replica.shutdown().await;
    leader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quorum_is_satisfied_by_replica_acks() {
    let leader_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    let (leader, leader_storage, leader_addr) = start_leader(&leader_dir).await;
    let (replica, _replica_storage) = start_replica("replica-1", &replica_dir, leader_addr).await;

    // Wait for the replica to finish its handshake and register.
    for _ in 0..100 {
        if leader.replica_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(leader.replica_count().await, 1);

    let number = commit(&leader, &leader_storage, 1, DurabilityLevel::Quorum).await;
    assert_eq!(number, 1);

    replica.shutdown().await;
    leader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quorum_timeout_leaves_leader_append_durable() {
    let leader_dir = TempDir::new().unwrap();
    let mut config = tuned(ClusterConfig::leader("leader-1", leader_dir.path(), "127.0.0.1:0"));
    config.quorum_timeout = Duration::from_millis(300);
    let (leader, _leader_storage, addr) = start_server(config, &leader_dir).await;
    let leader_addr = addr.unwrap();

    // A peer that completes the handshake but never acknowledges.
    let factory = SocketFactory::new(TransportConfig::default()).unwrap();
    let stream = factory.connect(&leader_addr.to_string()).await.unwrap();
    let mut channel = BinaryChannel::new(stream);
    Command::Connect {
        server_name: "silent-replica".to_string(),
        http_address: String::new(),
        last_replication_message_number: -1,
    }
    .write_to(&mut channel)
    .await
    .unwrap();
    match Command::read_from(&mut channel).await.unwrap() {
        Command::FullResync { .. } => {}
        other => panic!("expected a full resync order, got {:?}", other),
    }
    for _ in 0..100 {
        if leader.replica_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let payload = TransactionPayload::new("orders", b"risky".to_vec()).encode();
    let err = leader
        .append_and_replicate(&payload, DurabilityLevel::Quorum)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ClusterErrorKind::QuorumTimeout);
    // The leader-local append stands; the caller decides what the timeout
    // means.
    assert_eq!(leader.last_message_number().await, 1);

    leader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipeline_feeds_the_replication_path() {
    let leader_dir = TempDir::new().unwrap();
    let (leader, _leader_storage, _leader_addr) = start_leader(&leader_dir).await;

    let sink = Arc::new(ReplicationSink::new(
        Arc::clone(&leader),
        DurabilityLevel::LeaderOnly,
    ));
    let config = PipelineConfig {
        parallel_level: 2,
        queue_capacity: 16,
        ..PipelineConfig::default()
    };
    let pipeline = AsyncWritePipeline::start(config, sink, None).unwrap();

    let total = 20u32;
    let handle = tokio::task::spawn_blocking({
        let pipeline = pipeline;
        move || {
            for i in 0..total {
                let payload =
                    TransactionPayload::new("orders", i.to_be_bytes().to_vec()).encode();
                pipeline
                    .enqueue(WriteUnit::new(i.to_be_bytes(), payload))
                    .unwrap();
            }
            pipeline.wait_completion();
            pipeline.counters()
        }
    });

    let (enqueued, processed, errored) = handle.await.unwrap();
    assert_eq!(enqueued, u64::from(total));
    assert_eq!(processed, u64::from(total));
    assert_eq!(errored, 0);
    assert_eq!(leader.last_message_number().await, u64::from(total));

    leader.shutdown().await;
}
