//! Durability levels and quorum acknowledgment tracking.
//!
//! The leader's commit-completion path waits here until the configured
//! durability level is satisfied or a deadline fires. A timeout never
//! rolls back the leader's own durable append; the caller decides whether
//! success-with-risk is acceptable.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

use super::errors::{ClusterError, ClusterResult};

/// Requested durability of one committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityLevel {
    /// Fire-and-forget
    None,
    /// Durable once logged on the leader
    #[default]
    LeaderOnly,
    /// Durable once a majority of connected replicas acknowledge
    Quorum,
    /// Durable once every connected replica acknowledges
    All,
}

impl DurabilityLevel {
    /// Replica acknowledgments required at this level, given the number of
    /// replicas connected at append time.
    pub fn required_acks(&self, replica_count: usize) -> usize {
        match self {
            DurabilityLevel::None | DurabilityLevel::LeaderOnly => 0,
            DurabilityLevel::Quorum => {
                if replica_count == 0 {
                    0
                } else {
                    replica_count / 2 + 1
                }
            }
            DurabilityLevel::All => replica_count,
        }
    }

    /// Returns the level name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DurabilityLevel::None => "NONE",
            DurabilityLevel::LeaderOnly => "LEADER_ONLY",
            DurabilityLevel::Quorum => "QUORUM",
            DurabilityLevel::All => "ALL",
        }
    }
}

struct Waiter {
    required: usize,
    acks: HashSet<String>,
    notify: Option<oneshot::Sender<()>>,
}

/// Tracks outstanding quorum waits, keyed by message number.
#[derive(Default)]
pub struct QuorumTracker {
    waiters: Mutex<HashMap<u64, Waiter>>,
}

impl QuorumTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `message_number`. Returns `None` when the level
    /// requires no replica acknowledgment.
    pub fn register(&self, message_number: u64, required: usize) -> Option<oneshot::Receiver<()>> {
        if required == 0 {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(
            message_number,
            Waiter {
                required,
                acks: HashSet::new(),
                notify: Some(tx),
            },
        );
        Some(rx)
    }

    /// Record one replica's acknowledgment. Late acks for numbers with no
    /// registered waiter are ignored; duplicate acks from the same replica
    /// count once.
    pub fn ack(&self, server_name: &str, message_number: u64) {
        let mut waiters = self.waiters.lock().unwrap();
        let satisfied = {
            let Some(waiter) = waiters.get_mut(&message_number) else {
                return;
            };
            waiter.acks.insert(server_name.to_string());
            if waiter.acks.len() >= waiter.required {
                if let Some(tx) = waiter.notify.take() {
                    let _ = tx.send(());
                }
                true
            } else {
                false
            }
        };
        if satisfied {
            waiters.remove(&message_number);
        }
    }

    /// Drop a wait without satisfying it (timeout cleanup).
    pub fn abandon(&self, message_number: u64) {
        self.waiters.lock().unwrap().remove(&message_number);
    }

    /// Number of outstanding waits.
    pub fn pending(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }

    /// Suspend until the registered wait is satisfied or `deadline`
    /// expires.
    pub async fn wait(
        &self,
        message_number: u64,
        receiver: oneshot::Receiver<()>,
        deadline: Duration,
    ) -> ClusterResult<()> {
        match timeout(deadline, receiver).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.abandon(message_number);
                Err(ClusterError::quorum_timeout(format!(
                    "quorum wait for message {} was abandoned",
                    message_number
                )))
            }
            Err(_) => {
                self.abandon(message_number);
                Err(ClusterError::quorum_timeout(format!(
                    "quorum for message {} not reached within {} ms",
                    message_number,
                    deadline.as_millis()
                )))
            }
        }
    }
}
