//! Leader election among redundant instances.
//!
//! Every replica tracks the same clusters and serves the same queries; only the leader
//! sends notifications. A `CoordinationLock` provider supplies the mutual exclusion and
//! the `LeaderElector` drives the state machine on top of it.

pub mod elector;
#[cfg(feature = "kubernetes")]
pub mod kubernetes;
pub mod memory;

use crate::config::{CoordinationConfig, CoordinationProvider};
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::info;

pub use elector::LeaderElector;

/// Represents the current leadership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadershipState {
    /// Trying to acquire the lock.
    Candidate,
    /// Holds the lock; notifications are enabled.
    Leader,
    /// Lock held elsewhere; waiting for it to be released.
    Follower,
    /// Shut down; the lock has been released.
    Stopped,
}

impl LeadershipState {
    pub fn is_leader(&self) -> bool {
        matches!(self, LeadershipState::Leader)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Leader => "leader",
            Self::Follower => "follower",
            Self::Stopped => "stopped",
        }
    }
}

/// Shared leadership status that can be cheaply cloned and checked.
#[derive(Clone)]
pub struct LeadershipStatus {
    is_leader: Arc<AtomicBool>,
    state_rx: watch::Receiver<LeadershipState>,
}

impl LeadershipStatus {
    pub fn new(initial_state: LeadershipState) -> (Self, LeadershipStateUpdater) {
        let is_leader = Arc::new(AtomicBool::new(initial_state.is_leader()));
        let (state_tx, state_rx) = watch::channel(initial_state);

        let status = Self {
            is_leader: Arc::clone(&is_leader),
            state_rx,
        };

        let updater = LeadershipStateUpdater {
            is_leader,
            state_tx,
        };

        (status, updater)
    }

    /// Cheap atomic read, safe to call frequently.
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> LeadershipState {
        *self.state_rx.borrow()
    }

    /// Wait for the next state change. Returns `Stopped` once the elector is gone.
    pub async fn wait_for_change(&mut self) -> LeadershipState {
        if self.state_rx.changed().await.is_err() {
            return LeadershipState::Stopped;
        }
        *self.state_rx.borrow_and_update()
    }

    #[cfg(test)]
    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(LeadershipState) -> bool,
    ) -> LeadershipState {
        match self.state_rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            Err(_) => LeadershipState::Stopped,
        }
    }
}

/// Used by the elector to publish state transitions.
pub struct LeadershipStateUpdater {
    is_leader: Arc<AtomicBool>,
    state_tx: watch::Sender<LeadershipState>,
}

impl LeadershipStateUpdater {
    pub fn set_state(&self, state: LeadershipState) {
        self.is_leader.store(state.is_leader(), Ordering::Relaxed);
        // Ignore error - receiver might be dropped
        let _ = self.state_tx.send(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    HeldElsewhere,
}

/// Asynchronous notifications from the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// The lock was released by its holder and may be acquirable.
    Released,
    /// This instance's session is gone; any lock it held is lost.
    SessionLost,
}

/// A distributed mutual-exclusion lock bound to one coordination session.
#[async_trait::async_trait]
pub trait CoordinationLock: Send + Sync {
    fn identity(&self) -> &str;

    /// Try to take the lock. Resolves once ownership or denial is known.
    async fn acquire(&self) -> Result<Acquisition>;

    /// Give the lock up if this session holds it.
    async fn release(&self) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<LockEvent>;

    /// End the session. Called once, after every dependent component has stopped.
    async fn close(&self) -> Result<()>;
}

/// Open the coordination session configured for this process.
pub async fn connect(config: &CoordinationConfig) -> Result<Arc<dyn CoordinationLock>> {
    let identity = config.identity.clone().unwrap_or_else(default_identity);
    info!(
        provider = ?config.provider,
        lock_path = %config.lock_path,
        identity = %identity,
        "Connecting to coordination service"
    );

    match config.provider {
        CoordinationProvider::Memory => {
            let coordinator = memory::MemoryCoordinator::new();
            Ok(Arc::new(coordinator.connect(&config.lock_path, identity)))
        }
        #[cfg(feature = "kubernetes")]
        CoordinationProvider::Kubernetes => Ok(Arc::new(
            kubernetes::KubernetesLock::connect(config, identity).await?,
        )),
        #[cfg(not(feature = "kubernetes"))]
        CoordinationProvider::Kubernetes => Err(crate::error::LagwatchError::Config(
            "coordination.provider = \"kubernetes\" requires the `kubernetes` feature".to_string(),
        )),
    }
}

/// Hostname or pod name, falling back to a time-derived suffix.
pub fn default_identity() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("POD_NAME"))
        .unwrap_or_else(|_| {
            use std::time::{SystemTime, UNIX_EPOCH};
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            format!("lagwatch-{:x}", nanos & 0xffff_ffff)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leadership_state_is_leader() {
        assert!(LeadershipState::Leader.is_leader());
        assert!(!LeadershipState::Follower.is_leader());
        assert!(!LeadershipState::Candidate.is_leader());
        assert!(!LeadershipState::Stopped.is_leader());
    }

    #[tokio::test]
    async fn test_leadership_status_update() {
        let (status, updater) = LeadershipStatus::new(LeadershipState::Candidate);
        assert!(!status.is_leader());

        updater.set_state(LeadershipState::Leader);
        assert!(status.is_leader());
        assert_eq!(status.state(), LeadershipState::Leader);
    }

    #[tokio::test]
    async fn test_leadership_status_wait_for_change() {
        let (mut status, updater) = LeadershipStatus::new(LeadershipState::Candidate);

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            updater.set_state(LeadershipState::Leader);
        });

        let new_state = status.wait_for_change().await;
        assert_eq!(new_state, LeadershipState::Leader);
    }

    #[tokio::test]
    async fn test_wait_for_change_after_updater_dropped() {
        let (mut status, updater) = LeadershipStatus::new(LeadershipState::Follower);
        drop(updater);
        assert_eq!(status.wait_for_change().await, LeadershipState::Stopped);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&LeadershipState::Follower).unwrap();
        assert_eq!(json, "\"follower\"");
    }

    #[tokio::test]
    async fn test_connect_memory_provider() {
        let config = CoordinationConfig {
            identity: Some("replica-a".to_string()),
            ..CoordinationConfig::default()
        };
        let lock = connect(&config).await.unwrap();
        assert_eq!(lock.identity(), "replica-a");
        assert_eq!(lock.acquire().await.unwrap(), Acquisition::Acquired);
        lock.close().await.unwrap();
    }
}
