//! Leadership lock backed by a Kubernetes Lease (coordination.k8s.io/v1).
//!
//! `kube-lease-manager` keeps renewing or contending for the lease in a background task
//! and reports ownership on a watch channel. This module turns that channel into
//! acquire results and lock events. Dropping the channel releases the lease, so a
//! released lock cannot be re-acquired by the same session.

use super::{Acquisition, CoordinationLock, LockEvent};
use crate::config::CoordinationConfig;
use crate::error::{LagwatchError, Result};
use kube::Client;
use kube_lease_manager::{LeaseCreateMode, LeaseManagerBuilder};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 16;

pub struct KubernetesLock {
    identity: String,
    lease_name: String,
    grace_period: Duration,
    leading: watch::Receiver<bool>,
    events: broadcast::Sender<LockEvent>,
    /// Stop signal and join handle of the task owning the lease channel.
    session: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl KubernetesLock {
    pub async fn connect(config: &CoordinationConfig, identity: String) -> Result<Self> {
        let lease_name = lease_name(&config.lock_path);
        info!(
            lease = %lease_name,
            namespace = %config.namespace,
            identity = %identity,
            "Starting Kubernetes lease manager"
        );

        let client = Client::try_default()
            .await
            .map_err(|e| LagwatchError::Coordination(format!("Kubernetes client: {e}")))?;

        let manager = LeaseManagerBuilder::new(client, &lease_name)
            .with_namespace(&config.namespace)
            .with_identity(&identity)
            .with_duration(config.session_timeout.as_secs())
            .with_grace(config.grace_period.as_secs())
            .with_create_mode(LeaseCreateMode::AutoCreate)
            .build()
            .await
            .map_err(|e| LagwatchError::Coordination(format!("Lease manager: {e}")))?;

        let (lease_rx, lease_task) = manager.watch().await;
        let (leading_tx, leading) = watch::channel(*lease_rx.borrow());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(forward_lease(
            lease_rx,
            lease_task,
            leading_tx,
            events.clone(),
            stop_rx,
        ));

        Ok(Self {
            identity,
            lease_name,
            grace_period: config.grace_period,
            leading,
            events,
            session: Mutex::new(Some((stop_tx, handle))),
        })
    }
}

/// Lease names must be DNS labels; derive one from the configured lock path.
fn lease_name(lock_path: &str) -> String {
    let name: String = lock_path
        .trim_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if name.is_empty() {
        "lagwatch".to_string()
    } else {
        name
    }
}

async fn forward_lease(
    mut lease_rx: watch::Receiver<bool>,
    lease_task: JoinHandle<kube_lease_manager::Result<kube_lease_manager::LeaseManager>>,
    leading_tx: watch::Sender<bool>,
    events: broadcast::Sender<LockEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = lease_rx.changed() => {
                if result.is_err() {
                    warn!("Lease channel closed");
                    let _ = leading_tx.send(false);
                    let _ = events.send(LockEvent::SessionLost);
                    break;
                }
                let is_leader = *lease_rx.borrow_and_update();
                let was_leader = leading_tx.send_replace(is_leader);
                debug!(is_leader, was_leader, "Lease ownership update");
                match (was_leader, is_leader) {
                    (true, false) => {
                        let _ = events.send(LockEvent::SessionLost);
                    }
                    (false, true) => {
                        let _ = events.send(LockEvent::Released);
                    }
                    _ => {}
                }
            }
            _ = stop_rx.changed() => break,
        }
    }

    // dropping the lease channel releases the lease
    drop(lease_rx);
    match lease_task.await {
        Ok(Ok(_manager)) => info!("Lease manager stopped cleanly"),
        Ok(Err(e)) => warn!(error = %e, "Lease manager stopped with error"),
        Err(e) => error!(error = %e, "Lease task panicked"),
    }
    let _ = leading_tx.send(false);
}

#[async_trait::async_trait]
impl CoordinationLock for KubernetesLock {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn acquire(&self) -> Result<Acquisition> {
        if self.session.lock().await.is_none() {
            return Err(LagwatchError::Coordination(format!(
                "lease {} already released",
                self.lease_name
            )));
        }

        // the lease manager contends on its own; give it one grace period to win
        let mut leading = self.leading.clone();
        match tokio::time::timeout(self.grace_period, leading.wait_for(|held| *held)).await {
            Ok(Ok(_)) => Ok(Acquisition::Acquired),
            Ok(Err(_)) => Err(LagwatchError::Coordination(
                "lease manager stopped".to_string(),
            )),
            Err(_) => Ok(Acquisition::HeldElsewhere),
        }
    }

    async fn release(&self) -> Result<()> {
        let Some((stop_tx, handle)) = self.session.lock().await.take() else {
            return Ok(());
        };
        let _ = stop_tx.send(true);
        handle
            .await
            .map_err(|e| LagwatchError::Coordination(format!("lease task: {e}")))
    }

    fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.release().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_name_from_lock_path() {
        assert_eq!(lease_name("/lagwatch/notifier"), "lagwatch-notifier");
        assert_eq!(lease_name("Team_A/Lock"), "team-a-lock");
        assert_eq!(lease_name("/"), "lagwatch");
    }
}
