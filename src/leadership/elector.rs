use super::{
    Acquisition, CoordinationLock, LeadershipState, LeadershipStateUpdater, LeadershipStatus,
    LockEvent,
};
use crate::config::CoordinationConfig;
use crate::lifecycle::shutdown_requested;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct ElectorSettings {
    pub retry_backoff_min: Duration,
    pub retry_backoff_max: Duration,
    pub follower_recheck: Duration,
}

impl From<&CoordinationConfig> for ElectorSettings {
    fn from(config: &CoordinationConfig) -> Self {
        Self {
            retry_backoff_min: config.retry_backoff_min,
            retry_backoff_max: config.retry_backoff_max,
            follower_recheck: config.follower_recheck,
        }
    }
}

/// Drives Candidate → Leader/Follower → Candidate transitions from lock results
/// and lock events.
pub struct LeaderElector {
    lock: Arc<dyn CoordinationLock>,
    settings: ElectorSettings,
    updater: LeadershipStateUpdater,
    state: LeadershipState,
}

impl LeaderElector {
    pub fn new(
        lock: Arc<dyn CoordinationLock>,
        settings: ElectorSettings,
    ) -> (Self, LeadershipStatus) {
        let (status, updater) = LeadershipStatus::new(LeadershipState::Candidate);
        let elector = Self {
            lock,
            settings,
            updater,
            state: LeadershipState::Candidate,
        };
        (elector, status)
    }

    #[instrument(skip_all, name = "elector", fields(identity = %self.lock.identity()))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.lock.subscribe();
        let mut backoff = self.settings.retry_backoff_min;

        info!("Starting leader election");

        loop {
            let next = match self.state {
                LeadershipState::Candidate => {
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break,
                        result = self.lock.acquire() => match result {
                            Ok(Acquisition::Acquired) => {
                                backoff = self.settings.retry_backoff_min;
                                LeadershipState::Leader
                            }
                            Ok(Acquisition::HeldElsewhere) => {
                                backoff = self.settings.retry_backoff_min;
                                LeadershipState::Follower
                            }
                            Err(e) => {
                                warn!(error = %e, retry_in = ?backoff, "Lock acquisition failed");
                                tokio::select! {
                                    biased;
                                    _ = shutdown_requested(&mut shutdown) => break,
                                    _ = tokio::time::sleep(backoff) => {}
                                }
                                backoff = (backoff * 2).min(self.settings.retry_backoff_max);
                                LeadershipState::Candidate
                            }
                        },
                    }
                }
                LeadershipState::Leader | LeadershipState::Follower => {
                    let recheck = self.settings.follower_recheck;
                    let following = self.state == LeadershipState::Follower;
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break,
                        event = events.recv() => self.on_event(event, &mut events),
                        _ = tokio::time::sleep(recheck), if following => {
                            debug!("Rechecking lock");
                            LeadershipState::Candidate
                        }
                    }
                }
                LeadershipState::Stopped => break,
            };
            self.transition(next);
        }

        if self.state == LeadershipState::Leader {
            if let Err(e) = self.lock.release().await {
                error!(error = %e, "Failed to release leadership lock");
            } else {
                info!("Released leadership");
            }
        }
        self.transition(LeadershipState::Stopped);
    }

    fn on_event(
        &self,
        event: Result<LockEvent, RecvError>,
        events: &mut tokio::sync::broadcast::Receiver<LockEvent>,
    ) -> LeadershipState {
        match event {
            Ok(LockEvent::SessionLost) => {
                warn!(state = self.state.as_str(), "Coordination session lost");
                LeadershipState::Candidate
            }
            Ok(LockEvent::Released) if self.state == LeadershipState::Follower => {
                debug!("Lock released by holder");
                LeadershipState::Candidate
            }
            Ok(LockEvent::Released) => self.state,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Missed lock events, re-checking");
                LeadershipState::Candidate
            }
            Err(RecvError::Closed) => {
                warn!("Lock event stream closed");
                *events = self.lock.subscribe();
                LeadershipState::Candidate
            }
        }
    }

    fn transition(&mut self, next: LeadershipState) {
        if next == self.state {
            return;
        }
        match next {
            LeadershipState::Leader => info!("Acquired leadership"),
            LeadershipState::Follower => info!("Lock held elsewhere, following"),
            LeadershipState::Candidate if self.state == LeadershipState::Leader => {
                warn!("Lost leadership")
            }
            _ => debug!(from = self.state.as_str(), to = next.as_str(), "Leadership transition"),
        }
        self.state = next;
        self.updater.set_state(next);
    }
}
