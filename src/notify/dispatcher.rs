use super::{Notification, NotificationKind, Notifier};
use crate::config::NotifyConfig;
use crate::gateway::{QueryOutcome, StorageClient};
use crate::leadership::{LeadershipState, LeadershipStatus};
use crate::lifecycle::shutdown_requested;
use crate::storage::engine::unix_now_ms;
use crate::storage::status::PartitionState;
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Last status delivered for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentRecord {
    pub status: PartitionState,
    pub at: Instant,
}

/// Decide whether `current` warrants a notification given what was last sent.
pub fn decide(
    previous: Option<&SentRecord>,
    current: PartitionState,
    threshold: PartitionState,
    renotify_interval: Duration,
    now: Instant,
) -> Option<NotificationKind> {
    match previous {
        None => (current >= threshold).then_some(NotificationKind::Transition),
        Some(sent) if sent.status != current => {
            (sent.status >= threshold || current >= threshold)
                .then_some(NotificationKind::Transition)
        }
        Some(sent) => (current >= threshold
            && !renotify_interval.is_zero()
            && now.duration_since(sent.at) >= renotify_interval)
            .then_some(NotificationKind::Reminder),
    }
}

type GroupKey = (String, String);

struct NotifierSlot {
    notifier: Box<dyn Notifier>,
    sent: HashMap<GroupKey, SentRecord>,
}

/// Polls group statuses while this instance leads and fans them out to notifiers.
pub struct NotificationDispatcher {
    storage: StorageClient,
    clusters: Vec<String>,
    leadership: LeadershipStatus,
    slots: Vec<NotifierSlot>,
    interval: Duration,
    renotify_interval: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        config: &NotifyConfig,
        clusters: Vec<String>,
        storage: StorageClient,
        leadership: LeadershipStatus,
        notifiers: Vec<Box<dyn Notifier>>,
    ) -> Self {
        Self {
            storage,
            clusters,
            leadership,
            slots: notifiers
                .into_iter()
                .map(|notifier| NotifierSlot {
                    notifier,
                    sent: HashMap::new(),
                })
                .collect(),
            interval: config.interval,
            renotify_interval: config.renotify_interval,
        }
    }

    #[instrument(skip_all, name = "dispatcher")]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut leadership = self.leadership.clone();

        info!(
            notifiers = self.slots.len(),
            interval = ?self.interval,
            "Notification dispatcher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                state = leadership.wait_for_change() => {
                    // updates coalesce, so a lost term may be hidden behind a Leader reading
                    self.clear();
                    if state.is_leader() {
                        debug!("Leadership term started, notification records reset");
                    } else {
                        debug!(state = state.as_str(), "Notifications disabled");
                    }
                    if state == LeadershipState::Stopped {
                        // elector gone, nothing will enable notifications again
                        shutdown_requested(&mut shutdown).await;
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if self.leadership.is_leader() {
                        self.dispatch_once().await;
                    }
                }
            }
        }
        debug!("Dispatcher loop exited");
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.sent.clear();
        }
    }

    /// One pass over every group of every cluster. Returns notifications delivered.
    pub async fn dispatch_once(&mut self) -> usize {
        let mut delivered = 0;

        for cluster in &self.clusters {
            let groups = match self.storage.list_consumer_groups(cluster).await {
                QueryOutcome::Found(groups) => groups,
                QueryOutcome::NotFound | QueryOutcome::TimedOut => continue,
            };

            for group in groups {
                if !self.leadership.is_leader() {
                    debug!("Leadership lost mid-cycle, stopping dispatch");
                    return delivered;
                }

                let status = match self
                    .storage
                    .consumer_group_status(cluster, &group, false)
                    .await
                {
                    QueryOutcome::Found(status) => status,
                    QueryOutcome::NotFound | QueryOutcome::TimedOut => continue,
                };
                if status.status == PartitionState::Unknown {
                    continue;
                }

                let key = (cluster.clone(), group.clone());
                let now = Instant::now();
                let renotify_interval = self.renotify_interval;

                // notifiers are independent; deliver to all of them concurrently
                let deliveries = self.slots.iter_mut().filter_map(|slot| {
                    let previous = slot.sent.get(&key);
                    let kind = decide(
                        previous,
                        status.status,
                        slot.notifier.threshold(),
                        renotify_interval,
                        now,
                    )?;
                    let notification =
                        Notification::new(&status, previous.map(|p| p.status), kind, unix_now_ms());
                    Some(async move {
                        let result = slot.notifier.notify(&notification).await;
                        (slot, result)
                    })
                });

                for (slot, result) in join_all(deliveries).await {
                    match result {
                        Ok(()) => {
                            slot.sent.insert(
                                key.clone(),
                                SentRecord {
                                    status: status.status,
                                    at: now,
                                },
                            );
                            delivered += 1;
                        }
                        Err(e) => warn!(
                            notifier = slot.notifier.name(),
                            cluster = %cluster,
                            group = %group,
                            error = %e,
                            "Notification delivery failed, retrying next interval"
                        ),
                    }
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::error::{LagwatchError, Result};
    use crate::leadership::LeadershipStateUpdater;
    use crate::lifecycle::ServiceHandle;
    use crate::storage::{HighWaterMark, OffsetCommit, OffsetStorage};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<Notification>>>,
        failing: Arc<AtomicBool>,
    }

    impl Recorder {
        fn kinds(&self) -> Vec<(PartitionState, NotificationKind)> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|n| (n.status, n.kind))
                .collect()
        }
    }

    struct RecordingNotifier(Recorder);

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        fn threshold(&self) -> PartitionState {
            PartitionState::Warn
        }

        async fn notify(&self, notification: &Notification) -> Result<()> {
            if self.0.failing.load(Ordering::SeqCst) {
                return Err(LagwatchError::Notify("endpoint down".to_string()));
            }
            self.0.seen.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        storage: OffsetStorage,
        client: StorageClient,
        recorder: Recorder,
        updater: LeadershipStateUpdater,
        dispatcher: NotificationDispatcher,
        ts: i64,
    }

    impl Fixture {
        fn new(state: LeadershipState) -> Self {
            let storage_config = StorageConfig {
                min_distance: Duration::ZERO,
                stop_threshold: Duration::ZERO,
                ..StorageConfig::default()
            };
            let storage = OffsetStorage::start(&storage_config, &["prod".to_string()]).unwrap();
            let client = storage.client();
            let (status, updater) = LeadershipStatus::new(state);
            let recorder = Recorder::default();
            let config = NotifyConfig {
                interval: Duration::from_millis(100),
                renotify_interval: HOUR,
                ..NotifyConfig::default()
            };
            let dispatcher = NotificationDispatcher::new(
                &config,
                vec!["prod".to_string()],
                client.clone(),
                status,
                vec![Box::new(RecordingNotifier(recorder.clone()))],
            );
            Self {
                storage,
                client,
                recorder,
                updater,
                dispatcher,
                ts: 0,
            }
        }

        /// One sample where the consumer sits at `offset` and the log ends at `hwm`.
        fn sample(&mut self, offset: i64, hwm: i64) {
            self.ts += 60_000;
            self.client.record_high_water_mark(HighWaterMark {
                cluster: "prod".to_string(),
                topic: "orders".to_string(),
                partition: 0,
                offset: hwm,
                timestamp_ms: self.ts,
            });
            self.client.record_offset(OffsetCommit {
                cluster: "prod".to_string(),
                group: "billing".to_string(),
                topic: "orders".to_string(),
                partition: 0,
                offset,
                timestamp_ms: self.ts,
            });
        }
    }

    fn record(status: PartitionState, at: Instant) -> SentRecord {
        SentRecord { status, at }
    }

    #[test]
    fn test_decide_first_sighting_respects_threshold() {
        let now = Instant::now();
        let warn = PartitionState::Warn;
        assert_eq!(decide(None, PartitionState::Ok, warn, HOUR, now), None);
        assert_eq!(decide(None, PartitionState::Stall, warn, HOUR, now), None);
        assert_eq!(
            decide(None, PartitionState::Error, warn, HOUR, now),
            Some(NotificationKind::Transition)
        );
    }

    #[test]
    fn test_decide_reports_transitions_and_recoveries() {
        let now = Instant::now();
        let warn = PartitionState::Warn;
        let was_error = record(PartitionState::Error, now);
        let was_ok = record(PartitionState::Ok, now);

        assert_eq!(
            decide(Some(&was_error), PartitionState::Ok, warn, HOUR, now),
            Some(NotificationKind::Transition)
        );
        assert_eq!(
            decide(Some(&was_ok), PartitionState::Rewind, warn, HOUR, now),
            Some(NotificationKind::Transition)
        );
        // both sides below threshold
        assert_eq!(decide(Some(&was_ok), PartitionState::Stall, warn, HOUR, now), None);
    }

    #[test]
    fn test_decide_reminds_after_interval() {
        let start = Instant::now();
        let warn = PartitionState::Warn;
        let sent = record(PartitionState::Error, start);

        assert_eq!(decide(Some(&sent), PartitionState::Error, warn, HOUR, start), None);
        assert_eq!(
            decide(Some(&sent), PartitionState::Error, warn, HOUR, start + HOUR),
            Some(NotificationKind::Reminder)
        );

        let healthy = record(PartitionState::Ok, start);
        assert_eq!(decide(Some(&healthy), PartitionState::Ok, warn, HOUR, start + HOUR), None);
    }

    #[tokio::test]
    async fn test_dispatch_is_edge_triggered() {
        let mut fx = Fixture::new(LeadershipState::Leader);
        // committed offset stuck across a full window while the log grows
        for i in 0..10 {
            fx.sample(100, 200 + i * 100);
        }

        assert_eq!(fx.dispatcher.dispatch_once().await, 1);
        assert_eq!(fx.dispatcher.dispatch_once().await, 0);
        assert_eq!(
            fx.recorder.kinds(),
            vec![(PartitionState::Error, NotificationKind::Transition)]
        );

        // consumer catches up: recovery is reported once
        fx.sample(350, 350);
        fx.sample(400, 400);
        fx.sample(450, 450);
        for _ in 0..10 {
            fx.sample(500 + fx.ts / 1000, 500 + fx.ts / 1000);
        }
        assert_eq!(fx.dispatcher.dispatch_once().await, 1);
        assert_eq!(fx.dispatcher.dispatch_once().await, 0);
        let kinds = fx.recorder.kinds();
        assert_eq!(kinds[1], (PartitionState::Ok, NotificationKind::Transition));
        assert_eq!(fx.recorder.seen.lock().unwrap()[1].previous, Some(PartitionState::Error));

        fx.storage.stop().await;
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried() {
        let mut fx = Fixture::new(LeadershipState::Leader);
        fx.sample(100, 200);
        fx.sample(100, 300);

        fx.recorder.failing.store(true, Ordering::SeqCst);
        assert_eq!(fx.dispatcher.dispatch_once().await, 0);

        fx.recorder.failing.store(false, Ordering::SeqCst);
        assert_eq!(fx.dispatcher.dispatch_once().await, 1);

        fx.storage.stop().await;
    }

    #[tokio::test]
    async fn test_follower_never_dispatches() {
        let mut fx = Fixture::new(LeadershipState::Follower);
        fx.sample(100, 200);
        fx.sample(100, 300);

        assert_eq!(fx.dispatcher.dispatch_once().await, 0);
        assert!(fx.recorder.kinds().is_empty());

        fx.storage.stop().await;
    }

    #[tokio::test]
    async fn test_run_follows_leadership_and_clears_on_loss() {
        let mut fx = Fixture::new(LeadershipState::Follower);
        fx.sample(100, 200);
        fx.sample(100, 300);

        let Fixture {
            storage,
            recorder,
            updater,
            dispatcher,
            ..
        } = fx;
        let service = ServiceHandle::spawn("dispatcher", move |shutdown| dispatcher.run(shutdown));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(recorder.kinds().is_empty());

        updater.set_state(LeadershipState::Leader);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(recorder.kinds().len(), 1);

        // demotion forgets what was sent, so the next leader term re-announces
        updater.set_state(LeadershipState::Candidate);
        tokio::time::sleep(Duration::from_millis(150)).await;
        updater.set_state(LeadershipState::Leader);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(recorder.kinds().len(), 2);

        service.stop().await;
        storage.stop().await;
    }

    #[tokio::test]
    async fn test_run_clears_on_coalesced_leadership_flip() {
        let mut fx = Fixture::new(LeadershipState::Leader);
        fx.sample(100, 200);
        fx.sample(100, 300);

        let Fixture {
            storage,
            recorder,
            updater,
            dispatcher,
            ..
        } = fx;
        let service = ServiceHandle::spawn("dispatcher", move |shutdown| dispatcher.run(shutdown));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(recorder.kinds().len(), 1);

        // the dispatcher only ever observes the final Leader value
        updater.set_state(LeadershipState::Candidate);
        updater.set_state(LeadershipState::Leader);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(
            recorder.kinds(),
            vec![
                (PartitionState::Warn, NotificationKind::Transition),
                (PartitionState::Warn, NotificationKind::Transition),
            ]
        );

        service.stop().await;
        storage.stop().await;
    }
}
