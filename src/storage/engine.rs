use crate::config::{CompiledFilters, StorageConfig};
use crate::error::Result;
use crate::gateway::StorageClient;
use crate::lifecycle::ServiceHandle;
use crate::storage::evaluator::{EvaluationPolicy, LagEvaluator, compute_lag};
use crate::storage::ring::{Observation, PushOutcome, RingHistory};
use crate::storage::status::{ConsumerGroupStatus, PartitionStatus};
use crate::storage::{
    BrokerOffsetState, HighWaterMark, OffsetCommit, StorageRequest, TopicPartition,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, trace, warn};

/// Milliseconds since the Unix epoch.
pub fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct ClusterState {
    broker: HashMap<TopicPartition, BrokerOffsetState>,
    groups: BTreeMap<String, HashMap<TopicPartition, RingHistory>>,
}

/// (cluster, group, partition) currently reporting a stale high-water mark.
type StaleKey = (String, String, TopicPartition);

/// All offset state for every configured cluster. Owned by exactly one task.
pub struct StorageEngine {
    clusters: HashMap<String, ClusterState>,
    filters: CompiledFilters,
    capacity: usize,
    min_distance_ms: i64,
    policy: EvaluationPolicy,
    stale: HashSet<StaleKey>,
}

impl StorageEngine {
    pub fn new(config: &StorageConfig, clusters: &[String]) -> Result<Self> {
        Ok(Self {
            clusters: clusters
                .iter()
                .map(|name| (name.clone(), ClusterState::default()))
                .collect(),
            filters: config.compile_filters()?,
            capacity: config.intervals,
            min_distance_ms: duration_ms(config.min_distance),
            policy: EvaluationPolicy {
                stop_threshold_ms: duration_ms(config.stop_threshold),
            },
            stale: HashSet::new(),
        })
    }

    pub fn handle(&mut self, request: StorageRequest, now_ms: i64) {
        match request {
            StorageRequest::RecordOffset(commit) => self.record_offset(commit),
            StorageRequest::RecordHighWaterMark(hwm) => self.record_high_water_mark(hwm),
            StorageRequest::ListConsumerGroups { cluster, reply } => {
                let _ = reply.send(self.consumer_groups(&cluster));
            }
            StorageRequest::GetConsumerGroupStatus {
                cluster,
                group,
                show_all,
                reply,
            } => {
                let _ = reply.send(self.group_status(&cluster, &group, show_all, now_ms));
            }
            StorageRequest::ListTopics { cluster, reply } => {
                let _ = reply.send(self.topics(&cluster));
            }
            StorageRequest::GetTopicOffsets {
                cluster,
                topic,
                reply,
            } => {
                let _ = reply.send(self.topic_offsets(&cluster, &topic));
            }
        }
    }

    fn record_offset(&mut self, commit: OffsetCommit) {
        let Some(state) = self.clusters.get_mut(&commit.cluster) else {
            warn!(cluster = %commit.cluster, "Dropping offset commit for unknown cluster");
            return;
        };

        if !self.filters.matches_group(&commit.group) || !self.filters.matches_topic(&commit.topic)
        {
            trace!(
                cluster = %commit.cluster,
                group = %commit.group,
                topic = %commit.topic,
                "Offset commit filtered out"
            );
            return;
        }

        let key = TopicPartition::new(commit.topic, commit.partition);
        let lag = state
            .broker
            .get(&key)
            .map_or(0, |b| compute_lag(b.high_water_mark, commit.offset).0);

        let ring = state
            .groups
            .entry(commit.group.clone())
            .or_default()
            .entry(key)
            .or_insert_with(|| RingHistory::new(self.capacity));

        let outcome = ring.push(
            Observation {
                offset: commit.offset,
                timestamp_ms: commit.timestamp_ms,
                lag,
            },
            self.min_distance_ms,
        );

        if outcome == PushOutcome::OutOfOrder {
            trace!(
                cluster = %commit.cluster,
                group = %commit.group,
                offset = commit.offset,
                timestamp_ms = commit.timestamp_ms,
                "Dropping commit older than newest observation"
            );
        }
    }

    fn record_high_water_mark(&mut self, hwm: HighWaterMark) {
        let Some(state) = self.clusters.get_mut(&hwm.cluster) else {
            warn!(cluster = %hwm.cluster, "Dropping high-water mark for unknown cluster");
            return;
        };

        let key = TopicPartition::new(hwm.topic.clone(), hwm.partition);
        state.broker.insert(
            key,
            BrokerOffsetState {
                topic: hwm.topic,
                partition: hwm.partition,
                high_water_mark: hwm.offset,
                timestamp_ms: hwm.timestamp_ms,
            },
        );
    }

    pub fn consumer_groups(&self, cluster: &str) -> Option<Vec<String>> {
        self.clusters
            .get(cluster)
            .map(|state| state.groups.keys().cloned().collect())
    }

    pub fn group_status(
        &mut self,
        cluster: &str,
        group: &str,
        show_all: bool,
        now_ms: i64,
    ) -> Option<ConsumerGroupStatus> {
        let state = self.clusters.get(cluster)?;
        let rings = state.groups.get(group)?;

        let mut partitions = Vec::with_capacity(rings.len());
        for (key, ring) in rings {
            let eval = LagEvaluator::evaluate(ring, state.broker.get(key), self.policy, now_ms);
            let stale_key = (cluster.to_string(), group.to_string(), key.clone());
            if track_stale(&mut self.stale, stale_key, eval.stale_high_water_mark) {
                warn!(
                    cluster,
                    group,
                    topic = %key.topic,
                    partition = key.partition,
                    high_water_mark = eval.high_water_mark,
                    offset = eval.offset,
                    "Broker high-water mark behind committed offset, reporting zero lag"
                );
            }
            partitions.push(PartitionStatus {
                topic: key.topic.clone(),
                partition: key.partition,
                status: eval.status,
                current_lag: eval.lag,
                current_offset: eval.offset,
                current_high_water_mark: eval.high_water_mark,
                stale_high_water_mark: eval.stale_high_water_mark,
                last_commit_ms: eval.last_commit_ms,
            });
        }

        Some(ConsumerGroupStatus::from_partitions(
            cluster, group, partitions, show_all,
        ))
    }

    pub fn topics(&self, cluster: &str) -> Option<Vec<String>> {
        let state = self.clusters.get(cluster)?;
        let mut topics: Vec<String> = state.broker.keys().map(|k| k.topic.clone()).collect();
        topics.sort();
        topics.dedup();
        Some(topics)
    }

    pub fn topic_offsets(&self, cluster: &str, topic: &str) -> Option<Vec<BrokerOffsetState>> {
        let state = self.clusters.get(cluster)?;
        let mut offsets: Vec<BrokerOffsetState> = state
            .broker
            .values()
            .filter(|b| b.topic == topic)
            .cloned()
            .collect();
        if offsets.is_empty() {
            return None;
        }
        offsets.sort_by_key(|b| b.partition);
        Some(offsets)
    }
}

/// Record whether a partition is stale. True only when it has just become stale.
fn track_stale(stale: &mut HashSet<StaleKey>, key: StaleKey, is_stale: bool) -> bool {
    if is_stale {
        stale.insert(key)
    } else {
        stale.remove(&key);
        false
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Running storage task plus the mailbox feeding it.
pub struct OffsetStorage {
    sender: mpsc::UnboundedSender<StorageRequest>,
    request_timeout: Duration,
    service: ServiceHandle,
}

impl OffsetStorage {
    pub fn start(config: &StorageConfig, clusters: &[String]) -> Result<Self> {
        let engine = StorageEngine::new(config, clusters)?;
        let (sender, receiver) = mpsc::unbounded_channel();

        let service = ServiceHandle::spawn("storage", move |shutdown| {
            run(engine, receiver, shutdown)
        });

        info!(
            clusters = clusters.len(),
            intervals = config.intervals,
            "Offset storage started"
        );

        Ok(Self {
            sender,
            request_timeout: config.request_timeout,
            service,
        })
    }

    pub fn client(&self) -> StorageClient {
        StorageClient::new(self.sender.clone(), self.request_timeout)
    }

    pub async fn stop(self) {
        self.service.stop().await;
    }
}

#[instrument(skip_all, name = "storage")]
async fn run(
    mut engine: StorageEngine,
    mut receiver: mpsc::UnboundedReceiver<StorageRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            request = receiver.recv() => match request {
                Some(request) => engine.handle(request, unix_now_ms()),
                None => break,
            },
        }
    }
    debug!("Storage loop exited");
}
